//! Type definitions

pub mod correction;
pub mod entity;
pub mod import;
pub mod issue;
pub mod recovery;
pub mod row;
pub mod tariff;
pub mod value;

pub use correction::*;
pub use entity::*;
pub use import::*;
pub use issue::*;
pub use recovery::*;
pub use row::*;
pub use tariff::*;
pub use value::*;
