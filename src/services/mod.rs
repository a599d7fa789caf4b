//! Business logic services

pub mod catalog;
pub mod collaborators;
pub mod correction;
pub mod formula;
pub mod history;
pub mod recovery;
pub mod tariff;
pub mod validation;
pub mod wizard;
