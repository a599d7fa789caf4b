//! Importable entity definitions

use serde::{Deserialize, Serialize};

use super::ColumnRule;

/// One importable entity type and its columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub key: String,
    pub label: String,
    pub columns: Vec<ColumnRule>,
}

impl EntityDefinition {
    pub fn column(&self, key: &str) -> Option<&ColumnRule> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &ColumnRule> {
        self.columns.iter().filter(|c| c.required)
    }
}
