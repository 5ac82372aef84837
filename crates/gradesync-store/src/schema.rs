//! Table definitions as reported by the store's metadata endpoint.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Enumerated field type whose values must come from a fixed option list.
pub const SINGLE_SELECT: &str = "singleSelect";

/// Field types the store computes itself; writes to them are rejected.
pub const COMPUTED_FIELD_TYPES: &[&str] = &[
    "formula",
    "rollup",
    "lookup",
    "createdTime",
    "lastModifiedTime",
    "autoNumber",
    "button",
];

/// Relational links need record ids, which rows never carry.
pub const LINK_FIELD_TYPE: &str = "multipleRecordLinks";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldOptions {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub options: Option<FieldOptions>,
}

impl FieldSchema {
    pub fn is_writable(&self) -> bool {
        !self.name.is_empty()
            && self.field_type != LINK_FIELD_TYPE
            && !COMPUTED_FIELD_TYPES.contains(&self.field_type.as_str())
    }

    /// Option names in schema order; `None` for non-select fields.
    pub fn choices(&self) -> Option<Vec<String>> {
        if self.field_type != SINGLE_SELECT {
            return None;
        }
        Some(
            self.options
                .iter()
                .flat_map(|o| o.choices.iter())
                .filter_map(|c| c.name.clone())
                .filter(|n| !n.is_empty())
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// Single-select field name → allowed options, in schema order.
    pub fn select_options(&self) -> BTreeMap<String, Vec<String>> {
        self.fields
            .iter()
            .filter_map(|f| f.choices().map(|c| (f.name.clone(), c)))
            .collect()
    }

    pub fn writable_fields(&self) -> HashSet<String> {
        self.fields
            .iter()
            .filter(|f| f.is_writable())
            .map(|f| f.name.clone())
            .collect()
    }
}

/// All tables of one base, addressable by id or by name.
#[derive(Debug, Clone, Default)]
pub struct BaseSchema {
    tables: Vec<TableSchema>,
    index: HashMap<String, usize>,
}

impl BaseSchema {
    pub fn from_tables(tables: Vec<TableSchema>) -> Self {
        let mut index = HashMap::with_capacity(tables.len() * 2);
        for (i, table) in tables.iter().enumerate() {
            index.insert(table.id.clone(), i);
            // ids win over a table that happens to be named like another's id
            index.entry(table.name.clone()).or_insert(i);
        }
        Self { tables, index }
    }

    pub fn get(&self, id_or_name: &str) -> Option<&TableSchema> {
        self.index.get(id_or_name).map(|&i| &self.tables[i])
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }
}
