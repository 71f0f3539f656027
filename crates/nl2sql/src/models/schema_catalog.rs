use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct TableDescriptor {
    pub table_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDescriptor {
    pub table_name: String,
    pub column_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub datatype: String,
}

/// Snapshot of the metadata relations, read once per pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaCatalog {
    pub table_descriptions: Vec<TableDescriptor>,
    pub table_columns: Vec<ColumnDescriptor>,
}

impl SchemaCatalog {
    #[must_use]
    pub fn new(
        table_descriptions: Vec<TableDescriptor>,
        table_columns: Vec<ColumnDescriptor>,
    ) -> Self {
        Self {
            table_descriptions,
            table_columns,
        }
    }

    /// No grounding is available when both relations came back empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table_descriptions.is_empty() && self.table_columns.is_empty()
    }

    /// Every table known to the catalog, including tables that only appear
    /// through orphaned column rows.
    #[must_use]
    pub fn table_names(&self) -> BTreeSet<String> {
        self.table_descriptions
            .iter()
            .map(|table| table.table_name.clone())
            .chain(
                self.table_columns
                    .iter()
                    .map(|column| column.table_name.clone()),
            )
            .collect()
    }

    #[must_use]
    pub fn columns_for<'a>(&'a self, table_name: &'a str) -> impl Iterator<Item = &'a ColumnDescriptor> {
        self.table_columns
            .iter()
            .filter(move |column| column.table_name == table_name)
    }

    #[must_use]
    pub fn description_for(&self, table_name: &str) -> Option<&str> {
        self.table_descriptions
            .iter()
            .find(|table| table.table_name == table_name)
            .map(|table| table.description.as_str())
    }

    /// Column rows whose table has no description row.
    #[must_use]
    pub fn orphan_columns(&self) -> Vec<&ColumnDescriptor> {
        let described = self
            .table_descriptions
            .iter()
            .map(|table| table.table_name.as_str())
            .collect::<BTreeSet<_>>();
        self.table_columns
            .iter()
            .filter(|column| !described.contains(column.table_name.as_str()))
            .collect()
    }

    #[must_use]
    pub fn subset(&self, tables: &BTreeSet<String>) -> Self {
        Self {
            table_descriptions: self
                .table_descriptions
                .iter()
                .filter(|table| tables.contains(&table.table_name))
                .cloned()
                .collect(),
            table_columns: self
                .table_columns
                .iter()
                .filter(|column| tables.contains(&column.table_name))
                .cloned()
                .collect(),
        }
    }

    #[must_use]
    pub fn column_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for column in &self.table_columns {
            *counts.entry(column.table_name.clone()).or_insert(0) += 1;
        }
        counts
    }
}
