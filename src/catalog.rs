//! # Catalog row sets
//!
//! A [`CatalogTable`] is the raw answer of a cone search: the column names in the order the
//! service returned them, and rows of string cells. Typed access goes through the column names
//! of a [`CatalogSpec`](crate::config::CatalogSpec), since every catalog names its RA/DEC and
//! magnitude columns differently.
use ahash::RandomState;
use std::collections::HashMap;

use crate::skypatch_errors::SkyPatchError;

/// One catalog row. Cells are kept verbatim; numeric parsing happens on access.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogTable {
    columns: Vec<String>,
    index: HashMap<String, usize, RandomState>,
    rows: Vec<CatalogRow>,
}

impl PartialEq for CatalogTable {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.rows == other.rows
    }
}

impl CatalogTable {
    /// Build a table, checking that every row has one cell per column.
    pub fn new(columns: Vec<String>, rows: Vec<CatalogRow>) -> Result<Self, SkyPatchError> {
        if let Some(bad) = rows.iter().position(|r| r.cells.len() != columns.len()) {
            return Err(SkyPatchError::CatalogQuery {
                identifier: "catalog table".into(),
                reason: format!(
                    "row {bad} has {} cells, expected {}",
                    rows[bad].cells.len(),
                    columns.len()
                ),
            });
        }
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Ok(CatalogTable {
            columns,
            index,
            rows,
        })
    }

    /// An empty row set carrying no columns.
    pub fn empty() -> Self {
        CatalogTable::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn require_column(&self, name: &str) -> Result<usize, SkyPatchError> {
        self.column_index(name)
            .ok_or_else(|| SkyPatchError::CatalogQuery {
                identifier: name.to_string(),
                reason: "column missing from the catalog response".into(),
            })
    }

    /// Raw cell of `row` in column `name`.
    pub fn cell<'a>(&self, row: &'a CatalogRow, name: &str) -> Result<&'a str, SkyPatchError> {
        let idx = self.require_column(name)?;
        Ok(row.cells[idx].as_str())
    }

    /// Numeric cell of `row` in column `name`; blank cells read as `None`.
    pub fn value(&self, row: &CatalogRow, name: &str) -> Result<Option<f64>, SkyPatchError> {
        let raw = self.cell(row, name)?.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<f64>()
            .map(Some)
            .map_err(|_| SkyPatchError::CatalogQuery {
                identifier: name.to_string(),
                reason: format!("non-numeric value '{raw}'"),
            })
    }

    /// A table with the same columns holding the rows selected by `keep`.
    pub fn select<F>(&self, mut keep: F) -> CatalogTable
    where
        F: FnMut(&CatalogRow) -> bool,
    {
        CatalogTable {
            columns: self.columns.clone(),
            index: self.index.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}
