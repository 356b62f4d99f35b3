// Query Module
// Catalogue of analytical queries, their normalization into typed tables,
// and sequential execution over one session

pub mod anomaly;
pub mod catalogue;
pub mod dialect;
pub mod normalize;
pub mod runner;

use crate::db::traits::{CellValue, RawResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use anomaly::AnomalyProfile;
pub use catalogue::{Catalogue, QuerySpec};
pub use dialect::Dialect;
pub use normalize::{derive_rate, normalize};
pub use runner::{fetch_catalogue, FetchError, FetchReport};

/// Semantic type of a result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    /// Float in 0..=100, rounded to 2 decimals
    Percentage,
    /// `numerator * 100 / denominator` over two columns of the same row
    Rate { numerator: String, denominator: String },
    /// Integer hour 0-23
    HourOfDay,
    /// Sample standard deviation from a row's count, sum and sum of squares
    StdDev {
        count: String,
        sum: String,
        sum_of_squares: String,
    },
}

impl ColumnKind {
    pub fn rate(numerator: &str, denominator: &str) -> Self {
        ColumnKind::Rate {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }

    pub fn std_dev(count: &str, sum: &str, sum_of_squares: &str) -> Self {
        ColumnKind::StdDev {
            count: count.to_string(),
            sum: sum.to_string(),
            sum_of_squares: sum_of_squares.to_string(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, ColumnKind::Text)
    }
}

/// Named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A catalogue query failed on the engine
#[derive(Debug, Clone, Error)]
#[error("query '{query}' failed: {message}")]
pub struct QueryError {
    pub query: String,
    pub message: String,
}

/// The engine returned a shape the catalogue does not declare
#[derive(Debug, Clone, PartialEq, Error)]
#[error("schema mismatch in '{query}': expected {expected} columns, got {actual} ({detail})")]
pub struct SchemaMismatchError {
    pub query: String,
    pub expected: usize,
    pub actual: usize,
    pub detail: String,
}

/// Immutable typed table produced by one query.
/// Every row has exactly as many cells as there are columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularResult {
    query: String,
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<CellValue>>,
}

impl TabularResult {
    pub fn new(
        query: impl Into<String>,
        columns: Vec<ColumnDef>,
        rows: Vec<Vec<CellValue>>,
    ) -> Result<Self, SchemaMismatchError> {
        let query = query.into();
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(SchemaMismatchError {
                query,
                expected: columns.len(),
                actual: row.len(),
                detail: format!("row {} has the wrong width", idx),
            });
        }
        Ok(Self { query, columns, rows })
    }

    pub fn empty(query: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            query: query.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cell of `row` in the named column
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// All cells of the named column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Back to the engine-neutral shape, e.g. to feed `normalize` again
    pub fn to_raw(&self) -> RawResult {
        RawResult::new(self.column_names().map(String::from).collect(), self.rows.clone())
    }
}

/// Query name to materialized table, in name order
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    tables: BTreeMap<String, Arc<TabularResult>>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: TabularResult) {
        self.tables.insert(table.query().to_string(), Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Option<&TabularResult> {
        self.tables.get(name).map(Arc::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TabularResult)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Only the named tables; shares the underlying data
    pub fn subset<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> ResultSet {
        let tables = names
            .into_iter()
            .filter_map(|name| self.tables.get_key_value(name))
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        ResultSet { tables }
    }
}
