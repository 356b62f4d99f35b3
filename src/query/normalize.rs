// Result Normalizer
// Maps engine-native results onto the catalogue's typed columns

use super::catalogue::QuerySpec;
use super::{ColumnDef, ColumnKind, SchemaMismatchError, TabularResult};
use crate::db::traits::{CellValue, RawResult};

/// Category used in place of NULL, empty and "-" text values
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Round to the fixed report precision of 2 decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `numerator * 100 / denominator`, 0 when either side is missing or the
/// denominator is zero
pub fn rate(numerator: Option<f64>, denominator: Option<f64>) -> f64 {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 && n.is_finite() && d.is_finite() => round2(n * 100.0 / d),
        _ => 0.0,
    }
}

/// Sample standard deviation of `count` values given their sum and sum of
/// squares; `None` below two values
pub fn sample_std_dev(count: Option<f64>, sum: Option<f64>, sum_of_squares: Option<f64>) -> Option<f64> {
    let (n, s, ss) = (count?, sum?, sum_of_squares?);
    if n < 2.0 || ![n, s, ss].iter().all(|v| v.is_finite()) {
        return None;
    }
    // Rounding in the engine can push a near-zero variance below zero
    let variance = ((ss - s * s / n) / (n - 1.0)).max(0.0);
    Some(variance.sqrt())
}

/// Coerce `raw` into the schema declared by `spec`.
///
/// The column count (and every row's width) must match the declared schema.
/// A raw result with neither columns nor rows is accepted as the empty table,
/// since some engines omit descriptors for empty results. Rows are never
/// dropped. Normalizing an already normalized table is a no-op.
pub fn normalize(spec: &QuerySpec, raw: RawResult) -> Result<TabularResult, SchemaMismatchError> {
    let schema = spec.schema();
    let mismatch = |actual: usize, detail: String| SchemaMismatchError {
        query: spec.name().to_string(),
        expected: schema.len(),
        actual,
        detail,
    };

    if raw.columns.is_empty() && raw.rows.is_empty() {
        return Ok(TabularResult::empty(spec.name(), schema.to_vec()));
    }
    if raw.columns.len() != schema.len() {
        return Err(mismatch(
            raw.columns.len(),
            format!("engine returned columns [{}]", raw.columns.join(", ")),
        ));
    }

    let derived = resolve_derived(schema).map_err(|detail| mismatch(raw.columns.len(), detail))?;

    let mut rows = Vec::with_capacity(raw.rows.len());
    for (idx, row) in raw.rows.into_iter().enumerate() {
        if row.len() != schema.len() {
            return Err(mismatch(row.len(), format!("row {} has the wrong width", idx)));
        }
        rows.push(coerce_row(schema, &derived, row));
    }

    TabularResult::new(spec.name(), schema.to_vec(), rows)
}

/// Append a rate column computed from two existing columns of `table`
pub fn derive_rate(
    table: &TabularResult,
    numerator: &str,
    denominator: &str,
    name: &str,
) -> Result<TabularResult, SchemaMismatchError> {
    let missing = |column: &str| SchemaMismatchError {
        query: table.query().to_string(),
        expected: table.columns().len(),
        actual: table.columns().len(),
        detail: format!("column '{}' not found", column),
    };
    let num_idx = table.column_index(numerator).ok_or_else(|| missing(numerator))?;
    let den_idx = table.column_index(denominator).ok_or_else(|| missing(denominator))?;

    let mut columns = table.columns().to_vec();
    columns.push(ColumnDef::new(name, ColumnKind::rate(numerator, denominator)));

    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let mut row = row.clone();
            let value = rate(row[num_idx].as_f64(), row[den_idx].as_f64());
            row.push(CellValue::Float(value));
            row
        })
        .collect();

    TabularResult::new(table.query(), columns, rows)
}

/// A column recomputed from other columns of the same row
enum Derived {
    Rate { numerator: usize, denominator: usize },
    StdDev { count: usize, sum: usize, sum_of_squares: usize },
}

/// Input column indexes for each derived column, `None` for other kinds
fn resolve_derived(schema: &[ColumnDef]) -> Result<Vec<Option<Derived>>, String> {
    let index_of = |name: &str| {
        schema
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| format!("input column '{}' is not declared", name))
    };
    schema
        .iter()
        .map(|column| match &column.kind {
            ColumnKind::Rate { numerator, denominator } => Ok(Some(Derived::Rate {
                numerator: index_of(numerator)?,
                denominator: index_of(denominator)?,
            })),
            ColumnKind::StdDev { count, sum, sum_of_squares } => Ok(Some(Derived::StdDev {
                count: index_of(count)?,
                sum: index_of(sum)?,
                sum_of_squares: index_of(sum_of_squares)?,
            })),
            _ => Ok(None),
        })
        .collect()
}

fn coerce_row(schema: &[ColumnDef], derived: &[Option<Derived>], row: Vec<CellValue>) -> Vec<CellValue> {
    // Derived columns read their inputs after those have been coerced
    let mut cells: Vec<CellValue> = row
        .into_iter()
        .zip(schema)
        .map(|(cell, column)| coerce_cell(&column.kind, cell))
        .collect();

    for (idx, derivation) in derived.iter().enumerate() {
        match derivation {
            Some(Derived::Rate { numerator, denominator }) => {
                cells[idx] = CellValue::Float(rate(cells[*numerator].as_f64(), cells[*denominator].as_f64()));
            }
            Some(Derived::StdDev { count, sum, sum_of_squares }) => {
                cells[idx] = sample_std_dev(
                    cells[*count].as_f64(),
                    cells[*sum].as_f64(),
                    cells[*sum_of_squares].as_f64(),
                )
                .map(CellValue::Float)
                .unwrap_or(CellValue::Null);
            }
            None => {}
        }
    }
    cells
}

fn coerce_cell(kind: &ColumnKind, cell: CellValue) -> CellValue {
    match kind {
        ColumnKind::Text => match cell {
            CellValue::Null => CellValue::Text(UNKNOWN_CATEGORY.to_string()),
            CellValue::Text(s) if s.trim().is_empty() || s.trim() == "-" => {
                CellValue::Text(UNKNOWN_CATEGORY.to_string())
            }
            CellValue::Text(s) => CellValue::Text(s),
            other => CellValue::Text(other.to_string()),
        },
        ColumnKind::Integer => match cell.as_i64() {
            Some(i) => CellValue::Int(i),
            None => cell
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| CellValue::Int(f.round() as i64))
                .unwrap_or(CellValue::Null),
        },
        ColumnKind::Float => cell
            .as_f64()
            .filter(|f| f.is_finite())
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        ColumnKind::Percentage => {
            CellValue::Float(cell.as_f64().filter(|f| f.is_finite()).map(round2).unwrap_or(0.0))
        }
        // Recomputed from the row in `coerce_row`
        ColumnKind::Rate { .. } | ColumnKind::StdDev { .. } => cell,
        ColumnKind::HourOfDay => cell
            .as_i64()
            .filter(|h| (0..24).contains(h))
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
    }
}
