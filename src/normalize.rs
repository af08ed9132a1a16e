//! Flatten per-model raw results into one row per (model, fold).
//!
//! Each model first becomes one wide row whose cells hold whole fold arrays.
//! The wide rows are then exploded in lockstep, so every array in a row must
//! have the same length. Finally each column is coerced to numeric on its
//! own and the outcome is reported per column.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::{EvalError, Result};
use crate::evaluation::RawResultSet;
use crate::metrics::MetricKind;

pub const MODEL_COLUMN: &str = "model";
pub const FOLD_COLUMN: &str = "fold";
pub const FIT_TIME_COLUMN: &str = "fit_time";
pub const SCORE_TIME_COLUMN: &str = "score_time";
pub const TIME_COLUMN: &str = "time_seconds";

/// A single cell before coercion.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Number(f64),
    Missing,
    Text(String),
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Number(v) => v.to_string(),
            Cell::Missing => String::new(),
            Cell::Text(s) => s.clone(),
        }
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(v) => Cell::Number(v),
            None => Cell::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnData {
    /// `None` is a missing value.
    Numeric(Vec<Option<f64>>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn render(&self, row: usize) -> String {
        match self {
            ColumnData::Numeric(v) => v[row].map(|x| x.to_string()).unwrap_or_default(),
            ColumnData::Text(v) => v[row].clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Column-oriented table; all columns have the same length.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match &self.column(name)?.data {
            ColumnData::Numeric(v) => Some(v),
            ColumnData::Text(_) => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&[String]> {
        match &self.column(name)?.data {
            ColumnData::Text(v) => Some(v),
            ColumnData::Numeric(_) => None,
        }
    }

    /// Write as CSV with a header row. Missing values become empty fields.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.column_names())?;
        for row in 0..self.n_rows() {
            wtr.write_record(self.columns.iter().map(|c| c.data.render(row)))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_csv(file)
    }
}

/// Per-column result of numeric coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CoercionOutcome {
    Numeric,
    /// The column was left as text.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnCoercion {
    pub column: String,
    pub outcome: CoercionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedTable {
    pub table: Table,
    pub coercion: Vec<ColumnCoercion>,
}

impl NormalizedTable {
    /// Columns that stayed as text.
    pub fn skipped(&self) -> impl Iterator<Item = &ColumnCoercion> {
        self.coercion
            .iter()
            .filter(|c| matches!(c.outcome, CoercionOutcome::Skipped { .. }))
    }
}

/// One model before explosion: scalar model name plus array-valued cells.
struct WideRow<'a> {
    model: &'a str,
    arrays: Vec<(String, Vec<Cell>)>,
}

fn time_seconds(model: &str, raw: &RawResultSet) -> Result<Vec<f64>> {
    if raw.fit_time.len() != raw.score_time.len() {
        return Err(EvalError::Shape {
            model: model.to_string(),
            column: SCORE_TIME_COLUMN.to_string(),
            expected: raw.fit_time.len(),
            found: raw.score_time.len(),
        });
    }
    Ok(raw
        .fit_time
        .iter()
        .zip(&raw.score_time)
        .map(|(fit, score)| fit + score)
        .collect())
}

fn wide_row<'a>(model: &'a str, raw: &RawResultSet, metrics: &[MetricKind]) -> Result<WideRow<'a>> {
    let total = time_seconds(model, raw)?;
    let numbers = |values: &[f64]| values.iter().map(|&v| Cell::Number(v)).collect::<Vec<_>>();

    let mut arrays = Vec::with_capacity(metrics.len() + 3);
    arrays.push((FIT_TIME_COLUMN.to_string(), numbers(&raw.fit_time)));
    arrays.push((SCORE_TIME_COLUMN.to_string(), numbers(&raw.score_time)));
    for kind in metrics {
        let values = raw.scores.get(kind).ok_or_else(|| {
            EvalError::DimensionMismatch(format!(
                "model '{}' has no '{}' scores; every model must report the same metrics",
                model, kind
            ))
        })?;
        arrays.push((kind.to_string(), values.iter().map(|&v| Cell::from(v)).collect()));
    }
    arrays.push((TIME_COLUMN.to_string(), numbers(&total)));
    Ok(WideRow { model, arrays })
}

fn check_metric_keys(results: &BTreeMap<String, RawResultSet>) -> Result<Vec<MetricKind>> {
    let mut iter = results.iter();
    let Some((_, first)) = iter.next() else {
        return Ok(MetricKind::ALL.to_vec());
    };
    let keys: Vec<MetricKind> = first.scores.keys().copied().collect();
    for (model, raw) in iter {
        let other: Vec<MetricKind> = raw.scores.keys().copied().collect();
        if other != keys {
            return Err(EvalError::DimensionMismatch(format!(
                "model '{}' reports metrics {:?}, expected {:?}",
                model, other, keys
            )));
        }
    }
    Ok(keys)
}

/// Explode every array cell of every wide row in lockstep.
///
/// Every model must have as many folds as the first one.
fn explode(rows: &[WideRow], names: &[String]) -> Result<Vec<Vec<Cell>>> {
    let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];
    let mut n_folds: Option<usize> = None;
    for row in rows {
        let expected = row.arrays.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((column, values)) = row.arrays.iter().find(|(_, v)| v.len() != expected) {
            return Err(EvalError::Shape {
                model: row.model.to_string(),
                column: column.clone(),
                expected,
                found: values.len(),
            });
        }
        match n_folds {
            Some(first) if first != expected => {
                return Err(EvalError::Shape {
                    model: row.model.to_string(),
                    column: FOLD_COLUMN.to_string(),
                    expected: first,
                    found: expected,
                });
            }
            Some(_) => {}
            None => n_folds = Some(expected),
        }
        for fold in 0..expected {
            columns[0].push(Cell::Text(row.model.to_string()));
            columns[1].push(Cell::Number(fold as f64));
            for (i, (_, values)) in row.arrays.iter().enumerate() {
                columns[i + 2].push(values[fold].clone());
            }
        }
    }
    Ok(columns)
}

fn coerce(name: &str, cells: Vec<Cell>) -> (Column, ColumnCoercion) {
    let mut values = Vec::with_capacity(cells.len());
    let mut failure = None;
    for cell in &cells {
        match cell {
            Cell::Number(v) => values.push(Some(*v)),
            Cell::Missing => values.push(None),
            Cell::Text(s) => match s.trim().parse::<f64>() {
                Ok(v) => values.push(Some(v)),
                Err(_) => {
                    failure = Some(format!("value '{}' is not numeric", s));
                    break;
                }
            },
        }
    }

    match failure {
        None => (
            Column {
                name: name.to_string(),
                data: ColumnData::Numeric(values),
            },
            ColumnCoercion {
                column: name.to_string(),
                outcome: CoercionOutcome::Numeric,
            },
        ),
        Some(reason) => (
            Column {
                name: name.to_string(),
                data: ColumnData::Text(cells.iter().map(Cell::render).collect()),
            },
            ColumnCoercion {
                column: name.to_string(),
                outcome: CoercionOutcome::Skipped { reason },
            },
        ),
    }
}

/// Flatten raw results into one row per (model, fold).
///
/// Row count is the sum of fold counts. Undefined metric values stay as
/// missing cells; no fold is dropped. Calling this twice on the same input
/// gives the same table.
pub fn normalize(results: &BTreeMap<String, RawResultSet>) -> Result<NormalizedTable> {
    let metrics = check_metric_keys(results)?;

    let mut names = vec![
        MODEL_COLUMN.to_string(),
        FOLD_COLUMN.to_string(),
        FIT_TIME_COLUMN.to_string(),
        SCORE_TIME_COLUMN.to_string(),
    ];
    names.extend(metrics.iter().map(|k| k.to_string()));
    names.push(TIME_COLUMN.to_string());

    let rows = results
        .iter()
        .map(|(model, raw)| wide_row(model, raw, &metrics))
        .collect::<Result<Vec<_>>>()?;
    let cells = explode(&rows, &names)?;

    let (columns, coercion): (Vec<Column>, Vec<ColumnCoercion>) = names
        .iter()
        .zip(cells)
        .map(|(name, column)| coerce(name, column))
        .unzip();

    let table = Table { columns };
    log::debug!(
        "Normalized {} models into {} rows x {} columns",
        results.len(),
        table.n_rows(),
        table.columns.len()
    );
    Ok(NormalizedTable { table, coercion })
}
