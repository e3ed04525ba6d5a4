use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{QueryError, QueryResult};

/// A single scalar cell. The dataset provider owns typing: a `Text` cell
/// holding "42" is text, not a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Finite numbers only. NaN and infinities count as non-numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(x) if x.is_finite() => Some(*x),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Number(x)
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Value::Number(x as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

pub type Row = Vec<Value>;

/// Immutable, already-typed table handed to the engine for one invocation.
/// Column lookup is case-insensitive.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Row>,
    index: HashMap<String, usize>,
}

impl Dataset {
    /// Builds a dataset, rejecting duplicate column names (compared
    /// case-insensitively) and rows whose width differs from the header.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> QueryResult<Self> {
        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let key = name.trim().to_lowercase();
            if index.insert(key, i).is_some() {
                return Err(QueryError::InvalidDataset(format!(
                    "duplicate column name '{name}'"
                )));
            }
        }

        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(QueryError::InvalidDataset(format!(
                "row {i} has {} values but there are {} columns",
                row.len(),
                columns.len()
            )));
        }

        Ok(Self {
            columns,
            rows,
            index,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `name`, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> QueryResult<usize> {
        self.index
            .get(&name.trim().to_lowercase())
            .copied()
            .ok_or_else(|| QueryError::ColumnNotFound(name.to_string()))
    }

    /// Numeric values of column `idx` over every row, ignoring filters.
    pub fn column_numbers(&self, idx: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|row| row[idx].as_number()).collect()
    }

    /// Whether every cell of column `idx` is null.
    pub fn all_missing(&self, idx: usize) -> bool {
        self.rows.iter().all(|row| row[idx].is_missing())
    }
}
