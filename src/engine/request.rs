use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    data::{bounds::ColumnBounds, dataset::Row},
    errors::{QueryError, QueryResult},
    mechanisms::MechanismKind,
};

/// One query invocation as submitted by the caller.
///
/// ```json
/// {
///   "query": "SELECT AVG(age) FROM people WHERE city = 'paris'",
///   "data": [[25, "paris"], [40, "rome"]],
///   "columns": ["age", "city"],
///   "epsilon": 1.0,
///   "bounds": {"age": [0, 100]},
///   "mechanism": "dp"
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub data: Vec<Row>,

    #[serde(default)]
    pub columns: Vec<String>,

    /// Falls back to the configured default of the chosen mechanism.
    #[serde(default)]
    pub epsilon: Option<f64>,

    #[serde(default)]
    pub delta: Option<f64>,

    /// Caller-supplied `[lower, upper]` per column.
    #[serde(default)]
    pub bounds: BTreeMap<String, [f64; 2]>,

    #[serde(default)]
    pub mechanism: MechanismKind,
}

impl QueryRequest {
    pub fn from_json(input: &str) -> QueryResult<Self> {
        serde_json::from_str(input).map_err(|e| {
            QueryError::MalformedQuery(format!("invalid request: {e}"))
        })
    }

    /// Lower-cases bounds keys so they match normalized column names.
    /// Idempotent; the engine runs it on every request it executes.
    pub fn normalize_bounds(&mut self) -> QueryResult<()> {
        let mut normalized = BTreeMap::new();
        for (column, pair) in std::mem::take(&mut self.bounds) {
            let key = column.to_lowercase();
            if normalized.insert(key.clone(), pair).is_some() {
                return Err(QueryError::MalformedQuery(format!(
                    "bounds given more than once for column '{key}'"
                )));
            }
        }
        self.bounds = normalized;
        Ok(())
    }

    /// Bounds for `column`, which is already lower-cased.
    pub fn bounds_for(&self, column: &str) -> Option<ColumnBounds> {
        self.bounds
            .get(column)
            .map(|&[lower, upper]| ColumnBounds::new(lower, upper))
    }

    /// Rejects requests with nothing to run.
    pub fn check_inputs(&self) -> QueryResult<()> {
        if self.query.trim().is_empty() {
            return Err(QueryError::MissingInput("No query provided"));
        }
        if self.data.is_empty() {
            return Err(QueryError::MissingInput("No data provided"));
        }
        Ok(())
    }
}
