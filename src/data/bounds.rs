use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{QueryError, QueryResult},
    queries::descriptor::OperationKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ColumnBounds {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.max(self.lower).min(self.upper)
    }

    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn as_pair(&self) -> [f64; 2] {
        [self.lower, self.upper]
    }
}

/// Where a column's bounds came from, reported in result metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundsSource {
    Supplied,
    Inferred,
    Default,
}

impl BoundsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundsSource::Supplied => "supplied",
            BoundsSource::Inferred => "inferred",
            BoundsSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedBounds {
    pub bounds: ColumnBounds,
    pub source: BoundsSource,
}

/// Picks the effective bounds of one column for one query.
#[derive(Debug, Clone)]
pub struct BoundsResolver {
    /// Used for SUM/AVG when the column holds values but none numeric.
    pub fallback: ColumnBounds,
}

impl Default for BoundsResolver {
    fn default() -> Self {
        Self {
            fallback: ColumnBounds::new(0.0, 100.0),
        }
    }
}

impl BoundsResolver {
    pub fn new(fallback: ColumnBounds) -> Self {
        Self { fallback }
    }

    /// Resolves bounds for `column`.
    ///
    /// `column_values` holds the numeric values of the column over the
    /// whole dataset, never just the rows a filter kept.
    /// `all_missing` says whether every cell of the column is null.
    pub fn resolve(
        &self,
        column: &str,
        operation: OperationKind,
        supplied: Option<ColumnBounds>,
        column_values: &[f64],
        all_missing: bool,
    ) -> QueryResult<ResolvedBounds> {
        if let Some(bounds) = supplied {
            validate(column, &bounds)?;
            return Ok(ResolvedBounds {
                bounds,
                source: BoundsSource::Supplied,
            });
        }

        let min = column_values.iter().copied().reduce(f64::min);
        let max = column_values.iter().copied().reduce(f64::max);
        let resolved = match (min, max) {
            (Some(lower), Some(upper)) => ResolvedBounds {
                bounds: ColumnBounds::new(lower, upper),
                source: BoundsSource::Inferred,
            },
            _ if all_missing => {
                return Err(QueryError::NoNumericData(column.to_string()));
            }
            _ => match operation {
                OperationKind::Min | OperationKind::Max => {
                    return Err(QueryError::NoNumericData(column.to_string()));
                }
                _ => ResolvedBounds {
                    bounds: self.fallback,
                    source: BoundsSource::Default,
                },
            },
        };
        debug!("Resolved bounds for column {column}: {resolved:?}");
        Ok(resolved)
    }
}

fn validate(column: &str, bounds: &ColumnBounds) -> QueryResult<()> {
    let finite = bounds.lower.is_finite() && bounds.upper.is_finite();
    if !finite || bounds.lower > bounds.upper {
        return Err(QueryError::InvalidBounds {
            column: column.to_string(),
            lower: bounds.lower,
            upper: bounds.upper,
        });
    }
    Ok(())
}
