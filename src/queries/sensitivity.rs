//! Row-level sensitivities: the largest change in a statistic caused by
//! adding or removing a single row. These are worst-case bounds derived
//! from the clamping range only. They do not bound how many rows one
//! individual contributes, so the guarantee is per row, not per person.

use serde::Serialize;

use super::{descriptor::OperationKind, statistics::Reduction};
use crate::data::bounds::ColumnBounds;

/// Sensitivities of one query. AVG carries one per composed reduction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Sensitivity {
    Single(f64),
    Average { sum: f64, count: f64 },
}

pub fn reduction_sensitivity(
    reduction: Reduction,
    bounds: Option<&ColumnBounds>,
) -> f64 {
    match reduction {
        Reduction::Count => 1.0,
        Reduction::Sum | Reduction::Min | Reduction::Max => {
            bounds.map(ColumnBounds::range).unwrap_or(0.0)
        }
    }
}

pub fn sensitivity(
    operation: OperationKind,
    bounds: Option<&ColumnBounds>,
) -> Sensitivity {
    match operation {
        OperationKind::Count => {
            Sensitivity::Single(reduction_sensitivity(Reduction::Count, bounds))
        }
        OperationKind::Sum => {
            Sensitivity::Single(reduction_sensitivity(Reduction::Sum, bounds))
        }
        OperationKind::Min => {
            Sensitivity::Single(reduction_sensitivity(Reduction::Min, bounds))
        }
        OperationKind::Max => {
            Sensitivity::Single(reduction_sensitivity(Reduction::Max, bounds))
        }
        OperationKind::Avg => Sensitivity::Average {
            sum: reduction_sensitivity(Reduction::Sum, bounds),
            count: reduction_sensitivity(Reduction::Count, bounds),
        },
    }
}
