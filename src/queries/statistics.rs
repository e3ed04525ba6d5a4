use log::debug;

use super::descriptor::{FilterCondition, OperationKind, QueryDescriptor};
use crate::{
    data::{
        bounds::{BoundsResolver, ColumnBounds, ResolvedBounds},
        dataset::{Dataset, Row},
    },
    errors::{QueryError, QueryResult},
};

/// Plain reductions a mechanism may be asked to protect. AVG is composed
/// from a `Sum` and a `Count` over the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Count,
    Sum,
    Min,
    Max,
}

impl Reduction {
    /// The single reduction answering `operation`. `None` for AVG.
    pub fn for_operation(operation: OperationKind) -> Option<Self> {
        match operation {
            OperationKind::Count => Some(Reduction::Count),
            OperationKind::Sum => Some(Reduction::Sum),
            OperationKind::Min => Some(Reduction::Min),
            OperationKind::Max => Some(Reduction::Max),
            OperationKind::Avg => None,
        }
    }
}

/// A reduction over per-row contributions: 1s for counts, clamped column
/// values otherwise.
#[derive(Debug, Clone, Copy)]
pub struct Aggregate<'a> {
    pub reduction: Reduction,
    pub values: &'a [f64],
}

impl Aggregate<'_> {
    /// Plaintext value of the reduction. `None` for MIN/MAX over nothing.
    pub fn true_value(&self) -> Option<f64> {
        match self.reduction {
            Reduction::Count => Some(self.values.len() as f64),
            Reduction::Sum => Some(self.values.iter().sum()),
            Reduction::Min => self.values.iter().copied().reduce(f64::min),
            Reduction::Max => self.values.iter().copied().reduce(f64::max),
        }
    }
}

/// Everything the sensitivity calculator and the mechanisms need about
/// one query, computed over filtered and clamped rows.
#[derive(Debug, Clone)]
pub struct PreparedAggregate {
    pub operation: OperationKind,
    pub column: Option<String>,

    /// `None` for COUNT, which needs no bounds.
    pub bounds: Option<ResolvedBounds>,

    /// Per-row contributions used by every reduction of this query.
    pub values: Vec<f64>,

    /// Rows left after filtering.
    pub rows_matched: usize,
}

impl PreparedAggregate {
    pub fn aggregate(&self, reduction: Reduction) -> Aggregate<'_> {
        Aggregate {
            reduction,
            values: &self.values,
        }
    }

    /// Contributions counted as 1 each; the AVG denominator.
    pub fn count(&self) -> Aggregate<'_> {
        self.aggregate(Reduction::Count)
    }

    pub fn sum(&self) -> Aggregate<'_> {
        self.aggregate(Reduction::Sum)
    }

    /// True statistic for the query's operation. AVG over an empty set is 0.
    pub fn true_value(&self) -> QueryResult<f64> {
        let value = match self.operation {
            OperationKind::Count => self.count().true_value(),
            OperationKind::Sum => self.sum().true_value(),
            OperationKind::Avg => {
                let n = self.values.len();
                let sum: f64 = self.values.iter().sum();
                Some(if n > 0 { sum / n as f64 } else { 0.0 })
            }
            OperationKind::Min => self.aggregate(Reduction::Min).true_value(),
            OperationKind::Max => self.aggregate(Reduction::Max).true_value(),
        };
        value.ok_or_else(|| self.no_numeric_data())
    }

    fn no_numeric_data(&self) -> QueryError {
        QueryError::NoNumericData(self.column.clone().unwrap_or_default())
    }
}

/// Computes true statistics over one immutable dataset.
pub struct StatisticsEngine<'a> {
    dataset: &'a Dataset,
    resolver: &'a BoundsResolver,
}

impl<'a> StatisticsEngine<'a> {
    pub fn new(dataset: &'a Dataset, resolver: &'a BoundsResolver) -> Self {
        Self { dataset, resolver }
    }

    /// Rows matching every filter (logical AND).
    pub fn filter_rows(
        &self,
        filters: &[FilterCondition],
    ) -> QueryResult<Vec<&'a Row>> {
        let resolved = filters
            .iter()
            .map(|f| Ok((self.dataset.column_index(&f.column)?, &f.value)))
            .collect::<QueryResult<Vec<_>>>()?;

        let rows = self
            .dataset
            .rows()
            .iter()
            .filter(|row| {
                resolved.iter().all(|(idx, lit)| lit.matches(&row[*idx]))
            })
            .collect();
        Ok(rows)
    }

    /// Filters, resolves bounds and clamps for `descriptor`.
    pub fn prepare(
        &self,
        descriptor: &QueryDescriptor,
        supplied_bounds: Option<ColumnBounds>,
    ) -> QueryResult<PreparedAggregate> {
        let column_idx = descriptor
            .column
            .as_deref()
            .map(|c| self.dataset.column_index(c))
            .transpose()?;
        let rows = self.filter_rows(&descriptor.filters)?;
        let rows_matched = rows.len();

        let (values, bounds) = match (descriptor.operation, column_idx) {
            (OperationKind::Count, None) => (vec![1.0; rows_matched], None),
            (OperationKind::Count, Some(idx)) => {
                let present =
                    rows.iter().filter(|row| !row[idx].is_missing()).count();
                (vec![1.0; present], None)
            }
            (operation, Some(idx)) => {
                let column = descriptor.column.as_deref().unwrap_or_default();
                let resolved = self.resolver.resolve(
                    column,
                    operation,
                    supplied_bounds,
                    &self.dataset.column_numbers(idx),
                    self.dataset.all_missing(idx),
                )?;
                let clamped = rows
                    .iter()
                    .filter_map(|row| row[idx].as_number())
                    .map(|x| resolved.bounds.clamp(x))
                    .collect();
                (clamped, Some(resolved))
            }
            (operation, None) => {
                return Err(QueryError::MalformedQuery(format!(
                    "{operation} requires a column argument"
                )));
            }
        };

        let prepared = PreparedAggregate {
            operation: descriptor.operation,
            column: descriptor.column.clone(),
            bounds,
            values,
            rows_matched,
        };

        // MIN/MAX have no meaningful value over an empty clamped set.
        let operation = prepared.operation;
        if matches!(operation, OperationKind::Min | OperationKind::Max) {
            prepared.true_value()?;
        }

        debug!(
            "Prepared {} over {} matched rows ({} contributions)",
            prepared.operation,
            rows_matched,
            prepared.values.len()
        );
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::{
        data::{bounds::BoundsSource, dataset::Value},
        queries::{descriptor::Literal, parser::QueryParser},
    };

    fn people() -> Dataset {
        let rows = vec![
            vec![Value::from(25.0), Value::from("paris"), Value::from(1.0)],
            vec![Value::from(40.0), Value::from("rome"), Value::Null],
            vec![Value::from(60.0), Value::from("paris"), Value::from(3.0)],
            vec![Value::Null, Value::from("paris"), Value::from("n/a")],
            vec![Value::from(130.0), Value::from("oslo"), Value::from(5.0)],
        ];
        let columns = vec!["age".into(), "city".into(), "score".into()];
        Dataset::new(columns, rows).unwrap()
    }

    fn prepare(
        query: &str,
        bounds: Option<ColumnBounds>,
    ) -> QueryResult<PreparedAggregate> {
        let dataset = people();
        let resolver = BoundsResolver::default();
        let descriptor = QueryParser::default().parse(query)?;
        StatisticsEngine::new(&dataset, &resolver).prepare(&descriptor, bounds)
    }

    #[test]
    fn test_counts() -> Result<(), QueryError> {
        assert_eq!(prepare("SELECT COUNT(*) FROM t", None)?.true_value()?, 5.0);
        assert_eq!(
            prepare("SELECT COUNT(age) FROM t", None)?.true_value()?,
            4.0
        );
        assert_eq!(
            prepare("SELECT COUNT(*) FROM t WHERE city = 'paris'", None)?
                .true_value()?,
            3.0
        );
        assert_eq!(
            prepare("SELECT COUNT(score) FROM t WHERE city = 'paris'", None)?
                .true_value()?,
            3.0
        );
        Ok(())
    }

    #[test]
    fn test_clamping_with_supplied_bounds() -> Result<(), QueryError> {
        let bounds = Some(ColumnBounds::new(0.0, 100.0));
        let p = prepare("SELECT SUM(age) FROM t", bounds)?;
        assert_eq!(p.values, vec![25.0, 40.0, 60.0, 100.0]);
        assert_eq!(p.true_value()?, 225.0);
        assert!(p.values.iter().all(|v| (0.0..=100.0).contains(v)));

        let p = prepare("SELECT MAX(age) FROM t", bounds)?;
        assert_eq!(p.true_value()?, 100.0);
        Ok(())
    }

    #[test]
    fn test_average_uses_one_value_set() -> Result<(), QueryError> {
        let p = prepare(
            "SELECT AVG(age) FROM t WHERE city = 'paris'",
            Some(ColumnBounds::new(0.0, 100.0)),
        )?;
        assert_eq!(p.rows_matched, 3);
        assert_eq!(p.count().true_value(), Some(2.0));
        assert_eq!(p.sum().true_value(), Some(85.0));
        assert_abs_diff_eq!(p.true_value()?, 42.5);
        Ok(())
    }

    #[test]
    fn test_non_numeric_entries_are_excluded() -> Result<(), QueryError> {
        let p = prepare("SELECT SUM(score) FROM t", None)?;
        assert_eq!(p.values, vec![1.0, 3.0, 5.0]);
        let bounds = p.bounds.unwrap();
        assert_eq!(bounds.source, BoundsSource::Inferred);
        assert_eq!(bounds.bounds, ColumnBounds::new(1.0, 5.0));
        Ok(())
    }

    #[test]
    fn test_filtered_query_keeps_column_bounds() -> Result<(), QueryError> {
        let p = prepare("SELECT SUM(age) FROM t WHERE age = 60", None)?;
        assert_eq!(p.values, vec![60.0]);
        let bounds = p.bounds.unwrap();
        assert_eq!(bounds.source, BoundsSource::Inferred);
        assert_eq!(bounds.bounds, ColumnBounds::new(25.0, 130.0));

        let p = prepare("SELECT AVG(age) FROM t WHERE city = 'lima'", None)?;
        assert!(p.values.is_empty());
        assert_eq!(p.bounds.unwrap().bounds, ColumnBounds::new(25.0, 130.0));
        Ok(())
    }

    #[test]
    fn test_min_max_over_empty_set_fail() {
        let err = prepare(
            "SELECT MIN(age) FROM t WHERE city = 'berlin'",
            Some(ColumnBounds::new(0.0, 100.0)),
        )
        .unwrap_err();
        assert_eq!(err, QueryError::NoNumericData("age".into()));
    }

    #[test]
    fn test_unknown_columns() {
        let err = prepare("SELECT SUM(salary) FROM t", None).unwrap_err();
        assert_eq!(err, QueryError::ColumnNotFound("salary".into()));

        let err = prepare("SELECT COUNT(*) FROM t WHERE town = 'x'", None)
            .unwrap_err();
        assert_eq!(err, QueryError::ColumnNotFound("town".into()));
    }

    #[test]
    fn test_filter_rows_conjunction() -> Result<(), QueryError> {
        let dataset = people();
        let resolver = BoundsResolver::default();
        let engine = StatisticsEngine::new(&dataset, &resolver);
        let rows = engine.filter_rows(&[
            FilterCondition {
                column: "city".into(),
                value: Literal::Text("paris".into()),
            },
            FilterCondition {
                column: "AGE".into(),
                value: Literal::Number(60.0),
            },
        ])?;
        assert_eq!(rows.len(), 1);
        Ok(())
    }
}
