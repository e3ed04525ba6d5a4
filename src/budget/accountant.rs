use log::debug;
use serde::{Deserialize, Serialize};

use super::{
    pure_dp_filter::{PureDPBudget, PureDPBudgetFilter},
    traits::{Filter, FilterStatus},
};
use crate::errors::{QueryError, QueryResult};

/// Total budget granted to one query invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrivacyParameters {
    pub epsilon: f64,
    pub delta: f64,
}

impl PrivacyParameters {
    /// Validates epsilon > 0 and delta >= 0, both finite.
    pub fn new(epsilon: f64, delta: f64) -> QueryResult<Self> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(QueryError::InvalidBudget(format!(
                "epsilon must be a positive number, got {epsilon}"
            )));
        }
        if !(delta.is_finite() && delta >= 0.0) {
            return Err(QueryError::InvalidBudget(format!(
                "delta must be a non-negative number, got {delta}"
            )));
        }
        Ok(Self { epsilon, delta })
    }
}

/// Epsilon shares of the two halves of an AVG query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AverageSplit {
    pub sum: f64,
    pub count: f64,
}

/// Per-invocation accountant. Sub-computations are charged against a
/// filter whose capacity is the invocation's epsilon, so the shares can
/// never add up to more than the total (sequential composition).
#[derive(Debug)]
pub struct BudgetAccountant {
    params: PrivacyParameters,
    filter: PureDPBudgetFilter,
}

impl BudgetAccountant {
    pub fn new(params: PrivacyParameters) -> QueryResult<Self> {
        let filter = PureDPBudgetFilter::new(PureDPBudget::from(params.epsilon))
            .map_err(|e| QueryError::InvalidBudget(e.to_string()))?;
        Ok(Self { params, filter })
    }

    /// Even split of the total epsilon between the sum and the count.
    pub fn average_split(&self) -> AverageSplit {
        let half = self.params.epsilon / 2.0;
        AverageSplit {
            sum: half,
            count: half,
        }
    }

    /// Charges `epsilon` for one sub-computation and returns it.
    pub fn charge(&mut self, epsilon: f64) -> QueryResult<f64> {
        let status = self
            .filter
            .try_consume(&PureDPBudget::from(epsilon))
            .map_err(|e| QueryError::Internal(e.to_string()))?;
        match status {
            FilterStatus::Continue => {
                debug!(
                    "Charged epsilon {epsilon}, {} remaining of {}",
                    self.remaining_epsilon()?,
                    self.params.epsilon
                );
                Ok(epsilon)
            }
            FilterStatus::OutOfBudget => Err(QueryError::Internal(format!(
                "sub-computation needs epsilon {epsilon} but only {} of {} \
                 remains",
                self.remaining_epsilon()?,
                self.params.epsilon
            ))),
        }
    }

    /// Epsilon consumed so far in this invocation.
    pub fn consumed_epsilon(&self) -> f64 {
        self.filter.consumed
    }

    /// Epsilon still available, never negative.
    pub fn remaining_epsilon(&self) -> QueryResult<f64> {
        let remaining = self
            .filter
            .remaining_budget()
            .map_err(|e| QueryError::Internal(e.to_string()))?;
        Ok(remaining.epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_validation() {
        assert!(PrivacyParameters::new(1.0, 1e-5).is_ok());
        assert!(PrivacyParameters::new(0.5, 0.0).is_ok());
        let cases = [(0.0, 0.0), (-1.0, 0.0), (f64::NAN, 0.0), (1.0, -1e-5)];
        for (eps, delta) in cases {
            assert!(matches!(
                PrivacyParameters::new(eps, delta),
                Err(QueryError::InvalidBudget(_))
            ));
        }
    }

    #[test]
    fn test_average_split_sums_back_to_total() -> Result<(), QueryError> {
        let params = PrivacyParameters::new(0.3, 1e-5)?;
        let mut accountant = BudgetAccountant::new(params)?;
        let split = accountant.average_split();
        assert_eq!(split.sum, 0.15);
        assert_eq!(split.count, 0.15);

        accountant.charge(split.sum)?;
        assert_eq!(accountant.remaining_epsilon()?, 0.15);
        accountant.charge(split.count)?;
        assert_eq!(accountant.consumed_epsilon(), 0.3);
        assert_eq!(accountant.remaining_epsilon()?, 0.0);

        // Nothing left for a third sub-computation.
        assert!(matches!(
            accountant.charge(0.01),
            Err(QueryError::Internal(_))
        ));
        Ok(())
    }
}
