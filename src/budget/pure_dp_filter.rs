use anyhow::{bail, Result};
use log::debug;
use serde::Serialize;

use super::traits::{Budget, Filter, FilterStatus};

/// Relative slack absorbing float rounding when shares are summed back.
const CAPACITY_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PureDPBudget {
    pub epsilon: f64,
}

impl Budget for PureDPBudget {
    fn zero() -> Self {
        Self { epsilon: 0.0 }
    }
}

impl From<f64> for PureDPBudget {
    fn from(epsilon: f64) -> Self {
        Self { epsilon }
    }
}

/// Pure DP filter scoped to a single query invocation: sub-computations
/// draw from it and together can never exceed its capacity.
#[derive(Debug, Serialize)]
pub struct PureDPBudgetFilter {
    pub consumed: f64,
    pub capacity: PureDPBudget,
}

impl PureDPBudgetFilter {
    fn fits(&self, requested: f64) -> bool {
        let limit = self.capacity.epsilon * (1.0 + CAPACITY_TOLERANCE);
        self.consumed + requested <= limit
    }
}

impl Filter<PureDPBudget> for PureDPBudgetFilter {
    type Error = anyhow::Error;

    fn new(capacity: PureDPBudget) -> Result<Self, Self::Error> {
        if !(capacity.epsilon.is_finite() && capacity.epsilon > 0.0) {
            bail!("filter capacity must be positive, got {}", capacity.epsilon);
        }
        Ok(Self {
            consumed: 0.0,
            capacity,
        })
    }

    fn can_consume(
        &self,
        budget: &PureDPBudget,
    ) -> Result<FilterStatus, Self::Error> {
        if budget.epsilon < 0.0 {
            bail!("cannot consume a negative budget {}", budget.epsilon);
        }
        Ok(match self.fits(budget.epsilon) {
            true => FilterStatus::Continue,
            false => FilterStatus::OutOfBudget,
        })
    }

    fn try_consume(
        &mut self,
        budget: &PureDPBudget,
    ) -> Result<FilterStatus, Self::Error> {
        debug!(
            "Charging epsilon {} against {} of {} consumed",
            budget.epsilon, self.consumed, self.capacity.epsilon
        );
        let status = self.can_consume(budget)?;
        if status == FilterStatus::Continue {
            self.consumed += budget.epsilon;
        }
        Ok(status)
    }

    fn remaining_budget(&self) -> Result<PureDPBudget, Self::Error> {
        let remaining = self.capacity.epsilon - self.consumed;
        Ok(if remaining > 0.0 {
            PureDPBudget::from(remaining)
        } else {
            PureDPBudget::zero()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_dp_budget_filter() -> Result<(), anyhow::Error> {
        let mut filter = PureDPBudgetFilter::new(PureDPBudget::from(1.0))?;
        assert_eq!(
            filter.try_consume(&PureDPBudget::from(0.5))?,
            FilterStatus::Continue
        );
        assert_eq!(
            filter.try_consume(&PureDPBudget::from(0.6))?,
            FilterStatus::OutOfBudget
        );
        assert_eq!(filter.remaining_budget()?, PureDPBudget::from(0.5));
        assert_eq!(
            filter.try_consume(&PureDPBudget::from(0.5))?,
            FilterStatus::Continue
        );
        assert_eq!(filter.remaining_budget()?, PureDPBudget::from(0.0));
        Ok(())
    }

    #[test]
    fn test_invalid_capacity_and_requests() {
        assert!(PureDPBudgetFilter::new(PureDPBudget::from(0.0)).is_err());
        assert!(PureDPBudgetFilter::new(PureDPBudget::from(f64::NAN)).is_err());
        let filter = PureDPBudgetFilter::new(PureDPBudget::from(1.0)).unwrap();
        assert!(filter.can_consume(&PureDPBudget::from(-0.1)).is_err());
    }
}
