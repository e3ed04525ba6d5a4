//! Laplace mechanism for (ε, 0)-differential privacy.
//!
//! For a statistic f with sensitivity Δ, releases f(D) + Lap(0, Δ/ε).
//! Samples are drawn with the inverse CDF: for u uniform in (-0.5, 0.5),
//! `-b * sign(u) * ln(1 - 2|u|)` follows Laplace(0, b).

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::traits::{MechanismOutcome, PrivacyMechanism};
use crate::{
    data::bounds::ColumnBounds,
    errors::{QueryError, QueryResult},
    queries::{descriptor::OperationKind, statistics::Aggregate},
};

pub const LAPLACE_MECHANISM_NAME: &str = "laplace";

pub struct LaplaceMechanism<R: Rng = ChaCha20Rng> {
    rng: R,
}

impl LaplaceMechanism<ChaCha20Rng> {
    /// Fresh generator per invocation so noise draws are never reused.
    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha20Rng::from_entropy(),
        }
    }
}

impl<R: Rng> LaplaceMechanism<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// One draw from Laplace(0, scale).
    pub fn sample(&mut self, scale: f64) -> f64 {
        // gen() is in [0, 1), so u can hit -0.5 exactly; ln(0) is not finite.
        let u = loop {
            let u: f64 = self.rng.gen::<f64>() - 0.5;
            if u.abs() < 0.5 {
                break u;
            }
        };
        -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
    }
}

impl<R: Rng> PrivacyMechanism for LaplaceMechanism<R> {
    fn name(&self) -> &'static str {
        LAPLACE_MECHANISM_NAME
    }

    fn is_differentially_private(&self) -> bool {
        true
    }

    fn protect(
        &mut self,
        aggregate: &Aggregate<'_>,
        sensitivity: f64,
        epsilon: f64,
    ) -> QueryResult<MechanismOutcome> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(QueryError::InvalidBudget(format!(
                "epsilon must be a positive number, got {epsilon}"
            )));
        }
        if !(sensitivity.is_finite() && sensitivity >= 0.0) {
            return Err(QueryError::Internal(format!(
                "invalid sensitivity {sensitivity}"
            )));
        }
        let true_value = aggregate.true_value().ok_or_else(|| {
            QueryError::Internal(format!(
                "{:?} over an empty set has no value",
                aggregate.reduction
            ))
        })?;

        let scale = sensitivity / epsilon;
        let noise = if scale > 0.0 { self.sample(scale) } else { 0.0 };
        debug!(
            "Laplace: {:?} with sensitivity {sensitivity}, \
             epsilon {epsilon}, scale {scale}",
            aggregate.reduction
        );

        Ok(MechanismOutcome {
            protected_value: true_value + noise,
            mechanism_name: LAPLACE_MECHANISM_NAME,
            noise_scale: Some(scale),
            consumed_epsilon: epsilon,
            consumed_delta: 0.0,
            noise_added: Some(noise),
        })
    }
}

/// Rounds `x` to `digits` decimal places.
pub fn round_to(x: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (x * factor).round() / factor
}

/// Post-processing of a noisy value before release. Counts become
/// non-negative integers; MIN/MAX are pulled back into the column bounds;
/// everything else is rounded to `precision` digits.
pub fn finalize(
    operation: OperationKind,
    noisy: f64,
    bounds: Option<&ColumnBounds>,
    precision: u32,
) -> f64 {
    match operation {
        OperationKind::Count => noisy.round().max(0.0),
        OperationKind::Min | OperationKind::Max => {
            let clamped = bounds.map(|b| b.clamp(noisy)).unwrap_or(noisy);
            round_to(clamped, precision)
        }
        OperationKind::Sum | OperationKind::Avg => round_to(noisy, precision),
    }
}
