use serde::Serialize;

use crate::{errors::QueryResult, queries::statistics::Aggregate};

/// What a mechanism releases for one reduction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MechanismOutcome {
    /// Released value, before any operation-specific rounding.
    pub protected_value: f64,
    pub mechanism_name: &'static str,

    /// Laplace scale `b`, or `None` when no noise is added.
    pub noise_scale: Option<f64>,
    pub consumed_epsilon: f64,
    pub consumed_delta: f64,

    /// The noise draw itself, kept for diagnostics.
    pub noise_added: Option<f64>,
}

/// Capability shared by every privacy technology: turn a reduction over
/// private contributions into a releasable value.
pub trait PrivacyMechanism {
    fn name(&self) -> &'static str;

    /// Whether the released value satisfies differential privacy.
    fn is_differentially_private(&self) -> bool;

    fn protect(
        &mut self,
        aggregate: &Aggregate<'_>,
        sensitivity: f64,
        epsilon: f64,
    ) -> QueryResult<MechanismOutcome>;
}
