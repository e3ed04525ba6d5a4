pub mod encrypted;
pub mod laplace;
pub mod paillier;
pub mod traits;

use serde::{Deserialize, Serialize};

use self::{
    encrypted::{EncryptedAggregation, ENCRYPTED_MECHANISM_NAME},
    laplace::{LaplaceMechanism, LAPLACE_MECHANISM_NAME},
    traits::{MechanismOutcome, PrivacyMechanism},
};
use crate::{
    errors::{QueryError, QueryResult},
    queries::{descriptor::OperationKind, statistics::Aggregate},
};

/// Privacy technology requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MechanismKind {
    #[default]
    #[serde(rename = "dp")]
    Dp,
    #[serde(rename = "he")]
    He,
}

impl MechanismKind {
    /// Name reported in envelopes and errors.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            MechanismKind::Dp => LAPLACE_MECHANISM_NAME,
            MechanismKind::He => ENCRYPTED_MECHANISM_NAME,
        }
    }

    /// Whether queries of `operation` can be answered at all. Division
    /// and order comparisons are not available on ciphertexts.
    pub fn supports(&self, operation: OperationKind) -> bool {
        match self {
            MechanismKind::Dp => true,
            MechanismKind::He => {
                matches!(operation, OperationKind::Count | OperationKind::Sum)
            }
        }
    }

    /// Fails with `UnsupportedOperationForMechanism` unless supported.
    pub fn check_supports(&self, operation: OperationKind) -> QueryResult<()> {
        if self.supports(operation) {
            return Ok(());
        }
        Err(QueryError::UnsupportedOperationForMechanism {
            operation,
            mechanism: self.mechanism_name(),
        })
    }
}

/// The mechanisms one query can run under.
pub enum Mechanism<'k> {
    Laplace(LaplaceMechanism),
    Encrypted(EncryptedAggregation<'k>),
}

impl PrivacyMechanism for Mechanism<'_> {
    fn name(&self) -> &'static str {
        match self {
            Mechanism::Laplace(m) => m.name(),
            Mechanism::Encrypted(m) => m.name(),
        }
    }

    fn is_differentially_private(&self) -> bool {
        match self {
            Mechanism::Laplace(m) => m.is_differentially_private(),
            Mechanism::Encrypted(m) => m.is_differentially_private(),
        }
    }

    fn protect(
        &mut self,
        aggregate: &Aggregate<'_>,
        sensitivity: f64,
        epsilon: f64,
    ) -> QueryResult<MechanismOutcome> {
        match self {
            Mechanism::Laplace(m) => m.protect(aggregate, sensitivity, epsilon),
            Mechanism::Encrypted(m) => {
                m.protect(aggregate, sensitivity, epsilon)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization() {
        let kind: MechanismKind = serde_json::from_str("\"he\"").unwrap();
        assert_eq!(kind, MechanismKind::He);
        let dp = serde_json::to_string(&MechanismKind::Dp).unwrap();
        assert_eq!(dp, "\"dp\"");
        assert!(serde_json::from_str::<MechanismKind>("\"smpc\"").is_err());
        assert_eq!(MechanismKind::default(), MechanismKind::Dp);
    }

    #[test]
    fn test_dispatch() {
        let laplace = Mechanism::Laplace(LaplaceMechanism::from_entropy());
        assert_eq!(laplace.name(), "laplace");
        assert!(laplace.is_differentially_private());
    }

    #[test]
    fn test_supported_operations() {
        let all = [
            OperationKind::Count,
            OperationKind::Sum,
            OperationKind::Avg,
            OperationKind::Min,
            OperationKind::Max,
        ];
        assert!(all.iter().all(|op| MechanismKind::Dp.supports(*op)));
        assert!(MechanismKind::He.supports(OperationKind::Count));
        assert!(MechanismKind::He.supports(OperationKind::Sum));
        for op in [OperationKind::Avg, OperationKind::Min, OperationKind::Max] {
            assert_eq!(
                MechanismKind::He.check_supports(op),
                Err(QueryError::UnsupportedOperationForMechanism {
                    operation: op,
                    mechanism: "homomorphic_encryption",
                })
            );
        }
    }
}
