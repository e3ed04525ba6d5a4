use log::debug;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::{
    paillier::Decryptor,
    traits::{MechanismOutcome, PrivacyMechanism},
};
use crate::{
    errors::{QueryError, QueryResult},
    queries::{
        descriptor::OperationKind,
        statistics::{Aggregate, Reduction},
    },
};

pub const ENCRYPTED_MECHANISM_NAME: &str = "homomorphic_encryption";
pub const ENCRYPTION_SCHEME: &str = "paillier";

/// Sums contributions entirely in ciphertext space. Only the final sum is
/// decrypted, by the key manager. No noise is added, so the result is
/// exact and carries no differential-privacy guarantee.
pub struct EncryptedAggregation<'k, R: Rng = ChaCha20Rng> {
    keys: &'k dyn Decryptor,

    /// Fixed-point factor applied to each contribution before encoding.
    fixed_point_scale: u64,
    rng: R,
}

impl<'k> EncryptedAggregation<'k, ChaCha20Rng> {
    pub fn new(keys: &'k dyn Decryptor, fixed_point_scale: u64) -> Self {
        Self::with_rng(keys, fixed_point_scale, ChaCha20Rng::from_entropy())
    }
}

impl<'k, R: Rng> EncryptedAggregation<'k, R> {
    pub fn with_rng(
        keys: &'k dyn Decryptor,
        fixed_point_scale: u64,
        rng: R,
    ) -> Self {
        Self {
            keys,
            fixed_point_scale: fixed_point_scale.max(1),
            rng,
        }
    }

    pub fn key_bits(&self) -> u64 {
        self.keys.public_context().key_bits()
    }

    fn encode(&self, value: f64) -> QueryResult<BigInt> {
        let scaled = (value * self.fixed_point_scale as f64).round();
        BigInt::from_f64(scaled).ok_or_else(|| {
            QueryError::Encryption(format!("cannot encode value {value}"))
        })
    }

    /// Encrypts every contribution and folds them with ciphertext addition.
    fn encrypted_sum(&mut self, values: &[f64]) -> QueryResult<f64> {
        let ctx = self.keys.public_context();
        let mut acc = ctx.zero();
        for &value in values {
            let plaintext = ctx.encode_signed(&self.encode(value)?)?;
            let ciphertext = ctx.encrypt(&plaintext, &mut self.rng)?;
            acc = ctx.add(&acc, &ciphertext);
        }

        let residue = self.keys.decrypt(&acc)?;
        let total = ctx.decode_signed(&residue);
        let total = total.to_f64().ok_or_else(|| {
            QueryError::Internal(
                "decrypted sum does not fit in f64".to_string(),
            )
        })?;
        Ok(total / self.fixed_point_scale as f64)
    }
}

impl<R: Rng> PrivacyMechanism for EncryptedAggregation<'_, R> {
    fn name(&self) -> &'static str {
        ENCRYPTED_MECHANISM_NAME
    }

    fn is_differentially_private(&self) -> bool {
        false
    }

    fn protect(
        &mut self,
        aggregate: &Aggregate<'_>,
        _sensitivity: f64,
        _epsilon: f64,
    ) -> QueryResult<MechanismOutcome> {
        let protected_value = match aggregate.reduction {
            // Counts encrypt a vector of ones.
            Reduction::Count => {
                let ones = vec![1.0; aggregate.values.len()];
                self.encrypted_sum(&ones)?
            }
            Reduction::Sum => self.encrypted_sum(aggregate.values)?,
            Reduction::Min | Reduction::Max => {
                let operation = match aggregate.reduction {
                    Reduction::Min => OperationKind::Min,
                    _ => OperationKind::Max,
                };
                return Err(QueryError::UnsupportedOperationForMechanism {
                    operation,
                    mechanism: ENCRYPTED_MECHANISM_NAME,
                });
            }
        };
        debug!(
            "Encrypted {:?} over {} records",
            aggregate.reduction,
            aggregate.values.len()
        );

        Ok(MechanismOutcome {
            protected_value,
            mechanism_name: ENCRYPTED_MECHANISM_NAME,
            noise_scale: None,
            consumed_epsilon: 0.0,
            consumed_delta: 0.0,
            noise_added: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::paillier::PaillierKeyManager;

    fn keys() -> PaillierKeyManager {
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        PaillierKeyManager::generate(256, 16, &mut rng).unwrap()
    }

    fn mechanism(keys: &PaillierKeyManager) -> EncryptedAggregation<'_> {
        EncryptedAggregation::with_rng(keys, 100, ChaCha20Rng::seed_from_u64(4))
    }

    #[test]
    fn test_exact_sum_and_count() -> Result<(), QueryError> {
        let keys = keys();
        let mut he = mechanism(&keys);
        let values = [25.0, 40.5, -60.25, 0.0];

        let sum = he.protect(
            &Aggregate {
                reduction: Reduction::Sum,
                values: &values,
            },
            100.0,
            1.0,
        )?;
        assert_eq!(sum.protected_value, 5.25);
        assert_eq!(sum.consumed_epsilon, 0.0);
        assert_eq!(sum.consumed_delta, 0.0);
        assert_eq!(sum.noise_scale, None);

        let count = he.protect(
            &Aggregate {
                reduction: Reduction::Count,
                values: &values,
            },
            1.0,
            1.0,
        )?;
        assert_eq!(count.protected_value, 4.0);
        Ok(())
    }

    #[test]
    fn test_empty_sum_is_zero() -> Result<(), QueryError> {
        let keys = keys();
        let outcome = mechanism(&keys).protect(
            &Aggregate {
                reduction: Reduction::Sum,
                values: &[],
            },
            0.0,
            1.0,
        )?;
        assert_eq!(outcome.protected_value, 0.0);
        Ok(())
    }

    #[test]
    fn test_order_statistics_are_unsupported() {
        let keys = keys();
        assert!(!mechanism(&keys).is_differentially_private());

        let err = mechanism(&keys)
            .protect(
                &Aggregate {
                    reduction: Reduction::Max,
                    values: &[1.0],
                },
                1.0,
                1.0,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::UnsupportedOperationForMechanism {
                operation: OperationKind::Max,
                ..
            }
        ));
    }
}
