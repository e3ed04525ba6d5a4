use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    time::Instant,
};

use log::{debug, error, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde_json::json;

use super::{
    config::EngineConfig,
    request::QueryRequest,
    result::{AggregateResult, Metadata, QueryResponse},
};
use crate::{
    budget::accountant::{BudgetAccountant, PrivacyParameters},
    data::{bounds::ColumnBounds, dataset::Dataset},
    errors::{QueryError, QueryResult},
    mechanisms::{
        encrypted::{EncryptedAggregation, ENCRYPTION_SCHEME},
        laplace::{finalize, round_to, LaplaceMechanism},
        paillier::PaillierKeyManager,
        traits::PrivacyMechanism,
        Mechanism, MechanismKind,
    },
    queries::{
        descriptor::{OperationKind, QueryDescriptor},
        parser::QueryParser,
        sensitivity::{reduction_sensitivity, sensitivity, Sensitivity},
        statistics::{PreparedAggregate, Reduction, StatisticsEngine},
    },
};

/// Rounding applied to diagnostic values in metadata.
const METADATA_PRECISION: u32 = 2;

/// Runs single aggregate queries under the requested privacy mechanism.
/// Holds configuration only: every invocation builds its own dataset view,
/// budget, generator and keys.
#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes one request. `started` is the caller's start timestamp,
    /// used for `execution_time_ms`. Never panics: failures of any kind
    /// come back as a failure envelope.
    pub fn execute(
        &self,
        request: QueryRequest,
        started: Instant,
    ) -> QueryResponse {
        let outcome =
            catch_unwind(AssertUnwindSafe(|| self.run(request, started)));
        match outcome {
            Ok(Ok(result)) => {
                info!(
                    "Query released under {} in {} ms",
                    result.mechanism, result.execution_time_ms
                );
                QueryResponse::Success(result)
            }
            Ok(Err(err)) => {
                warn!("Query failed: {err}");
                QueryResponse::Failure(err.into())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Query panicked: {message}");
                QueryResponse::Failure(QueryError::Internal(message).into())
            }
        }
    }

    /// Parses `input` as a JSON request and executes it.
    pub fn execute_json(&self, input: &str, started: Instant) -> QueryResponse {
        match QueryRequest::from_json(input) {
            Ok(request) => self.execute(request, started),
            Err(err) => {
                warn!("Rejected request: {err}");
                QueryResponse::Failure(err.into())
            }
        }
    }

    fn run(
        &self,
        mut request: QueryRequest,
        started: Instant,
    ) -> QueryResult<AggregateResult> {
        request.check_inputs()?;
        request.normalize_bounds()?;

        let descriptor =
            QueryParser::new(self.config.strict_filters).parse(&request.query)?;
        let supplied = descriptor
            .column
            .as_deref()
            .and_then(|c| request.bounds_for(c));
        let QueryRequest {
            data,
            columns,
            epsilon,
            delta,
            mechanism,
            ..
        } = request;
        debug!(
            "Parsed {} over {:?} with {} filters, mechanism {mechanism:?}",
            descriptor.operation,
            descriptor.column,
            descriptor.filters.len()
        );

        // Before any key generation.
        mechanism.check_supports(descriptor.operation)?;

        let epsilon =
            epsilon.unwrap_or(self.config.default_epsilon(mechanism));
        let delta = delta.unwrap_or(self.config.default_delta);
        let dataset = Dataset::new(columns, data)?;
        let resolver = self.config.bounds_resolver();
        let prepared = StatisticsEngine::new(&dataset, &resolver)
            .prepare(&descriptor, supplied)?;

        let result = match mechanism {
            MechanismKind::Dp => {
                let params = PrivacyParameters::new(epsilon, delta)?;
                let laplace =
                    Mechanism::Laplace(LaplaceMechanism::from_entropy());
                self.release_dp(
                    laplace,
                    &descriptor,
                    &prepared,
                    params,
                    started,
                )?
            }
            MechanismKind::He => {
                debug!("Encryption does not consume epsilon {epsilon}");
                self.release_encrypted(&descriptor, &prepared, started)?
            }
        };

        if !result.value().is_some_and(f64::is_finite) {
            return Err(QueryError::Internal(
                "released value is not a finite number".to_string(),
            ));
        }
        Ok(result)
    }

    /// Laplace release. AVG runs two noisy reductions under sequential
    /// composition; everything else runs one.
    pub fn release_dp(
        &self,
        mut mechanism: Mechanism<'_>,
        descriptor: &QueryDescriptor,
        prepared: &PreparedAggregate,
        params: PrivacyParameters,
        started: Instant,
    ) -> QueryResult<AggregateResult> {
        let mut accountant = BudgetAccountant::new(params)?;
        let bounds = prepared.bounds.map(|r| r.bounds);
        let operation = prepared.operation;
        let precision = self.config.result_precision;

        let metadata = Metadata::new()
            .with("operation", operation.as_str())
            .with("column", prepared.column.clone())
            .with("bounds", bounds.map(|b| b.as_pair().to_vec()))
            .with("bounds_source", prepared.bounds.map(|r| r.source.as_str()))
            .with("filters_applied", descriptor.filters.len())
            .with("rows_matched", prepared.rows_matched)
            .with("privacy_unit", "row")
            .with(
                "differentially_private",
                mechanism.is_differentially_private(),
            );

        let reduction = Reduction::for_operation(operation);
        let (value, noise_scale, metadata) = match reduction {
            Some(reduction) => {
                let sensitivity =
                    reduction_sensitivity(reduction, bounds.as_ref());
                let epsilon = accountant.charge(params.epsilon)?;
                let outcome = mechanism.protect(
                    &prepared.aggregate(reduction),
                    sensitivity,
                    epsilon,
                )?;
                let value = finalize(
                    operation,
                    outcome.protected_value,
                    bounds.as_ref(),
                    precision,
                );
                let true_value = match operation {
                    OperationKind::Count => json!(prepared.values.len()),
                    _ => json!(round_to(
                        prepared.true_value()?,
                        METADATA_PRECISION
                    )),
                };

                let noise_added = outcome
                    .noise_added
                    .map(|n| round_to(n, METADATA_PRECISION));
                let mut metadata = metadata
                    .with("sensitivity", sensitivity)
                    .with(&format!("true_{}", operation.as_str()), true_value)
                    .with("noise_added", noise_added);
                if bounds.is_some() {
                    metadata =
                        metadata.with("clamped_values", prepared.values.len());
                }
                (value, outcome.noise_scale, metadata)
            }
            None => self.release_average(
                &mut mechanism,
                &mut accountant,
                prepared,
                bounds.as_ref(),
                metadata,
            )?,
        };

        debug!(
            "Consumed epsilon {} of {}, {} left unspent",
            accountant.consumed_epsilon(),
            params.epsilon,
            accountant.remaining_epsilon()?
        );
        Ok(AggregateResult::new(
            operation,
            value,
            params.epsilon,
            params.delta,
            mechanism.name(),
            noise_scale.map(|b| round_to(b, self.config.noise_scale_precision)),
            started,
            metadata,
        ))
    }

    /// Noisy sum over noisy count, each charged half of the budget.
    fn release_average(
        &self,
        mechanism: &mut Mechanism<'_>,
        accountant: &mut BudgetAccountant,
        prepared: &PreparedAggregate,
        bounds: Option<&ColumnBounds>,
        metadata: Metadata,
    ) -> QueryResult<(f64, Option<f64>, Metadata)> {
        let split = accountant.average_split();
        let Sensitivity::Average {
            sum: sum_sensitivity,
            count: count_sensitivity,
        } = sensitivity(OperationKind::Avg, bounds)
        else {
            return Err(QueryError::Internal(
                "AVG sensitivity must have a sum and a count part".to_string(),
            ));
        };

        let epsilon_sum = accountant.charge(split.sum)?;
        let sum =
            mechanism.protect(&prepared.sum(), sum_sensitivity, epsilon_sum)?;
        let epsilon_count = accountant.charge(split.count)?;
        let count = mechanism.protect(
            &prepared.count(),
            count_sensitivity,
            epsilon_count,
        )?;

        let guard_applied = count.protected_value < 1.0;
        let denominator = count.protected_value.max(1.0);
        let average = round_to(
            sum.protected_value / denominator,
            self.config.result_precision,
        );
        if guard_applied {
            debug!(
                "Noisy count {} floored at 1 before division",
                count.protected_value
            );
        }

        let rounded = |x: f64| round_to(x, METADATA_PRECISION);
        let true_sum = prepared.sum().true_value().unwrap_or(0.0);
        let metadata = metadata
            .with("sensitivity_sum", sum_sensitivity)
            .with("sensitivity_count", count_sensitivity)
            .with("true_avg", rounded(prepared.true_value()?))
            .with("true_sum", rounded(true_sum))
            .with("true_count", prepared.values.len())
            .with("noisy_sum", rounded(sum.protected_value))
            .with("noisy_count", rounded(count.protected_value))
            .with("clamped_values", prepared.values.len())
            .with(
                "epsilon_split",
                json!({ "sum": split.sum, "count": split.count }),
            )
            .with("composition", "sequential")
            .with("division_guard_applied", guard_applied);

        Ok((average, sum.noise_scale, metadata))
    }

    /// Exact COUNT/SUM under a fresh Paillier key.
    fn release_encrypted(
        &self,
        descriptor: &QueryDescriptor,
        prepared: &PreparedAggregate,
        started: Instant,
    ) -> QueryResult<AggregateResult> {
        let operation = prepared.operation;
        let Some(reduction) = Reduction::for_operation(operation) else {
            return Err(QueryError::Internal(format!(
                "{operation} has no single reduction to encrypt"
            )));
        };

        let mut rng = ChaCha20Rng::from_entropy();
        let keys = PaillierKeyManager::generate(
            self.config.paillier_key_bits,
            self.config.miller_rabin_rounds,
            &mut rng,
        )?;
        let aggregation =
            EncryptedAggregation::new(&keys, self.config.fixed_point_scale);
        let key_bits = aggregation.key_bits();
        let mut mechanism = Mechanism::Encrypted(aggregation);

        let outcome =
            mechanism.protect(&prepared.aggregate(reduction), 0.0, 0.0)?;
        let value = match operation {
            OperationKind::Count => outcome.protected_value.round(),
            _ => {
                round_to(outcome.protected_value, self.config.result_precision)
            }
        };

        let bounds = prepared.bounds.map(|r| r.bounds);
        let metadata = Metadata::new()
            .with("operation", operation.as_str())
            .with("column", prepared.column.clone())
            .with("encryption_scheme", ENCRYPTION_SCHEME)
            .with("key_bits", key_bits)
            .with("records_encrypted", prepared.values.len())
            .with("bounds", bounds.map(|b| b.as_pair().to_vec()))
            .with("bounds_applied", bounds.is_some())
            .with("filters_applied", descriptor.filters.len())
            .with("rows_matched", prepared.rows_matched)
            .with(
                "differentially_private",
                mechanism.is_differentially_private(),
            );

        Ok(AggregateResult::new(
            operation,
            value,
            outcome.consumed_epsilon,
            outcome.consumed_delta,
            mechanism.name(),
            outcome.noise_scale,
            started,
            metadata,
        ))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "query execution panicked".to_string())
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use serde_json::Value;

    use super::*;
    use crate::data::dataset::Value as Cell;

    fn request(query: &str, mechanism: MechanismKind) -> QueryRequest {
        let mut request = QueryRequest {
            query: query.to_string(),
            data: vec![
                vec![Cell::from(25.0), Cell::from("paris")],
                vec![Cell::from(40.0), Cell::from("rome")],
                vec![Cell::from(60.0), Cell::from("paris")],
            ],
            columns: vec!["age".to_string(), "city".to_string()],
            mechanism,
            ..Default::default()
        };
        request.bounds.insert("age".to_string(), [0.0, 100.0]);
        request
    }

    fn small_keys() -> QueryEngine {
        QueryEngine::new(EngineConfig {
            paillier_key_bits: 256,
            miller_rabin_rounds: 8,
            ..Default::default()
        })
    }

    fn success(response: QueryResponse) -> AggregateResult {
        match response {
            QueryResponse::Success(result) => result,
            QueryResponse::Failure(failure) => {
                panic!("query failed: {}", failure.error)
            }
        }
    }

    #[test]
    fn test_seeded_release_is_reproducible() -> Result<(), QueryError> {
        let engine = QueryEngine::default();
        let dataset = Dataset::new(
            vec!["age".to_string()],
            vec![
                vec![Cell::from(25.0)],
                vec![Cell::from(40.0)],
                vec![Cell::from(60.0)],
            ],
        )?;
        let descriptor =
            QueryParser::new(false).parse("SELECT SUM(age) FROM t")?;
        let resolver = engine.config().bounds_resolver();
        let prepared = StatisticsEngine::new(&dataset, &resolver)
            .prepare(&descriptor, Some(ColumnBounds::new(0.0, 100.0)))?;
        let params = PrivacyParameters::new(1.0, 1e-5)?;

        let release = |seed| {
            let rng = ChaCha20Rng::seed_from_u64(seed);
            let mechanism = Mechanism::Laplace(LaplaceMechanism::with_rng(rng));
            engine.release_dp(
                mechanism,
                &descriptor,
                &prepared,
                params,
                Instant::now(),
            )
        };
        let a = release(9)?;
        let b = release(9)?;
        assert_eq!(a.value(), b.value());
        assert_eq!(a.noise_scale, Some(100.0));
        assert_eq!(a.metadata.get("true_sum"), Some(&json!(125.0)));
        Ok(())
    }

    #[test]
    fn test_average_composition() {
        let engine = QueryEngine::default();
        let result = success(engine.execute(
            request("SELECT AVG(age) FROM people", MechanismKind::Dp),
            Instant::now(),
        ));
        assert_eq!(result.epsilon_consumed, 1.0);
        assert_eq!(result.noise_scale, Some(200.0));
        assert_eq!(result.metadata.get("true_avg"), Some(&json!(41.67)));
        assert_eq!(
            result.metadata.get("composition"),
            Some(&json!("sequential"))
        );
        assert_eq!(
            result.metadata.get("epsilon_split"),
            Some(&json!({"sum": 0.5, "count": 0.5}))
        );
        assert!(result.result.contains_key("average"));
    }

    #[test]
    fn test_filters_reach_the_statistics() {
        let engine = QueryEngine::default();
        let result = success(engine.execute(
            request(
                "SELECT COUNT(*) FROM people WHERE city = 'paris'",
                MechanismKind::Dp,
            ),
            Instant::now(),
        ));
        assert_eq!(result.metadata.get("true_count"), Some(&json!(2)));
        assert_eq!(result.metadata.get("rows_matched"), Some(&json!(2)));
        assert_eq!(result.metadata.get("filters_applied"), Some(&json!(1)));
        assert_eq!(result.noise_scale, Some(1.0));
    }

    #[test]
    fn test_encrypted_sum_is_exact() {
        let engine = small_keys();
        let result = success(engine.execute(
            request("SELECT SUM(age) FROM people", MechanismKind::He),
            Instant::now(),
        ));
        assert_abs_diff_eq!(result.value().unwrap(), 125.0);
        assert_eq!(result.epsilon_consumed, 0.0);
        assert_eq!(result.delta, 0.0);
        assert_eq!(result.noise_scale, None);
        assert_eq!(result.mechanism, "homomorphic_encryption");
        assert_eq!(result.metadata.get("key_bits"), Some(&json!(256)));
        assert_eq!(
            result.metadata.get("differentially_private"),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn test_encrypted_rejects_average_before_key_generation() {
        let engine = QueryEngine::new(EngineConfig {
            paillier_key_bits: 8192,
            ..Default::default()
        });
        let response = engine.execute(
            request("SELECT AVG(age) FROM people", MechanismKind::He),
            Instant::now(),
        );
        match response {
            QueryResponse::Failure(failure) => {
                assert_eq!(
                    failure.error_type,
                    "UnsupportedOperationForMechanism"
                );
            }
            QueryResponse::Success(_) => panic!("AVG must not run encrypted"),
        }
    }

    #[test]
    fn test_mixed_case_bounds_keys() {
        let engine = QueryEngine::default();
        let mut request = QueryRequest {
            query: "SELECT MAX(age) FROM people".to_string(),
            data: vec![
                vec![Cell::from(25.0)],
                vec![Cell::from(40.0)],
                vec![Cell::from(500.0)],
            ],
            columns: vec!["age".to_string()],
            epsilon: Some(1e9),
            ..Default::default()
        };
        request.bounds.insert("Age".to_string(), [0.0, 100.0]);

        let result = success(engine.execute(request, Instant::now()));
        assert_eq!(result.metadata.get("bounds"), Some(&json!([0.0, 100.0])));
        assert_eq!(
            result.metadata.get("bounds_source"),
            Some(&json!("supplied"))
        );
        assert_eq!(result.metadata.get("true_max"), Some(&json!(100.0)));
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }
}
