use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{errors::QueryError, queries::descriptor::OperationKind};

/// Free-form key/value metadata attached to a released result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Success envelope of one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    success: bool,

    /// Single entry keyed by the metric name.
    pub result: Map<String, Value>,
    pub epsilon_consumed: f64,
    pub delta: f64,
    pub mechanism: &'static str,
    pub noise_scale: Option<f64>,
    pub execution_time_ms: u64,
    pub metadata: Metadata,
}

impl AggregateResult {
    /// Builds the envelope for `operation`. COUNT values are emitted as
    /// integers.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operation: OperationKind,
        value: f64,
        epsilon_consumed: f64,
        delta: f64,
        mechanism: &'static str,
        noise_scale: Option<f64>,
        started: Instant,
        metadata: Metadata,
    ) -> Self {
        let value = match operation {
            OperationKind::Count => Value::from(value.max(0.0) as u64),
            _ => Value::from(value),
        };
        let mut result = Map::new();
        result.insert(operation.metric_name().to_string(), value);

        Self {
            success: true,
            result,
            epsilon_consumed,
            delta,
            mechanism,
            noise_scale,
            execution_time_ms: elapsed_ms(started),
            metadata,
        }
    }

    /// The released value, whatever its metric name.
    pub fn value(&self) -> Option<f64> {
        self.result.values().next().and_then(Value::as_f64)
    }
}

/// Failure envelope: no partial result is ever attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFailure {
    success: bool,
    pub error: String,
    pub error_type: &'static str,
}

impl From<QueryError> for QueryFailure {
    fn from(err: QueryError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            error_type: err.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Success(AggregateResult),
    Failure(QueryFailure),
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryResponse::Success(_))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            let error = format!("failed to serialize response: {e}");
            serde_json::json!({ "success": false, "error": error }).to_string()
        })
    }
}

/// Wall-clock milliseconds since `started`, never below 1.
pub fn elapsed_ms(started: Instant) -> u64 {
    let ms = started.elapsed().as_millis();
    u64::try_from(ms).unwrap_or(u64::MAX).max(1)
}
