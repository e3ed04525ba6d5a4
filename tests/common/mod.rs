pub mod logging;

use std::time::Instant;

use privstats::{engine::AggregateResult, QueryEngine, QueryResponse};
use serde_json::Value;

/// Runs a JSON request and unwraps the success envelope.
#[allow(unused)]
pub fn run_ok(engine: &QueryEngine, request: Value) -> AggregateResult {
    match engine.execute_json(&request.to_string(), Instant::now()) {
        QueryResponse::Success(result) => result,
        QueryResponse::Failure(failure) => {
            panic!("query failed: {} ({})", failure.error, failure.error_type)
        }
    }
}

/// Runs a JSON request and returns the serialized failure envelope.
#[allow(unused)]
pub fn run_err(engine: &QueryEngine, request: Value) -> Value {
    let response = engine.execute_json(&request.to_string(), Instant::now());
    assert!(!response.is_success(), "expected a failure envelope");
    serde_json::from_str(&response.to_json()).unwrap()
}
