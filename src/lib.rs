pub mod budget;
pub mod data;
pub mod engine;
pub mod errors;
pub mod mechanisms;
pub mod queries;
pub mod util;

pub use engine::{EngineConfig, QueryEngine, QueryRequest, QueryResponse};
pub use errors::{QueryError, QueryResult};
