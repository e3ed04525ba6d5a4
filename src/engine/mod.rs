pub mod config;
pub mod core;
pub mod request;
pub mod result;

pub use self::{
    config::EngineConfig,
    core::QueryEngine,
    request::QueryRequest,
    result::{AggregateResult, QueryFailure, QueryResponse},
};
