use std::{path::PathBuf, process::ExitCode, time::Instant};

use anyhow::Result;
use clap::Parser;
use privstats::{
    engine::QueryFailure, util::log_util, EngineConfig, QueryEngine, QueryError,
    QueryResponse,
};

#[derive(Debug, Parser)]
#[command(
    name = "privstats-query",
    version,
    about = "Runs one private aggregate query and prints a JSON envelope"
)]
struct Cli {
    /// Request as a JSON object: query, data, columns, epsilon, delta,
    /// bounds, mechanism.
    input: Option<String>,

    /// Engine configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn run(cli: Cli, started: Instant) -> Result<QueryResponse> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let engine = QueryEngine::new(config);

    let response = match cli.input {
        Some(input) => engine.execute_json(&input, started),
        None => QueryResponse::Failure(QueryFailure::from(
            QueryError::MissingInput("Missing input JSON argument"),
        )),
    };
    Ok(response)
}

fn main() -> ExitCode {
    let started = Instant::now();
    log_util::init();
    let cli = Cli::parse();

    let response = run(cli, started).unwrap_or_else(|e| {
        log::error!("{e:#}");
        let err = QueryError::Internal(format!("{e:#}"));
        QueryResponse::Failure(QueryFailure::from(err))
    });

    println!("{}", response.to_json());
    if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
