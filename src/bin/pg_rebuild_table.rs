//! CLI entry point. Wires parsed arguments into the rebuild engine and sets
//! the process exit code; the engine itself never calls `std::process::exit`
//! so it stays testable as a library.
//!
//! Unlike the tool this was ported from, a failed run does NOT sweep up the
//! shadow/delta tables on the way out — see `DESIGN.md` for why leaving
//! them for inspection (and a `--clean` or `--only-switch` retry) won out
//! over an unconditional safety-net cleanup.

use clap::Parser;
use pg_rebuild_table::{config::RebuildConfig, error::RebuildError, session::RebuildSession, RebuildArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = RebuildArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.logging_level)))
        .init();

    if let Err(err) = run(&args).await {
        tracing::error!(error = %err, kind = %err.kind(), "pg_rebuild_table failed");
        std::process::exit(1);
    }
}

async fn run(args: &RebuildArgs) -> Result<(), RebuildError> {
    let config = RebuildConfig::from_args(args)?;
    let mut session = RebuildSession::connect(&args.connection).await?;
    pg_rebuild_table::engine::run(&mut session, &config).await
}
