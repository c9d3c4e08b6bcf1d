#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod command;
mod config;
mod services;
mod shutdown;

use std::process;

use anyhow::Context;

use crate::config::{Cli, Command};
use crate::services::Services;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "martex_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "martex_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "martex_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "martex_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "Application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = format!("{error:#}"),
            "Application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();
    cli.init_tracing();
    cli.log();

    let services = Services::from_cli(&cli)?;
    services
        .pg_client
        .ping()
        .await
        .context("database is unreachable")?;

    match cli.command {
        Command::Migrate => command::migrate(&services).await,
        Command::Run {
            report_id,
            run_type,
            created_by,
        } => command::run_report(&services, report_id, run_type, created_by).await,
        Command::Refresh { credential_id } => command::refresh(&services, credential_id).await,
        Command::Revoke { credential_id } => command::revoke(&services, credential_id).await,
    }
}
