//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── postgres: PgConfig      # Report database and pool
//! ├── oauth: OAuthConfig      # Google OAuth applications and endpoints
//! ├── runtime: RuntimeArgs    # Edition, batch size, shutdown timeout
//! └── command: Command        # migrate | run | refresh | revoke
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.

mod runtime;

use std::process;

use clap::{Parser, Subcommand};
use martex_oauth::OAuthConfig;
use martex_postgres::PgConfig;
use martex_postgres::types::RunType;
pub use runtime::RuntimeArgs;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "martex")]
#[command(about = "Report export runtime")]
#[command(version)]
pub struct Cli {
    /// Report database configuration.
    #[clap(flatten)]
    pub postgres: PgConfig,

    /// Google OAuth configuration.
    #[clap(flatten)]
    pub oauth: OAuthConfig,

    /// Report runtime configuration.
    #[clap(flatten)]
    pub runtime: RuntimeArgs,

    /// Emit logs as JSON lines
    #[arg(long = "log-json", env = "MARTEX_LOG_JSON", global = true)]
    pub log_json: bool,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Commands supported by the binary.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate,

    /// Run a report once and wait for its terminal status.
    Run {
        /// Report to run
        #[arg(long = "report-id")]
        report_id: Uuid,

        /// How the run is recorded (manual or scheduled)
        #[arg(long = "run-type", default_value = "manual")]
        run_type: RunType,

        /// Account recorded as the creator of the run
        #[arg(long = "created-by")]
        created_by: Option<Uuid>,
    },

    /// Refresh the access token of a stored credential.
    Refresh {
        /// Credential to refresh
        #[arg(long = "credential-id")]
        credential_id: Uuid,
    },

    /// Revoke a stored credential and detach it from its owners.
    Revoke {
        /// Credential to revoke
        #[arg(long = "credential-id")]
        credential_id: Uuid,
    },
}

impl Command {
    /// Returns the command name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Migrate => "migrate",
            Self::Run { .. } => "run",
            Self::Refresh { .. } => "refresh",
            Self::Revoke { .. } => "revoke",
        }
    }
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);

        if self.log_json {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    /// Logs configuration (no sensitive information).
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?enabled_features(),
            "Build information"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            command = self.command.name(),
            database_url = %self.postgres.database_url_masked(),
            database_max_connections = self.postgres.max_connections,
            oauth_storage_client = self.oauth.storage_client_id.is_some(),
            oauth_destination_client = self.oauth.destination_client_id.is_some(),
            edition = %self.runtime.edition,
            batch_size = self.runtime.batch_size,
            shutdown_timeout_secs = self.runtime.shutdown_timeout_secs,
            "Configuration loaded"
        );
    }
}

/// Returns a list of enabled compile-time features.
fn enabled_features() -> Vec<&'static str> {
    [cfg!(feature = "dotenv").then_some("dotenv")]
        .into_iter()
        .flatten()
        .collect()
}
