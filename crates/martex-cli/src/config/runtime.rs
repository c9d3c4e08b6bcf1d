//! Report runtime arguments.

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use martex_runtime::{Edition, RuntimeConfig, RuntimeConfigBuilder};

/// Edition, batching and shutdown settings of the report runner.
#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// Product edition (community or enterprise)
    #[arg(long = "edition", env = "MARTEX_EDITION", default_value = "community")]
    pub edition: Edition,

    /// Rows requested from a storage per batch
    #[arg(long = "batch-size", env = "MARTEX_BATCH_SIZE", default_value = "10000")]
    pub batch_size: usize,

    /// Seconds to wait for active runs after a shutdown signal
    #[arg(
        long = "shutdown-timeout-secs",
        env = "MARTEX_SHUTDOWN_TIMEOUT_SECS",
        default_value = "30"
    )]
    pub shutdown_timeout_secs: u64,
}

impl RuntimeArgs {
    /// Validates the arguments and builds the runner configuration.
    pub fn build(&self) -> anyhow::Result<RuntimeConfig> {
        RuntimeConfigBuilder::default()
            .edition(self.edition)
            .batch_size(self.batch_size)
            .shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .build()
            .context("invalid runtime configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(batch_size: usize, shutdown_timeout_secs: u64) -> RuntimeArgs {
        RuntimeArgs {
            edition: Edition::Community,
            batch_size,
            shutdown_timeout_secs,
        }
    }

    #[test]
    fn test_build() {
        let config = args(500, 10).build().unwrap();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_build_rejects_invalid_values() {
        assert!(args(0, 10).build().is_err());
        assert!(args(500, 0).build().is_err());
    }
}
