//! Runtime configuration.

use std::time::Duration;

use derive_builder::Builder;

use crate::Edition;

/// Default number of rows requested from a reader per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Largest accepted batch size.
const MAX_BATCH_SIZE: usize = 100_000;

/// Configuration for the report runner.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct RuntimeConfig {
    /// Product edition, selects the available destination types.
    #[builder(default)]
    pub edition: Edition,

    /// Rows requested from a reader per batch.
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,

    /// How long a shutdown waits for active runs to drain.
    #[builder(default = "Duration::from_secs(30)")]
    pub shutdown_timeout: Duration,
}

impl RuntimeConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(batch_size) = self.batch_size
            && !(1..=MAX_BATCH_SIZE).contains(&batch_size)
        {
            return Err(format!("batch_size must be between 1 and {MAX_BATCH_SIZE}"));
        }

        if let Some(timeout) = self.shutdown_timeout
            && timeout.is_zero()
        {
            return Err("shutdown_timeout must be greater than zero".into());
        }

        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            edition: Edition::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
