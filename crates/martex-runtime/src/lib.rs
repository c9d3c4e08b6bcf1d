#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod edition;
mod orchestrator;
pub mod provider;
mod resolver;
pub mod run;
mod shutdown;
mod store;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod mock;

pub use martex_core::{Error, ErrorKind, Result};

pub use crate::config::{RuntimeConfig, RuntimeConfigBuilder, RuntimeConfigBuilderError};
pub use crate::edition::{AvailableDestinationTypes, Edition};
pub use crate::orchestrator::{ReportRunner, RunOutcome, RunReportCommand, TransferStats};
pub use crate::provider::{
    ReaderFactory, ReaderResolver, ReportDataBatch, ReportDataDescription, ReportDataHeader,
    ReportReader, ReportWriter, WriterFactory, WriterResolver,
};
pub use crate::resolver::TypeResolver;
pub use crate::shutdown::{GracefulShutdown, ProcessGuard};
pub use crate::store::{PgReportStore, ReportStore, RunCompletion, StartedRun};

/// Tracing target for report run orchestration.
pub const TRACING_TARGET_ORCHESTRATOR: &str = "martex_runtime::orchestrator";

/// Tracing target for graceful shutdown tracking.
pub const TRACING_TARGET_SHUTDOWN: &str = "martex_runtime::shutdown";

/// Tracing target for storage readers and destination writers.
pub const TRACING_TARGET_PROVIDER: &str = "martex_runtime::provider";

/// Tracing target for report persistence.
pub const TRACING_TARGET_STORE: &str = "martex_runtime::store";
