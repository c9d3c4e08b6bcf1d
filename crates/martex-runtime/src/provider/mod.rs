//! Reader and writer contracts plus the built-in providers.
//!
//! A [`ReportReader`] streams rows out of a data storage in batches addressed
//! by an opaque cursor; a [`ReportWriter`] pushes them into a destination.
//! Both are created fresh for every run by a [`ReaderFactory`] or
//! [`WriterFactory`] looked up through a [`TypeResolver`].

use std::sync::Arc;

use martex_postgres::model::ReportContext;
use martex_postgres::types::{DestinationType, StorageType};
use serde::{Deserialize, Serialize};

use crate::run::RunLogger;
use crate::{Error, Result, TypeResolver};

#[cfg(test)]
mod api_stub;
mod bigquery;
mod sheets;
mod slack;

pub use bigquery::{BigQueryReader, BigQueryReaderFactory};
pub use sheets::{GoogleSheetsWriter, GoogleSheetsWriterFactory, row_range};
pub use slack::{ReportCondition, SlackWriter, SlackWriterFactory};

/// One row of report data, in header order.
pub type ReportDataRow = Vec<serde_json::Value>;

/// Column of the exported data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDataHeader {
    /// Column name in the storage.
    pub name: String,
    /// Display name used by destinations, if different from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Storage-specific column type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Column description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ReportDataHeader {
    /// Creates a header with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            data_type: None,
            description: None,
        }
    }

    /// Returns the alias, falling back to the name.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Shape of the data a reader is about to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDataDescription {
    /// Columns, in row order.
    pub headers: Vec<ReportDataHeader>,
    /// Row count reported by the storage, if known.
    pub estimated_row_count: Option<u64>,
}

/// One page of rows and the cursor of the next page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDataBatch {
    /// Rows of this page.
    pub rows: Vec<ReportDataRow>,
    /// Cursor of the next page; absent or empty at the end of the data.
    pub next_cursor: Option<String>,
}

impl ReportDataBatch {
    /// Creates a batch.
    pub fn new(rows: Vec<ReportDataRow>, next_cursor: Option<String>) -> Self {
        Self { rows, next_cursor }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns whether the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the cursor of the next page, treating an empty cursor as absent.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|cursor| !cursor.is_empty())
    }
}

/// Reads report data out of one kind of storage.
#[async_trait::async_trait]
pub trait ReportReader: Send {
    /// Starts the query and describes its result.
    async fn prepare_report_data(
        &mut self,
        context: &ReportContext,
    ) -> Result<ReportDataDescription>;

    /// Returns the page at `cursor`, or the first page when `cursor` is `None`.
    async fn read_report_data_batch(&mut self, cursor: Option<&str>) -> Result<ReportDataBatch>;

    /// Releases resources held for the run.
    async fn finalize(&mut self) -> Result<()>;
}

/// Writes report data into one kind of destination.
#[async_trait::async_trait]
pub trait ReportWriter: Send {
    /// Hands the writer the logger of the current run.
    fn set_run_logger(&mut self, _logger: RunLogger) {}

    /// Prepares the destination for a fresh export.
    async fn prepare_to_write_report(
        &mut self,
        context: &ReportContext,
        description: &ReportDataDescription,
    ) -> Result<()>;

    /// Writes one non-empty batch, in read order.
    async fn write_report_data_batch(&mut self, batch: &ReportDataBatch) -> Result<()>;

    /// Completes the export.
    ///
    /// Called exactly once per run, with the error that ended the transfer if
    /// any. Must not fail just because the transfer already failed.
    async fn finalize(&mut self, error: Option<&Error>) -> Result<()>;
}

/// Creates a fresh reader for every run.
pub trait ReaderFactory: Send + Sync {
    /// Creates a reader.
    fn create_reader(&self) -> Box<dyn ReportReader>;
}

/// Creates a fresh writer for every run.
pub trait WriterFactory: Send + Sync {
    /// Creates a writer.
    fn create_writer(&self) -> Box<dyn ReportWriter>;
}

impl<F> ReaderFactory for F
where
    F: Fn() -> Box<dyn ReportReader> + Send + Sync,
{
    fn create_reader(&self) -> Box<dyn ReportReader> {
        self()
    }
}

impl<F> WriterFactory for F
where
    F: Fn() -> Box<dyn ReportWriter> + Send + Sync,
{
    fn create_writer(&self) -> Box<dyn ReportWriter> {
        self()
    }
}

/// Resolver of reader factories by storage type.
pub type ReaderResolver = TypeResolver<StorageType, Arc<dyn ReaderFactory>>;

/// Resolver of writer factories by destination type.
pub type WriterResolver = TypeResolver<DestinationType, Arc<dyn WriterFactory>>;

/// Reads a string field of a JSON configuration blob.
pub(crate) fn config_str<'a>(config: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    config
        .get(field)
        .and_then(serde_json::Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Reads a required string field of a JSON configuration blob.
pub(crate) fn require_config_str<'a>(
    config: &'a serde_json::Value,
    field: &str,
    owner: &str,
) -> Result<&'a str> {
    config_str(config, field).ok_or_else(|| {
        Error::invalid_input(format!("Invalid {owner} configuration: missing `{field}`"))
    })
}
