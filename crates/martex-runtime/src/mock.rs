//! In-memory report store and scripted providers for tests.
//!
//! Available with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! martex-runtime = { workspace = true, features = ["test-utils"] }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jiff::Timestamp;
use martex_postgres::model::{
    DataDestination, DataMart, DataStorage, NewReportRun, Report, ReportContext, ReportRun,
    UpdateReport, UpdateReportRun,
};
use martex_postgres::types::{DestinationType, ReportRunStatus, RunType, StorageType};
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::provider::ReportDataRow;
use crate::{
    Error, ErrorKind, ReaderFactory, ReportDataBatch, ReportDataDescription, ReportDataHeader,
    ReportReader, ReportStore, ReportWriter, Result, RunCompletion, StartedRun, WriterFactory,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn version_conflict(report_id: Uuid, expected_version: i32) -> Error {
    Error::new(ErrorKind::VersionConflict).with_message(format!(
        "Report {report_id} was modified concurrently (expected version {expected_version})"
    ))
}

fn apply_report_changes(report: &mut Report, changes: UpdateReport) {
    if let Some(status) = changes.last_run_status {
        report.last_run_status = status;
    }
    if let Some(last_run_at) = changes.last_run_at {
        report.last_run_at = last_run_at;
    }
    if let Some(last_run_error) = changes.last_run_error {
        report.last_run_error = last_run_error;
    }
    if let Some(runs_count) = changes.runs_count {
        report.runs_count = runs_count;
    }
    report.version += 1;
    report.updated_at = Timestamp::now().into();
}

fn apply_run_changes(run: &mut ReportRun, changes: UpdateReportRun) {
    if let Some(status) = changes.status {
        run.status = status;
    }
    if let Some(errors) = changes.errors {
        run.errors = errors;
    }
    if let Some(logs) = changes.logs {
        run.logs = logs;
    }
    if let Some(finished_at) = changes.finished_at {
        run.finished_at = finished_at;
    }
}

/// Returns a run record in the `RUNNING` state with empty history.
pub fn running_run(report_id: Uuid) -> ReportRun {
    let now = Timestamp::now();
    ReportRun {
        id: Uuid::now_v7(),
        report_id,
        status: ReportRunStatus::Running,
        run_type: RunType::Manual,
        created_by: None,
        errors: json!([]),
        logs: json!([]),
        started_at: Some(now.into()),
        finished_at: None,
        created_at: now.into(),
    }
}

#[derive(Default)]
struct MemoryReports {
    contexts: HashMap<Uuid, ReportContext>,
    runs: Vec<ReportRun>,
    fail_finish: bool,
}

/// [`ReportStore`] keeping reports and runs in memory.
///
/// Versioned writes are checked under a single store-wide lock.
#[derive(Clone, Default)]
pub struct MemoryReportStore {
    state: Arc<Mutex<MemoryReports>>,
}

impl MemoryReportStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an idle report at version 1 with a fresh data mart, storage and
    /// destination, and returns its context.
    pub fn seed_report(
        &self,
        storage_type: StorageType,
        destination_type: DestinationType,
    ) -> ReportContext {
        let now = Timestamp::now();
        let project_id = Uuid::now_v7();

        let storage = DataStorage {
            id: Uuid::now_v7(),
            project_id,
            storage_type,
            title: "Warehouse".into(),
            config: json!({ "projectId": "analytics", "location": "US" }),
            credential_id: Some(Uuid::now_v7()),
            created_at: now.into(),
            updated_at: now.into(),
        };
        let data_mart = DataMart {
            id: Uuid::now_v7(),
            project_id,
            storage_id: storage.id,
            title: "Orders".into(),
            definition: Some(json!({ "sqlQuery": "SELECT id, name FROM orders" })),
            created_at: now.into(),
            updated_at: now.into(),
        };
        let destination = DataDestination {
            id: Uuid::now_v7(),
            project_id,
            destination_type,
            title: "Team export".into(),
            config: json!({}),
            credential_id: Some(Uuid::now_v7()),
            created_at: now.into(),
            updated_at: now.into(),
        };
        let report = Report {
            id: Uuid::now_v7(),
            project_id,
            data_mart_id: data_mart.id,
            destination_id: destination.id,
            title: "Daily orders".into(),
            destination_config: json!({ "spreadsheetId": "sheet-1", "sheetId": 0 }),
            last_run_status: ReportRunStatus::Idle,
            last_run_at: None,
            last_run_error: None,
            runs_count: 0,
            version: 1,
            created_by: None,
            created_at: now.into(),
            updated_at: now.into(),
        };

        let context = ReportContext {
            report,
            data_mart,
            storage,
            destination,
        };
        lock(&self.state)
            .contexts
            .insert(context.report.id, context.clone());
        context
    }

    /// Overwrites the stored version of a report.
    pub fn set_version(&self, report_id: Uuid, version: i32) {
        if let Some(context) = lock(&self.state).contexts.get_mut(&report_id) {
            context.report.version = version;
        }
    }

    /// Makes every following `finish_run` fail.
    pub fn fail_finish(&self, fail: bool) {
        lock(&self.state).fail_finish = fail;
    }

    /// Returns the stored report.
    pub fn report(&self, report_id: Uuid) -> Option<Report> {
        lock(&self.state)
            .contexts
            .get(&report_id)
            .map(|context| context.report.clone())
    }

    /// Returns the runs of a report in creation order.
    pub fn runs_of(&self, report_id: Uuid) -> Vec<ReportRun> {
        lock(&self.state)
            .runs
            .iter()
            .filter(|run| run.report_id == report_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ReportStore for MemoryReportStore {
    async fn load_report_context(&self, report_id: Uuid) -> Result<Option<ReportContext>> {
        Ok(lock(&self.state).contexts.get(&report_id).cloned())
    }

    async fn start_run(&self, report: &Report, new_run: NewReportRun) -> Result<StartedRun> {
        let mut state = lock(&self.state);
        let stored = state
            .contexts
            .get_mut(&report.id)
            .ok_or_else(|| version_conflict(report.id, report.version))?;
        if stored.report.version != report.version {
            return Err(version_conflict(report.id, report.version));
        }

        apply_report_changes(&mut stored.report, report.run_changes());
        let report = stored.report.clone();

        let now = Timestamp::now().into();
        let run = ReportRun {
            id: Uuid::now_v7(),
            report_id: new_run.report_id,
            status: new_run.status,
            run_type: new_run.run_type,
            created_by: new_run.created_by,
            errors: json!([]),
            logs: json!([]),
            started_at: new_run.started_at,
            finished_at: None,
            created_at: now,
        };
        state.runs.push(run.clone());

        Ok(StartedRun { report, run })
    }

    async fn finish_run(&self, completion: RunCompletion) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_finish {
            return Err(Error::new(ErrorKind::Database).with_message("Connection reset"));
        }

        let RunCompletion {
            report_id,
            report_changes,
            run_id,
            run_changes,
        } = completion;
        if let Some(stored) = state
            .contexts
            .get_mut(&report_id)
            .filter(|context| context.report.last_run_status == ReportRunStatus::Running)
        {
            apply_report_changes(&mut stored.report, report_changes);
        }

        if let Some(run) = state.runs.iter_mut().find(|run| run.id == run_id) {
            apply_run_changes(run, run_changes);
        }
        Ok(())
    }
}

#[derive(Default)]
struct ReaderCalls {
    prepares: AtomicUsize,
    reads: AtomicUsize,
    finalizes: AtomicUsize,
    cursors: Mutex<Vec<Option<String>>>,
}

/// Reader returning a fixed list of pages.
///
/// The cursor of page `n` is `"n"`. Clones share their call counters, so the
/// instance kept by a test observes the readers its factory creates.
#[derive(Clone, Default)]
pub struct ScriptedReader {
    pages: Arc<Vec<Vec<ReportDataRow>>>,
    calls: Arc<ReaderCalls>,
    cancel_after: Option<(usize, CancellationToken)>,
    fail_at: Option<(usize, String)>,
    prepare_gate: Option<Arc<Notify>>,
}

impl ScriptedReader {
    /// Creates a reader serving `pages` in order.
    pub fn new(pages: Vec<Vec<ReportDataRow>>) -> Self {
        Self {
            pages: Arc::new(pages),
            ..Self::default()
        }
    }

    /// Cancels `token` once `reads` batches were returned.
    #[must_use]
    pub fn cancel_after(mut self, reads: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((reads, token));
        self
    }

    /// Fails the read of page `page` with an `External` error.
    #[must_use]
    pub fn fail_at(mut self, page: usize, message: impl Into<String>) -> Self {
        self.fail_at = Some((page, message.into()));
        self
    }

    /// Blocks `prepare_report_data` until `gate` is notified.
    #[must_use]
    pub fn with_prepare_gate(mut self, gate: Arc<Notify>) -> Self {
        self.prepare_gate = Some(gate);
        self
    }

    /// Returns how many times data was prepared.
    pub fn prepares(&self) -> usize {
        self.calls.prepares.load(Ordering::SeqCst)
    }

    /// Returns how many batches were requested.
    pub fn reads(&self) -> usize {
        self.calls.reads.load(Ordering::SeqCst)
    }

    /// Returns how many times the reader was finalized.
    pub fn finalize_calls(&self) -> usize {
        self.calls.finalizes.load(Ordering::SeqCst)
    }

    /// Returns the cursors passed to each read.
    pub fn cursors(&self) -> Vec<Option<String>> {
        lock(&self.calls.cursors).clone()
    }
}

#[async_trait::async_trait]
impl ReportReader for ScriptedReader {
    async fn prepare_report_data(
        &mut self,
        _context: &ReportContext,
    ) -> Result<ReportDataDescription> {
        self.calls.prepares.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.prepare_gate {
            gate.notified().await;
        }

        Ok(ReportDataDescription {
            headers: vec![ReportDataHeader::new("id"), ReportDataHeader::new("name")],
            estimated_row_count: Some(self.pages.iter().map(Vec::len).sum::<usize>() as u64),
        })
    }

    async fn read_report_data_batch(&mut self, cursor: Option<&str>) -> Result<ReportDataBatch> {
        let read = self.calls.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls.cursors).push(cursor.map(str::to_owned));

        let page = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| Error::invalid_input(format!("Unknown cursor {cursor}")))?,
            None => 0,
        };

        if let Some((failing, message)) = &self.fail_at
            && *failing == page
        {
            return Err(Error::new(ErrorKind::External).with_message(message.clone()));
        }

        let rows = self.pages.get(page).cloned().unwrap_or_default();
        let next_cursor = (page + 1 < self.pages.len()).then(|| (page + 1).to_string());

        if let Some((after, token)) = &self.cancel_after
            && read + 1 >= *after
        {
            token.cancel();
        }

        Ok(ReportDataBatch::new(rows, next_cursor))
    }

    async fn finalize(&mut self) -> Result<()> {
        self.calls.finalizes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ReaderFactory for ScriptedReader {
    fn create_reader(&self) -> Box<dyn ReportReader> {
        Box::new(self.clone())
    }
}

#[derive(Default)]
struct WriterCalls {
    prepares: AtomicUsize,
    batches: AtomicUsize,
    rows: AtomicUsize,
    finalizes: AtomicUsize,
    last_error: Mutex<Option<ErrorKind>>,
}

/// Writer recording what it receives.
///
/// Clones share their counters, like [`ScriptedReader`].
#[derive(Clone, Default)]
pub struct RecordingWriter {
    calls: Arc<WriterCalls>,
    fail_on_batch: Option<usize>,
}

impl RecordingWriter {
    /// Creates a writer accepting every batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the write of the `batch`-th batch (zero based).
    #[must_use]
    pub fn fail_on_batch(mut self, batch: usize) -> Self {
        self.fail_on_batch = Some(batch);
        self
    }

    /// Returns how many times the destination was prepared.
    pub fn prepares(&self) -> usize {
        self.calls.prepares.load(Ordering::SeqCst)
    }

    /// Returns how many batches were written.
    pub fn batches_written(&self) -> usize {
        self.calls.batches.load(Ordering::SeqCst)
    }

    /// Returns how many rows were written.
    pub fn rows_written(&self) -> usize {
        self.calls.rows.load(Ordering::SeqCst)
    }

    /// Returns how many times the writer was finalized.
    pub fn finalize_calls(&self) -> usize {
        self.calls.finalizes.load(Ordering::SeqCst)
    }

    /// Returns the kind of the error passed to the last finalize.
    pub fn last_finalize_error(&self) -> Option<ErrorKind> {
        *lock(&self.calls.last_error)
    }
}

#[async_trait::async_trait]
impl ReportWriter for RecordingWriter {
    async fn prepare_to_write_report(
        &mut self,
        _context: &ReportContext,
        _description: &ReportDataDescription,
    ) -> Result<()> {
        self.calls.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_report_data_batch(&mut self, batch: &ReportDataBatch) -> Result<()> {
        if self.fail_on_batch == Some(self.batches_written()) {
            return Err(Error::new(ErrorKind::External).with_message("Destination rejected batch"));
        }

        self.calls.batches.fetch_add(1, Ordering::SeqCst);
        self.calls.rows.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn finalize(&mut self, error: Option<&Error>) -> Result<()> {
        self.calls.finalizes.fetch_add(1, Ordering::SeqCst);
        *lock(&self.calls.last_error) = error.map(Error::kind);
        Ok(())
    }
}

impl WriterFactory for RecordingWriter {
    fn create_writer(&self) -> Box<dyn ReportWriter> {
        Box::new(self.clone())
    }
}

/// Returns `count` two-column rows.
pub fn sample_rows(count: usize) -> Vec<ReportDataRow> {
    (0..count)
        .map(|i| vec![Value::from(i), Value::from(format!("row-{i}"))])
        .collect()
}
