//! Report execution orchestrator.

use std::fmt;
use std::sync::Arc;

use jiff::Timestamp;
use martex_postgres::model::{NewReportRun, ReportContext};
use martex_postgres::types::{ReportRunStatus, RunType};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::provider::{ReportReader, ReportWriter};
use crate::run::{ReportRunState, RunLogger, prepare_for_start};
use crate::{
    AvailableDestinationTypes, Error, ErrorKind, GracefulShutdown, ReaderResolver, ReportStore,
    Result, RunCompletion, RuntimeConfig, TRACING_TARGET_ORCHESTRATOR, WriterResolver,
};

/// Request to run a report once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReportCommand {
    /// Report to run.
    pub report_id: Uuid,
    /// How the run was initiated.
    pub run_type: RunType,
    /// Account that started the run.
    pub created_by: Option<Uuid>,
}

impl RunReportCommand {
    /// Creates a manual run command.
    pub fn new(report_id: Uuid) -> Self {
        Self {
            report_id,
            run_type: RunType::Manual,
            created_by: None,
        }
    }

    /// Sets how the run was initiated.
    #[must_use]
    pub fn with_run_type(mut self, run_type: RunType) -> Self {
        self.run_type = run_type;
        self
    }

    /// Sets the account that started the run.
    #[must_use]
    pub fn with_created_by(mut self, created_by: Uuid) -> Self {
        self.created_by = Some(created_by);
        self
    }
}

/// Counters of one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Batches returned by the reader.
    pub batches_read: usize,
    /// Batches handed to the writer.
    pub batches_written: usize,
    /// Rows returned by the reader.
    pub rows_read: usize,
    /// Rows handed to the writer.
    pub rows_written: usize,
}

/// Result of a run that reached a terminal status.
#[derive(Debug)]
pub struct RunOutcome {
    /// Run record identifier.
    pub run_id: Uuid,
    /// Terminal status.
    pub status: ReportRunStatus,
    /// What was transferred before the run ended.
    pub stats: TransferStats,
    /// Error that ended the run, if any.
    pub error: Option<Error>,
    /// Whether the terminal state was persisted.
    pub persisted: bool,
}

/// Cancellation sources observed by a run.
struct RunSignal {
    caller: CancellationToken,
    shutdown: CancellationToken,
}

impl RunSignal {
    fn check(&self) -> Result<()> {
        if self.caller.is_cancelled() || self.shutdown.is_cancelled() {
            return Err(Error::cancelled());
        }
        Ok(())
    }
}

struct Inner {
    store: Arc<dyn ReportStore>,
    readers: ReaderResolver,
    writers: WriterResolver,
    destinations: AvailableDestinationTypes,
    shutdown: GracefulShutdown,
}

/// Runs reports from start to a terminal status.
///
/// Every run goes through the same steps: refuse during shutdown, load the
/// report, move it to `RUNNING` with a version-checked write, register with
/// [`GracefulShutdown`], stream batches and persist the terminal status.
#[derive(Clone)]
pub struct ReportRunner {
    inner: Arc<Inner>,
}

impl fmt::Debug for ReportRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportRunner")
            .field("readers", &self.inner.readers)
            .field("writers", &self.inner.writers)
            .field("destinations", &self.inner.destinations)
            .field("shutdown", &self.inner.shutdown)
            .finish_non_exhaustive()
    }
}

impl ReportRunner {
    /// Creates a runner.
    ///
    /// Writers for destination types outside the configured edition are
    /// filtered out of `writers`.
    pub fn new(
        store: Arc<dyn ReportStore>,
        readers: ReaderResolver,
        writers: WriterResolver,
        shutdown: GracefulShutdown,
        config: &RuntimeConfig,
    ) -> Self {
        let destinations = AvailableDestinationTypes::for_edition(config.edition);
        let writers = writers
            .with_filter(move |destination_type| destinations.is_available(destination_type));

        Self {
            inner: Arc::new(Inner {
                store,
                readers,
                writers,
                destinations,
                shutdown,
            }),
        }
    }

    /// Returns the shutdown tracker.
    pub fn shutdown(&self) -> &GracefulShutdown {
        &self.inner.shutdown
    }

    /// Runs a report on a background task.
    ///
    /// Failures to start are logged, not returned.
    pub fn run_in_background(&self, command: RunReportCommand) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            let report_id = command.report_id;
            if let Err(error) = runner.run(command, CancellationToken::new()).await {
                tracing::error!(
                    target: TRACING_TARGET_ORCHESTRATOR,
                    report_id = %report_id,
                    error = %error,
                    "Error running report in background"
                );
            }
        })
    }

    /// Runs a report until it reaches a terminal status.
    ///
    /// Returns an error only when the run could not start: shutdown in
    /// progress, unknown report, a run already in progress or a lost
    /// version-checked write. Once started, failures are reported in the
    /// [`RunOutcome`].
    #[tracing::instrument(skip_all, target = TRACING_TARGET_ORCHESTRATOR, fields(report_id = %command.report_id))]
    pub async fn run(
        &self,
        command: RunReportCommand,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let inner = &self.inner;
        inner.shutdown.ensure_accepting()?;

        tracing::info!(
            target: TRACING_TARGET_ORCHESTRATOR,
            report_id = %command.report_id,
            run_type = %command.run_type,
            "Starting report run"
        );

        let context = inner
            .store
            .load_report_context(command.report_id)
            .await?
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message(format!("Report {} not found", command.report_id))
            })?;

        let now = Timestamp::now();
        let mut report = context.report.clone();
        prepare_for_start(&mut report, now)?;

        let new_run = NewReportRun {
            report_id: report.id,
            status: ReportRunStatus::Running,
            run_type: command.run_type,
            created_by: command.created_by,
            started_at: Some(now.into()),
        };
        let started = inner.store.start_run(&report, new_run).await?;

        let process_id = GracefulShutdown::generate_process_id(report.id, now);
        let _guard = inner.shutdown.register(process_id);

        let logger = RunLogger::new();
        let context = ReportContext {
            report: started.report.clone(),
            ..context
        };
        let mut state = ReportRunState::new(started.report, started.run, logger.clone());
        let run_id = state.run().id;

        tracing::info!(
            target: TRACING_TARGET_ORCHESTRATOR,
            report_id = %context.report.id,
            run_id = %run_id,
            "Report execution started"
        );

        let signal = RunSignal {
            caller: cancel,
            shutdown: inner.shutdown.cancellation_token(),
        };

        let mut stats = TransferStats::default();
        let result = self.execute(&context, &signal, &logger, &mut stats).await;
        let error = settle(&mut state, result);

        let persisted = match inner.store.finish_run(RunCompletion::from(&state)).await {
            Ok(()) => true,
            Err(save_error) => {
                tracing::error!(
                    target: TRACING_TARGET_ORCHESTRATOR,
                    report_id = %context.report.id,
                    run_id = %run_id,
                    error = %save_error,
                    "Failed to persist final status"
                );
                false
            }
        };

        Ok(RunOutcome {
            run_id,
            status: state.status(),
            stats,
            error,
            persisted,
        })
    }

    /// Resolves the reader and writer and runs the transfer, finalizing both.
    async fn execute(
        &self,
        context: &ReportContext,
        signal: &RunSignal,
        logger: &RunLogger,
        stats: &mut TransferStats,
    ) -> Result<()> {
        signal.check()?;

        let destination_type = context.destination.destination_type;
        self.inner.destinations.verify(destination_type)?;

        let mut reader = self
            .inner
            .readers
            .resolve(context.storage.storage_type)?
            .create_reader();
        let mut writer = self.inner.writers.resolve(destination_type)?.create_writer();
        writer.set_run_logger(logger.clone());

        let result = transfer(reader.as_mut(), writer.as_mut(), context, signal, stats).await;

        let writer_result = writer.finalize(result.as_ref().err()).await;
        let reader_result = reader.finalize().await;

        match result {
            Ok(()) => writer_result.and(reader_result),
            Err(error) => {
                for finalize_error in [writer_result.err(), reader_result.err()]
                    .into_iter()
                    .flatten()
                {
                    tracing::warn!(
                        target: TRACING_TARGET_ORCHESTRATOR,
                        report_id = %context.report.id,
                        error = %finalize_error,
                        "Finalize failed after an unsuccessful transfer"
                    );
                }
                Err(error)
            }
        }
    }
}

/// Applies the terminal transition matching `result` and logs it.
fn settle(state: &mut ReportRunState, result: Result<()>) -> Option<Error> {
    let report_id = state.report().id;
    let now = Timestamp::now();

    match result {
        Ok(()) => {
            state.mark_as_success(now);
            tracing::info!(
                target: TRACING_TARGET_ORCHESTRATOR,
                report_id = %report_id,
                "Report completed successfully"
            );
            None
        }
        Err(error) if error.is_cancellation() => {
            state.mark_as_cancelled(now);
            tracing::warn!(
                target: TRACING_TARGET_ORCHESTRATOR,
                report_id = %report_id,
                "Report was cancelled"
            );
            Some(error)
        }
        Err(error) if error.is_business_violation() => {
            state.mark_as_unsuccessful(&error, now);
            tracing::warn!(
                target: TRACING_TARGET_ORCHESTRATOR,
                report_id = %report_id,
                error = %error,
                "Report execution was restricted"
            );
            Some(error)
        }
        Err(error) => {
            state.mark_as_unsuccessful(&error, now);
            tracing::error!(
                target: TRACING_TARGET_ORCHESTRATOR,
                report_id = %report_id,
                error = %error,
                source = ?std::error::Error::source(&error),
                "Report execution failed"
            );
            Some(error)
        }
    }
}

/// Streams every batch from `reader` to `writer`, in read order.
async fn transfer(
    reader: &mut dyn ReportReader,
    writer: &mut dyn ReportWriter,
    context: &ReportContext,
    signal: &RunSignal,
    stats: &mut TransferStats,
) -> Result<()> {
    let report_id = context.report.id;

    signal.check()?;
    let description = reader.prepare_report_data(context).await?;
    tracing::debug!(
        target: TRACING_TARGET_ORCHESTRATOR,
        report_id = %report_id,
        headers = description.headers.len(),
        estimated_rows = ?description.estimated_row_count,
        "Report data prepared"
    );

    writer.prepare_to_write_report(context, &description).await?;

    let mut cursor: Option<String> = None;
    loop {
        signal.check()?;

        let batch = reader.read_report_data_batch(cursor.as_deref()).await?;
        stats.batches_read += 1;
        stats.rows_read += batch.len();

        if !batch.is_empty() {
            writer.write_report_data_batch(&batch).await?;
            stats.batches_written += 1;
            stats.rows_written += batch.len();
        }

        tracing::debug!(
            target: TRACING_TARGET_ORCHESTRATOR,
            report_id = %report_id,
            batch = stats.batches_read,
            rows = batch.len(),
            "Data batch transferred"
        );

        match batch.next_cursor() {
            Some(next) => cursor = Some(next.to_owned()),
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use martex_postgres::types::{DestinationType, StorageType};
    use super::*;
    use crate::mock::{MemoryReportStore, RecordingWriter, ScriptedReader, sample_rows};
    use crate::{Edition, ReaderFactory, RuntimeConfigBuilder, TypeResolver, WriterFactory};

    struct Harness {
        store: MemoryReportStore,
        reader: ScriptedReader,
        writer: RecordingWriter,
        runner: ReportRunner,
    }

    fn harness(reader: ScriptedReader, edition: Edition) -> Harness {
        harness_with(reader, RecordingWriter::new(), edition)
    }

    fn harness_with(reader: ScriptedReader, writer: RecordingWriter, edition: Edition) -> Harness {
        let store = MemoryReportStore::new();
        let config = RuntimeConfigBuilder::default().edition(edition).build().unwrap();

        let readers = TypeResolver::new([(
            StorageType::GoogleBigQuery,
            Arc::new(reader.clone()) as Arc<dyn ReaderFactory>,
        )]);
        let writers = TypeResolver::new([
            (
                DestinationType::GoogleSheets,
                Arc::new(writer.clone()) as Arc<dyn WriterFactory>,
            ),
            (
                DestinationType::Slack,
                Arc::new(writer.clone()) as Arc<dyn WriterFactory>,
            ),
        ]);

        let runner = ReportRunner::new(
            Arc::new(store.clone()),
            readers,
            writers,
            GracefulShutdown::new(),
            &config,
        );

        Harness {
            store,
            reader,
            writer,
            runner,
        }
    }

    fn seed(harness: &Harness, destination_type: DestinationType) -> Uuid {
        harness
            .store
            .seed_report(StorageType::GoogleBigQuery, destination_type)
            .report
            .id
    }

    #[tokio::test]
    async fn test_successful_run_transfers_every_row() {
        let h = harness(
            ScriptedReader::new(vec![sample_rows(3), sample_rows(0), sample_rows(2)]),
            Edition::Community,
        );
        let report_id = seed(&h, DestinationType::GoogleSheets);

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Success);
        assert!(outcome.error.is_none());
        assert!(outcome.persisted);
        assert_eq!(outcome.stats.batches_read, 3);
        // the empty batch is skipped
        assert_eq!(outcome.stats.batches_written, 2);
        assert_eq!(outcome.stats.rows_read, 5);
        assert_eq!(h.writer.rows_written(), 5);
        assert_eq!(h.reader.reads(), 3);
        assert_eq!(h.writer.finalize_calls(), 1);
        assert_eq!(h.reader.finalize_calls(), 1);

        let report = h.store.report(report_id).unwrap();
        assert_eq!(report.last_run_status, ReportRunStatus::Success);
        assert_eq!(report.runs_count, 1);
        assert_eq!(report.version, 3);

        let runs = h.store.runs_of(report_id);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ReportRunStatus::Success);
        assert!(runs[0].finished_at.is_some());
        assert_eq!(h.runner.shutdown().active_count(), 0);
    }

    #[tokio::test]
    async fn test_cursor_sequence_is_followed() {
        let h = harness(
            ScriptedReader::new(vec![sample_rows(1); 3]),
            Edition::Community,
        );
        let report_id = seed(&h, DestinationType::GoogleSheets);

        h.runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(h.reader.cursors(), [None, Some("1".into()), Some("2".into())]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let reader = ScriptedReader::new(vec![sample_rows(2), sample_rows(2)]);
        let h = harness(reader, Edition::Community);
        let report_id = seed(&h, DestinationType::GoogleSheets);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), cancel)
            .await
            .unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Cancelled);
        assert_eq!(outcome.error.as_ref().map(Error::kind), Some(ErrorKind::Cancelled));
        assert_eq!(h.reader.reads(), 0);
        assert_eq!(h.writer.batches_written(), 0);

        let report = h.store.report(report_id).unwrap();
        assert_eq!(report.last_run_status, ReportRunStatus::Cancelled);
        assert_eq!(report.last_run_error.as_deref(), Some("Report run was cancelled"));
    }

    #[tokio::test]
    async fn test_cancelled_between_batches() {
        let cancel = CancellationToken::new();
        let h = harness(
            ScriptedReader::new(vec![sample_rows(2); 4]).cancel_after(2, cancel.clone()),
            Edition::Community,
        );
        let report_id = seed(&h, DestinationType::GoogleSheets);

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), cancel)
            .await
            .unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Cancelled);
        assert_eq!(h.writer.batches_written(), 2);
        assert_eq!(h.writer.rows_written(), 4);
        assert_eq!(h.writer.finalize_calls(), 1);
        assert_eq!(h.writer.last_finalize_error(), Some(ErrorKind::Cancelled));
        assert_eq!(h.reader.finalize_calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active_run() {
        let reader = ScriptedReader::new(vec![sample_rows(2), sample_rows(2)]);
        let h = harness(reader, Edition::Community);
        let report_id = seed(&h, DestinationType::GoogleSheets);
        h.runner.shutdown().cancellation_token().cancel();

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ReportRunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_reader_failure_finalizes_and_records_error() {
        let h = harness(
            ScriptedReader::new(vec![sample_rows(2); 3]).fail_at(1, "Quota exceeded"),
            Edition::Community,
        );
        let report_id = seed(&h, DestinationType::GoogleSheets);

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Error);
        assert_eq!(h.writer.batches_written(), 1);
        assert_eq!(h.writer.finalize_calls(), 1);
        assert_eq!(h.writer.last_finalize_error(), Some(ErrorKind::External));
        assert_eq!(h.reader.finalize_calls(), 1);

        let report = h.store.report(report_id).unwrap();
        assert_eq!(report.last_run_status, ReportRunStatus::Error);
        assert_eq!(report.last_run_error.as_deref(), Some("Quota exceeded"));

        let run = &h.store.runs_of(report_id)[0];
        assert_eq!(run.error_count(), 1);
        assert_eq!(run.last_error_message(), Some("Quota exceeded"));
    }

    #[tokio::test]
    async fn test_writer_failure_stops_reading() {
        let h = harness_with(
            ScriptedReader::new(vec![sample_rows(2); 3]),
            RecordingWriter::new().fail_on_batch(1),
            Edition::Community,
        );
        let report_id = seed(&h, DestinationType::GoogleSheets);

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Error);
        assert_eq!(outcome.stats.batches_read, 2);
        assert_eq!(outcome.stats.rows_written, 2);
        assert_eq!(h.reader.reads(), 2);
        assert_eq!(h.writer.finalize_calls(), 1);
        assert_eq!(h.reader.finalize_calls(), 1);
        assert_eq!(
            h.store.report(report_id).unwrap().last_run_error.as_deref(),
            Some("Destination rejected batch")
        );
    }

    #[tokio::test]
    async fn test_unavailable_destination_is_restricted() {
        let h = harness(ScriptedReader::new(vec![sample_rows(1)]), Edition::Community);
        let report_id = seed(&h, DestinationType::Slack);

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Restricted);
        assert_eq!(h.reader.reads(), 0);
        assert_eq!(h.writer.finalize_calls(), 0);
        assert_eq!(
            h.store.report(report_id).unwrap().last_run_status,
            ReportRunStatus::Restricted
        );
    }

    #[tokio::test]
    async fn test_enterprise_edition_allows_messaging() {
        let h = harness(ScriptedReader::new(vec![sample_rows(1)]), Edition::Enterprise);
        let report_id = seed(&h, DestinationType::Slack);

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, ReportRunStatus::Success);
    }

    #[tokio::test]
    async fn test_unsupported_storage_is_error() {
        let h = harness(ScriptedReader::new(vec![sample_rows(1)]), Edition::Community);
        let report_id = h
            .store
            .seed_report(StorageType::Snowflake, DestinationType::GoogleSheets)
            .report
            .id;

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Error);
        assert_eq!(
            outcome.error.as_ref().map(Error::kind),
            Some(ErrorKind::UnsupportedType)
        );
    }

    #[tokio::test]
    async fn test_shutdown_mode_rejects_without_mutation() {
        let h = harness(ScriptedReader::new(vec![sample_rows(1)]), Edition::Community);
        let report_id = seed(&h, DestinationType::GoogleSheets);
        let before = h.store.report(report_id).unwrap();
        h.runner.shutdown().initiate();

        let error = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::ShuttingDown);
        assert_eq!(h.store.report(report_id).unwrap(), before);
        assert!(h.store.runs_of(report_id).is_empty());
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected_without_mutation() {
        let h = harness(ScriptedReader::new(vec![sample_rows(1)]), Edition::Community);
        let report_id = seed(&h, DestinationType::GoogleSheets);
        h.store.set_version(report_id, 3);

        let mut stale = h.store.report(report_id).unwrap();
        stale.version = 2;
        prepare_for_start(&mut stale, Timestamp::now()).unwrap();
        let new_run = NewReportRun {
            report_id,
            status: ReportRunStatus::Running,
            run_type: RunType::Manual,
            created_by: None,
            started_at: None,
        };

        let error = h.store.start_run(&stale, new_run.clone()).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::VersionConflict);
        let stored = h.store.report(report_id).unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.last_run_status, ReportRunStatus::Idle);
        assert!(h.store.runs_of(report_id).is_empty());

        let mut current = stored;
        prepare_for_start(&mut current, Timestamp::now()).unwrap();
        let started = h.store.start_run(&current, new_run).await.unwrap();
        assert_eq!(started.report.version, 4);
        assert_eq!(started.report.last_run_status, ReportRunStatus::Running);
    }

    #[tokio::test]
    async fn test_missing_report() {
        let h = harness(ScriptedReader::new(vec![]), Edition::Community);
        let error = h
            .runner
            .run(RunReportCommand::new(Uuid::now_v7()), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_failed_final_save_is_not_rethrown() {
        let h = harness(ScriptedReader::new(vec![sample_rows(1)]), Edition::Community);
        let report_id = seed(&h, DestinationType::GoogleSheets);
        h.store.fail_finish(true);

        let outcome = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, ReportRunStatus::Success);
        assert!(!outcome.persisted);
        assert_eq!(h.runner.shutdown().active_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_start_runs_once() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let h = harness(
            ScriptedReader::new(vec![sample_rows(1)]).with_prepare_gate(Arc::clone(&gate)),
            Edition::Community,
        );
        let report_id = seed(&h, DestinationType::GoogleSheets);

        let first = {
            let runner = h.runner.clone();
            tokio::spawn(async move {
                runner
                    .run(RunReportCommand::new(report_id), CancellationToken::new())
                    .await
            })
        };

        for _ in 0..100 {
            if h.runner.shutdown().active_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.runner.shutdown().active_count(), 1);

        let error = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::AlreadyRunning | ErrorKind::VersionConflict
        ));

        gate.notify_one();
        let outcome = tokio::time::timeout(Duration::from_secs(5), first)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status, ReportRunStatus::Success);
        assert_eq!(h.store.runs_of(report_id).len(), 1);
        assert_eq!(h.store.report(report_id).unwrap().runs_count, 1);
    }

    #[tokio::test]
    async fn test_report_edited_during_run_is_released() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let h = harness(
            ScriptedReader::new(vec![sample_rows(2)]).with_prepare_gate(Arc::clone(&gate)),
            Edition::Community,
        );
        let report_id = seed(&h, DestinationType::GoogleSheets);

        let first = {
            let runner = h.runner.clone();
            tokio::spawn(async move {
                runner
                    .run(RunReportCommand::new(report_id), CancellationToken::new())
                    .await
            })
        };

        for _ in 0..100 {
            if h.runner.shutdown().active_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.runner.shutdown().active_count(), 1);

        // a config edit lands while the run is in flight
        h.store.set_version(report_id, 99);
        gate.notify_one();

        let outcome = tokio::time::timeout(Duration::from_secs(5), first)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status, ReportRunStatus::Success);
        assert!(outcome.persisted);

        let report = h.store.report(report_id).unwrap();
        assert_eq!(report.last_run_status, ReportRunStatus::Success);
        assert_eq!(report.version, 100);

        gate.notify_one();
        let second = h
            .runner
            .run(RunReportCommand::new(report_id), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.status, ReportRunStatus::Success);
        assert_eq!(h.store.runs_of(report_id).len(), 2);
        assert_eq!(h.store.report(report_id).unwrap().runs_count, 2);
    }

    #[tokio::test]
    async fn test_run_in_background() {
        let h = harness(ScriptedReader::new(vec![sample_rows(4)]), Edition::Community);
        let report_id = seed(&h, DestinationType::GoogleSheets);

        let command = RunReportCommand::new(report_id)
            .with_run_type(RunType::Scheduled)
            .with_created_by(Uuid::now_v7());
        h.runner.run_in_background(command).await.unwrap();

        let runs = h.store.runs_of(report_id);
        assert_eq!(runs[0].run_type, RunType::Scheduled);
        assert!(runs[0].created_by.is_some());
        assert_eq!(runs[0].status, ReportRunStatus::Success);
        assert_eq!(h.writer.rows_written(), 4);
    }
}
