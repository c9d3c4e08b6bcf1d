//! Persistence of reports and their runs.

use diesel_async::scoped_futures::ScopedFutureExt;
use martex_postgres::model::{
    NewReportRun, Report, ReportContext, ReportRun, UpdateReport, UpdateReportRun,
};
use martex_postgres::query::{ReportRepository, ReportRunRepository};
use martex_postgres::{PgClient, PgError};
use uuid::Uuid;

use crate::run::ReportRunState;
use crate::{Result, TRACING_TARGET_STORE};

/// A report persisted in the `RUNNING` state with its new run record.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedRun {
    /// The report as stored, version incremented.
    pub report: Report,
    /// The new run record.
    pub run: ReportRun,
}

/// Terminal bookkeeping of a run.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    /// Report to update.
    pub report_id: Uuid,
    /// Report bookkeeping columns.
    pub report_changes: UpdateReport,
    /// Run record to update.
    pub run_id: Uuid,
    /// Run record changes.
    pub run_changes: UpdateReportRun,
}

impl From<&ReportRunState> for RunCompletion {
    fn from(state: &ReportRunState) -> Self {
        Self {
            report_id: state.report().id,
            report_changes: state.report_changes(),
            run_id: state.run().id,
            run_changes: state.run_changes(),
        }
    }
}

/// Storage used by the report runner.
#[async_trait::async_trait]
pub trait ReportStore: Send + Sync {
    /// Loads a report with its data mart, storage and destination.
    async fn load_report_context(&self, report_id: Uuid) -> Result<Option<ReportContext>>;

    /// Persists `report`, already moved to `RUNNING`, and creates the run record.
    ///
    /// The report write only succeeds if the stored version still equals
    /// `report.version`; otherwise it fails with `VersionConflict` and nothing
    /// is written.
    async fn start_run(&self, report: &Report, new_run: NewReportRun) -> Result<StartedRun>;

    /// Persists the terminal state of the report and the run together.
    ///
    /// The report is matched on its `RUNNING` status, not on its version:
    /// edits made while the run was in flight must not leave it stuck in
    /// `RUNNING`. A report that is gone or no longer running is left as is
    /// and only the run record is updated.
    async fn finish_run(&self, completion: RunCompletion) -> Result<()>;
}

/// [`ReportStore`] backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgReportStore {
    pg_client: PgClient,
}

impl PgReportStore {
    /// Creates a store on top of the given client.
    pub fn new(pg_client: PgClient) -> Self {
        Self { pg_client }
    }
}

#[async_trait::async_trait]
impl ReportStore for PgReportStore {
    async fn load_report_context(&self, report_id: Uuid) -> Result<Option<ReportContext>> {
        let mut conn = self.pg_client.get_connection().await?;
        Ok(conn.load_report_context(report_id).await?)
    }

    async fn start_run(&self, report: &Report, new_run: NewReportRun) -> Result<StartedRun> {
        let mut conn = self.pg_client.get_connection().await?;
        let report_id = report.id;
        let expected_version = report.version;
        let changes = report.run_changes();

        let started = conn
            .transaction::<_, PgError, _>(|conn| {
                async move {
                    let report = conn
                        .update_report_versioned(report_id, expected_version, changes)
                        .await?;
                    let run = conn.create_report_run(new_run).await?;
                    Ok(StartedRun { report, run })
                }
                .scope_boxed()
            })
            .await?;

        tracing::debug!(
            target: TRACING_TARGET_STORE,
            report_id = %report_id,
            run_id = %started.run.id,
            version = started.report.version,
            "Report run persisted as running"
        );
        Ok(started)
    }

    async fn finish_run(&self, completion: RunCompletion) -> Result<()> {
        let mut conn = self.pg_client.get_connection().await?;
        let RunCompletion {
            report_id,
            report_changes,
            run_id,
            run_changes,
        } = completion;

        let report = conn
            .transaction::<_, PgError, _>(|conn| {
                async move {
                    let report = conn.finish_running_report(report_id, report_changes).await?;
                    conn.update_report_run(run_id, run_changes).await?;
                    Ok(report)
                }
                .scope_boxed()
            })
            .await?;

        match report {
            Some(report) => tracing::debug!(
                target: TRACING_TARGET_STORE,
                report_id = %report_id,
                run_id = %run_id,
                version = report.version,
                "Report run result persisted"
            ),
            None => tracing::warn!(
                target: TRACING_TARGET_STORE,
                report_id = %report_id,
                run_id = %run_id,
                "Report was no longer running, only the run record was updated"
            ),
        }
        Ok(())
    }
}
