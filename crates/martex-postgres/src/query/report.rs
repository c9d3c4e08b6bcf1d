//! Report repository: context loading and the run bookkeeping writes.

use std::future::Future;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::model::{DataDestination, DataMart, DataStorage, Report, ReportContext, UpdateReport};
use crate::types::ReportRunStatus;
use crate::{PgConnection, PgError, PgResult, TRACING_TARGET_QUERY, schema};

/// Repository for report database operations.
pub trait ReportRepository {
    /// Loads a report together with its data mart, storage and destination.
    fn load_report_context(
        &mut self,
        report_id: Uuid,
    ) -> impl Future<Output = PgResult<Option<ReportContext>>> + Send;

    /// Writes `changes` only if the stored version still equals `expected_version`.
    ///
    /// On success the version is incremented and the updated row returned.
    /// Returns [`PgError::VersionConflict`] when no row matched.
    fn update_report_versioned(
        &mut self,
        report_id: Uuid,
        expected_version: i32,
        changes: UpdateReport,
    ) -> impl Future<Output = PgResult<Report>> + Send;

    /// Writes the terminal bookkeeping of a run to a report still in `RUNNING`.
    ///
    /// Matches on the status instead of the version, so edits made to the
    /// report while it ran do not keep it locked. The version is still
    /// incremented. Returns `None` when the report is gone or not running.
    fn finish_running_report(
        &mut self,
        report_id: Uuid,
        changes: UpdateReport,
    ) -> impl Future<Output = PgResult<Option<Report>>> + Send;
}

impl ReportRepository for PgConnection {
    #[tracing::instrument(skip(self), target = TRACING_TARGET_QUERY)]
    async fn load_report_context(&mut self, report_id: Uuid) -> PgResult<Option<ReportContext>> {
        use schema::{data_destinations, data_marts, data_storages, reports};

        let row = reports::table
            .inner_join(data_marts::table.inner_join(data_storages::table))
            .inner_join(data_destinations::table)
            .filter(reports::id.eq(report_id))
            .select((
                Report::as_select(),
                DataMart::as_select(),
                DataStorage::as_select(),
                DataDestination::as_select(),
            ))
            .first::<(Report, DataMart, DataStorage, DataDestination)>(self)
            .await
            .optional()
            .map_err(PgError::from)?;

        Ok(row.map(|(report, data_mart, storage, destination)| ReportContext {
            report,
            data_mart,
            storage,
            destination,
        }))
    }

    #[tracing::instrument(skip(self, changes), target = TRACING_TARGET_QUERY)]
    async fn update_report_versioned(
        &mut self,
        report_id: Uuid,
        expected_version: i32,
        changes: UpdateReport,
    ) -> PgResult<Report> {
        use diesel::dsl::now;
        use schema::reports::{self, dsl};

        let updated = diesel::update(
            reports::table
                .filter(dsl::id.eq(report_id))
                .filter(dsl::version.eq(expected_version)),
        )
        .set((
            &changes,
            dsl::version.eq(dsl::version + 1),
            dsl::updated_at.eq(now),
        ))
        .returning(Report::as_returning())
        .get_result(self)
        .await
        .optional()
        .map_err(PgError::from)?;

        updated.ok_or_else(|| {
            tracing::debug!(
                target: TRACING_TARGET_QUERY,
                report_id = %report_id,
                expected_version,
                "Version-checked report update matched no row"
            );
            PgError::VersionConflict {
                entity: "report",
                id: report_id,
                expected: expected_version,
            }
        })
    }

    #[tracing::instrument(skip(self, changes), target = TRACING_TARGET_QUERY)]
    async fn finish_running_report(
        &mut self,
        report_id: Uuid,
        changes: UpdateReport,
    ) -> PgResult<Option<Report>> {
        use diesel::dsl::now;
        use schema::reports::{self, dsl};

        diesel::update(
            reports::table
                .filter(dsl::id.eq(report_id))
                .filter(dsl::last_run_status.eq(ReportRunStatus::Running)),
        )
        .set((
            &changes,
            dsl::version.eq(dsl::version + 1),
            dsl::updated_at.eq(now),
        ))
        .returning(Report::as_returning())
        .get_result(self)
        .await
        .optional()
        .map_err(PgError::from)
    }
}
