//! Report run repository.

use std::future::Future;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::model::{NewReportRun, ReportRun, UpdateReportRun};
use crate::{PgConnection, PgError, PgResult, schema};

/// Repository for report run database operations.
pub trait ReportRunRepository {
    /// Creates a new run record.
    fn create_report_run(
        &mut self,
        new_run: NewReportRun,
    ) -> impl Future<Output = PgResult<ReportRun>> + Send;

    /// Updates a run record.
    fn update_report_run(
        &mut self,
        run_id: Uuid,
        updates: UpdateReportRun,
    ) -> impl Future<Output = PgResult<ReportRun>> + Send;
}

impl ReportRunRepository for PgConnection {
    async fn create_report_run(&mut self, new_run: NewReportRun) -> PgResult<ReportRun> {
        use schema::report_runs;

        diesel::insert_into(report_runs::table)
            .values(&new_run)
            .returning(ReportRun::as_returning())
            .get_result(self)
            .await
            .map_err(PgError::from)
    }

    async fn update_report_run(
        &mut self,
        run_id: Uuid,
        updates: UpdateReportRun,
    ) -> PgResult<ReportRun> {
        use schema::report_runs::{self, dsl};

        diesel::update(report_runs::table.filter(dsl::id.eq(run_id)))
            .set(&updates)
            .returning(ReportRun::as_returning())
            .get_result(self)
            .await
            .map_err(PgError::from)
    }
}
