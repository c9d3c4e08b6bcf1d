//! Command handlers.

use anyhow::Context;
use martex_oauth::Error;
use martex_postgres::PgClientMigrationExt;
use martex_postgres::types::{ReportRunStatus, RunType};
use martex_runtime::{GracefulShutdown, RunReportCommand};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::TRACING_TARGET_COMMAND;
use crate::services::Services;
use crate::shutdown::drain_on_signal;

/// Applies pending migrations.
pub async fn migrate(services: &Services) -> anyhow::Result<()> {
    let result = services
        .pg_client
        .run_pending_migrations()
        .await
        .context("failed to apply database migrations")?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        applied = result.processed_versions.len(),
        duration_ms = result.duration.as_millis() as u64,
        "Migrations applied"
    );
    Ok(())
}

/// Runs one report, cancelling it cooperatively on a shutdown signal.
pub async fn run_report(
    services: &Services,
    report_id: Uuid,
    run_type: RunType,
    created_by: Option<Uuid>,
) -> anyhow::Result<()> {
    let shutdown = GracefulShutdown::new();
    let runner = services.report_runner(shutdown.clone())?;
    let timeout = services.runtime_config.shutdown_timeout;

    let watcher = tokio::spawn(drain_on_signal(shutdown, timeout));

    let mut command = RunReportCommand::new(report_id).with_run_type(run_type);
    if let Some(created_by) = created_by {
        command = command.with_created_by(created_by);
    }

    let result = runner.run(command, CancellationToken::new()).await;
    watcher.abort();

    let outcome = result.map_err(public_error).context("report run was not started")?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        report_id = %report_id,
        run_id = %outcome.run_id,
        status = %outcome.status,
        batches = outcome.stats.batches_read,
        rows = outcome.stats.rows_written,
        persisted = outcome.persisted,
        "Report run finished"
    );

    match (outcome.status, outcome.error) {
        (ReportRunStatus::Success, _) => Ok(()),
        (status, Some(error)) => {
            Err(public_error(error)).with_context(|| format!("report run ended as {status}"))
        }
        (status, None) => anyhow::bail!("report run ended as {status}"),
    }
}

/// Refreshes the access token of a credential.
pub async fn refresh(services: &Services, credential_id: Uuid) -> anyhow::Result<()> {
    let credential = services
        .token_flow
        .refresh_tokens_by_credential_id(credential_id)
        .await
        .map_err(public_error)
        .context("failed to refresh credential")?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        credential_id = %credential.id,
        expires_at = ?credential.expires_at,
        "Credential refreshed"
    );
    Ok(())
}

/// Revokes a credential and detaches it from its storages and destinations.
pub async fn revoke(services: &Services, credential_id: Uuid) -> anyhow::Result<()> {
    services
        .token_flow
        .revoke_credential(credential_id)
        .await
        .map_err(public_error)
        .context("failed to revoke credential")?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        credential_id = %credential_id,
        "Credential revoked"
    );
    Ok(())
}

/// Logs the full error and keeps only the caller-safe message.
fn public_error(error: Error) -> anyhow::Error {
    tracing::debug!(
        target: TRACING_TARGET_COMMAND,
        kind = error.kind_str(),
        error = %error,
        "Command failed"
    );
    anyhow::anyhow!(error.public_message())
}
