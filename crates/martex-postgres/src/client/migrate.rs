//! Embedded migration management.

use std::ops::DerefMut;
use std::time::{Duration, Instant};

use diesel::migration::MigrationSource;
use diesel::pg::Pg;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::MigrationHarness;
use tokio::task::spawn_blocking;

use super::custom_hooks;
use crate::{MIGRATIONS, PgClient, PgError, PgResult, TRACING_TARGET_MIGRATION};

/// Applied and pending migration versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Applied migration versions in chronological order
    pub applied_versions: Vec<String>,
    /// Embedded migration versions not applied yet
    pub pending_versions: Vec<String>,
}

impl MigrationStatus {
    /// Creates a new migration status.
    pub fn new(
        applied_versions: impl Into<Vec<String>>,
        pending_versions: impl Into<Vec<String>>,
    ) -> Self {
        Self {
            applied_versions: applied_versions.into(),
            pending_versions: pending_versions.into(),
        }
    }

    /// Returns the last applied migration version, if any.
    pub fn last_applied_version(&self) -> Option<&str> {
        self.applied_versions.last().map(String::as_str)
    }

    /// Returns the number of pending migrations.
    #[inline]
    pub fn pending_migrations(&self) -> usize {
        self.pending_versions.len()
    }

    /// Returns true if all embedded migrations have been applied.
    #[inline]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_versions.is_empty()
    }
}

/// Outcome of [`PgClientMigrationExt::run_pending_migrations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    /// Total duration of the migration operation
    pub duration: Duration,
    /// Versions applied by this call
    pub processed_versions: Vec<String>,
}

impl MigrationResult {
    /// Creates a migration result.
    pub fn new(duration: Duration, processed_versions: Vec<String>) -> Self {
        Self {
            duration,
            processed_versions,
        }
    }

    /// Returns whether nothing had to be applied.
    pub fn is_no_op(&self) -> bool {
        self.processed_versions.is_empty()
    }
}

/// Migration operations on [`PgClient`].
pub trait PgClientMigrationExt {
    /// Applies every embedded migration that is not applied yet.
    ///
    /// Safe to call on every startup.
    fn run_pending_migrations(&self) -> impl Future<Output = PgResult<MigrationResult>> + Send;

    /// Compares the embedded migrations with `__diesel_schema_migrations`.
    fn get_migration_status(&self) -> impl Future<Output = PgResult<MigrationStatus>> + Send;

    /// Fails if the migration bookkeeping table is missing.
    fn verify_schema_integrity(&self) -> impl Future<Output = PgResult<()>> + Send;
}

impl PgClientMigrationExt for PgClient {
    #[tracing::instrument(skip(self), target = TRACING_TARGET_MIGRATION)]
    async fn run_pending_migrations(&self) -> PgResult<MigrationResult> {
        let start_time = Instant::now();
        let mut conn = self.get_pooled_connection().await?;
        let initial_status = migration_status(&mut conn).await?;

        if initial_status.is_up_to_date() {
            tracing::info!(
                target: TRACING_TARGET_MIGRATION,
                "Database schema is up to date"
            );
            return Ok(MigrationResult::new(start_time.elapsed(), vec![]));
        }

        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            pending_migrations = initial_status.pending_migrations(),
            "Applying pending migrations"
        );

        custom_hooks::pre_migrate(&mut conn);
        let mut conn: AsyncConnectionWrapper<_> = conn.into();
        let joined = spawn_blocking(move || {
            let versions = conn
                .run_pending_migrations(MIGRATIONS)
                .map(|versions| versions.into_iter().map(|v| v.to_string()).collect::<Vec<_>>());
            (versions, conn)
        })
        .await;

        let duration = start_time.elapsed();
        let (versions, mut conn) = joined.map_err(|err| {
            tracing::error!(
                target: TRACING_TARGET_MIGRATION,
                duration = ?duration,
                error = %err,
                "Migration task panicked"
            );
            PgError::Migration(err.into())
        })?;

        custom_hooks::post_migrate(conn.deref_mut());
        let versions = versions.map_err(|err| {
            tracing::error!(
                target: TRACING_TARGET_MIGRATION,
                duration = ?duration,
                error = %err,
                "Database migration failed"
            );
            PgError::Migration(err)
        })?;

        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            duration = ?duration,
            migrations_count = versions.len(),
            "Database migrations applied"
        );

        Ok(MigrationResult::new(duration, versions))
    }

    async fn get_migration_status(&self) -> PgResult<MigrationStatus> {
        let mut conn = self.get_pooled_connection().await?;
        migration_status(&mut conn).await
    }

    async fn verify_schema_integrity(&self) -> PgResult<()> {
        let mut conn = self.get_pooled_connection().await?;
        if !migration_table_exists(&mut conn).await? {
            tracing::warn!(
                target: TRACING_TARGET_MIGRATION,
                "Migration table does not exist, database may not be initialized"
            );
            return Err(PgError::Migration(
                "Migration table __diesel_schema_migrations does not exist".into(),
            ));
        }

        Ok(())
    }
}

/// Versions of all migrations compiled into the binary.
fn embedded_versions() -> PgResult<Vec<String>> {
    let migrations = MigrationSource::<Pg>::migrations(&MIGRATIONS).map_err(PgError::Migration)?;
    Ok(migrations
        .iter()
        .map(|migration| migration.name().version().to_string())
        .collect())
}

async fn migration_status(conn: &mut AsyncPgConnection) -> PgResult<MigrationStatus> {
    let applied_versions = if migration_table_exists(conn).await? {
        applied_versions(conn).await?
    } else {
        Vec::new()
    };

    let pending_versions: Vec<String> = embedded_versions()?
        .into_iter()
        .filter(|version| !applied_versions.contains(version))
        .collect();

    Ok(MigrationStatus::new(applied_versions, pending_versions))
}

async fn migration_table_exists(conn: &mut AsyncPgConnection) -> PgResult<bool> {
    #[derive(diesel::QueryableByName)]
    struct ExistsResult {
        #[diesel(sql_type = diesel::sql_types::Bool)]
        exists: bool,
    }

    let result = diesel::sql_query(
        "SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_name = '__diesel_schema_migrations'
         ) as exists",
    )
    .get_result::<ExistsResult>(conn)
    .await?;

    Ok(result.exists)
}

async fn applied_versions(conn: &mut AsyncPgConnection) -> PgResult<Vec<String>> {
    #[derive(diesel::QueryableByName)]
    struct MigrationVersion {
        #[diesel(sql_type = diesel::sql_types::Text)]
        version: String,
    }

    let versions = diesel::sql_query("SELECT version FROM __diesel_schema_migrations ORDER BY version")
        .get_results::<MigrationVersion>(conn)
        .await?
        .into_iter()
        .map(|row| row.version)
        .collect();

    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_migrations_are_listed() {
        let versions = embedded_versions().unwrap();
        assert!(!versions.is_empty());
        assert!(versions.iter().all(|v| v.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn test_migration_status() {
        let status = MigrationStatus::new(vec!["001".to_string()], vec!["002".to_string()]);
        assert!(!status.is_up_to_date());
        assert_eq!(status.last_applied_version(), Some("001"));
        assert_eq!(status.pending_migrations(), 1);

        assert!(MigrationResult::new(Duration::ZERO, vec![]).is_no_op());
    }
}
