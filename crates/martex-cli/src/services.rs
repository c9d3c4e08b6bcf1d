//! Wiring of the database, credential and runtime services.

use std::sync::Arc;

use anyhow::Context;
use martex_oauth::{
    AuthClientProvider, CredentialStore, GoogleTokenEndpoint, PgCredentialStore,
    RefreshCoordinator, TokenFlow,
};
use martex_postgres::PgClient;
use martex_postgres::types::{DestinationType, StorageType};
use martex_runtime::provider::{
    BigQueryReaderFactory, GoogleSheetsWriterFactory, SlackWriterFactory,
};
use martex_runtime::{
    GracefulShutdown, PgReportStore, ReaderFactory, ReportRunner, RuntimeConfig, TypeResolver,
    WriterFactory,
};

use crate::TRACING_TARGET_STARTUP;
use crate::config::Cli;

/// Everything a command needs, built once from the configuration.
pub struct Services {
    /// Report database client.
    pub pg_client: PgClient,
    /// Refresh and revoke flows.
    pub token_flow: Arc<TokenFlow>,
    /// Report runner configuration.
    pub runtime_config: RuntimeConfig,
}

impl Services {
    /// Connects the database pool and assembles the token flow.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let runtime_config = cli.runtime.build()?;

        cli.oauth
            .validate()
            .context("invalid OAuth configuration")?;

        let pg_client = cli
            .postgres
            .clone()
            .build()
            .context("failed to create database connection pool")?;

        let store: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pg_client.clone()));
        let endpoint = GoogleTokenEndpoint::new(&cli.oauth)
            .context("failed to create token endpoint client")?;
        let token_flow = Arc::new(TokenFlow::new(store, Arc::new(endpoint), cli.oauth.clone()));

        Ok(Self {
            pg_client,
            token_flow,
            runtime_config,
        })
    }

    /// Builds a report runner with every built-in reader and writer.
    pub fn report_runner(&self, shutdown: GracefulShutdown) -> anyhow::Result<ReportRunner> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("martex/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;

        let auth = Arc::new(AuthClientProvider::new(
            Arc::clone(&self.token_flow),
            RefreshCoordinator::new(),
            http.clone(),
        ));

        let readers = TypeResolver::new([(
            StorageType::GoogleBigQuery,
            Arc::new(BigQueryReaderFactory::new(
                Arc::clone(&auth),
                self.runtime_config.batch_size,
            )) as Arc<dyn ReaderFactory>,
        )]);

        let writers = TypeResolver::new([
            (
                DestinationType::GoogleSheets,
                Arc::new(GoogleSheetsWriterFactory::new(Arc::clone(&auth)))
                    as Arc<dyn WriterFactory>,
            ),
            (
                DestinationType::Slack,
                Arc::new(SlackWriterFactory::new(
                    Arc::clone(self.token_flow.store()),
                    http,
                )) as Arc<dyn WriterFactory>,
            ),
        ]);

        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            readers = ?readers,
            writers = ?writers,
            edition = %self.runtime_config.edition,
            "Report providers registered"
        );

        Ok(ReportRunner::new(
            Arc::new(PgReportStore::new(self.pg_client.clone())),
            readers,
            writers,
            shutdown,
            &self.runtime_config,
        ))
    }
}
