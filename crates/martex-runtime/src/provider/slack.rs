//! Slack writer (enterprise edition).

use std::sync::Arc;

use martex_oauth::CredentialStore;
use martex_postgres::model::ReportContext;
use martex_postgres::types::CredentialType;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    ReportDataBatch, ReportDataDescription, ReportDataRow, ReportWriter, WriterFactory,
    config_str, require_config_str,
};
use crate::run::RunLogger;
use crate::{Error, ErrorKind, Result, TRACING_TARGET_PROVIDER};

/// Rows included in the message preview by default.
const DEFAULT_PREVIEW_ROWS: usize = 10;

/// When a messaging destination sends its report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportCondition {
    /// Always send.
    #[default]
    Always,
    /// Send only when the result has no rows.
    ResultIsEmpty,
    /// Send only when the result has rows.
    ResultIsNotEmpty,
}

impl ReportCondition {
    /// Returns whether a report with or without data should be sent.
    pub fn should_send(self, has_data: bool) -> bool {
        match self {
            ReportCondition::Always => true,
            ReportCondition::ResultIsEmpty => !has_data,
            ReportCondition::ResultIsNotEmpty => has_data,
        }
    }
}

/// Creates [`SlackWriter`]s.
#[derive(Clone)]
pub struct SlackWriterFactory {
    credentials: Arc<dyn CredentialStore>,
    http: Client,
    preview_rows: usize,
}

impl SlackWriterFactory {
    /// Creates a factory reading webhook URLs from `credentials`.
    pub fn new(credentials: Arc<dyn CredentialStore>, http: Client) -> Self {
        Self {
            credentials,
            http,
            preview_rows: DEFAULT_PREVIEW_ROWS,
        }
    }

    /// Overrides the number of rows shown in the message.
    #[must_use]
    pub fn with_preview_rows(mut self, preview_rows: usize) -> Self {
        self.preview_rows = preview_rows;
        self
    }
}

impl WriterFactory for SlackWriterFactory {
    fn create_writer(&self) -> Box<dyn ReportWriter> {
        Box::new(SlackWriter {
            credentials: Arc::clone(&self.credentials),
            http: self.http.clone(),
            preview_rows: self.preview_rows,
            message: None,
            logger: None,
        })
    }
}

/// Posts a summary of the report to a Slack incoming webhook.
///
/// Rows are counted and a bounded preview is buffered; nothing is sent until
/// the transfer succeeded.
pub struct SlackWriter {
    credentials: Arc<dyn CredentialStore>,
    http: Client,
    preview_rows: usize,
    message: Option<PendingMessage>,
    logger: Option<RunLogger>,
}

#[derive(Debug)]
struct PendingMessage {
    webhook_url: String,
    condition: ReportCondition,
    title: String,
    source: String,
    headers: Vec<String>,
    preview: Vec<ReportDataRow>,
    total_rows: usize,
}

impl PendingMessage {
    fn render(&self) -> String {
        let mut text = format!(
            "*{}*\n{} rows exported from _{}_",
            self.title, self.total_rows, self.source
        );

        if !self.preview.is_empty() {
            text.push_str("\n```\n");
            text.push_str(&self.headers.join(" | "));
            for row in &self.preview {
                text.push('\n');
                let cells: Vec<String> = row.iter().map(preview_cell).collect();
                text.push_str(&cells.join(" | "));
            }
            text.push_str("\n```");
        }

        if self.total_rows > self.preview.len() && !self.preview.is_empty() {
            text.push_str(&format!(
                "\n_{} more rows not shown_",
                self.total_rows - self.preview.len()
            ));
        }

        text
    }
}

fn preview_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl SlackWriter {
    fn log(&self, message: impl Into<String>) {
        if let Some(logger) = &self.logger {
            logger.log(message);
        }
    }
}

#[async_trait::async_trait]
impl ReportWriter for SlackWriter {
    fn set_run_logger(&mut self, logger: RunLogger) {
        self.logger = Some(logger);
    }

    async fn prepare_to_write_report(
        &mut self,
        context: &ReportContext,
        description: &ReportDataDescription,
    ) -> Result<()> {
        let config = &context.report.destination_config;
        let condition = match config.get("reportCondition") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|err| {
                Error::from_source(ErrorKind::InvalidInput, err)
                    .with_message("Invalid Slack configuration: unknown `reportCondition`")
            })?,
            None => ReportCondition::default(),
        };

        let credential = match context.destination.credential_id {
            Some(credential_id) => self.credentials.find_credential(credential_id).await?,
            None => None,
        };
        let credential = credential
            .filter(|credential| credential.credential_type == CredentialType::Webhook)
            .ok_or_else(|| {
                Error::new(ErrorKind::CredentialsNotFound)
                    .with_message("Invalid Slack credentials provided")
            })?;
        let webhook_url = require_config_str(&credential.secret, "webhookUrl", "Slack")?;

        self.message = Some(PendingMessage {
            webhook_url: webhook_url.to_owned(),
            condition,
            title: config_str(config, "title")
                .unwrap_or(&context.report.title)
                .to_owned(),
            source: context.data_mart.title.clone(),
            headers: description
                .headers
                .iter()
                .map(|header| header.display_name().to_owned())
                .collect(),
            preview: Vec::new(),
            total_rows: 0,
        });
        Ok(())
    }

    async fn write_report_data_batch(&mut self, batch: &ReportDataBatch) -> Result<()> {
        let preview_rows = self.preview_rows;
        let message = self
            .message
            .as_mut()
            .ok_or_else(|| Error::internal("Slack writer was not prepared"))?;

        let room = preview_rows.saturating_sub(message.preview.len());
        message
            .preview
            .extend(batch.rows.iter().take(room).cloned());
        message.total_rows += batch.len();
        Ok(())
    }

    async fn finalize(&mut self, error: Option<&Error>) -> Result<()> {
        let Some(message) = self.message.take() else {
            return Ok(());
        };

        if let Some(error) = error {
            tracing::warn!(
                target: TRACING_TARGET_PROVIDER,
                error = %error,
                "Error sending report data to Slack"
            );
            return Ok(());
        }

        if !message.condition.should_send(message.total_rows > 0) {
            self.log("Report processing is ignored due to sending condition");
            return Ok(());
        }

        let response = self
            .http
            .post(&message.webhook_url)
            .json(&json!({ "text": message.render() }))
            .send()
            .await
            .map_err(|err| {
                Error::from_source(ErrorKind::Network, err)
                    .with_message("Failed to reach the Slack webhook")
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::new(ErrorKind::External)
                .with_message(format!("Slack webhook rejected the report: {status}")));
        }

        self.log(format!("Report sent to Slack ({} rows)", message.total_rows));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(total_rows: usize, preview: Vec<ReportDataRow>) -> PendingMessage {
        PendingMessage {
            webhook_url: "https://hooks.slack.test/T000".into(),
            condition: ReportCondition::Always,
            title: "Weekly revenue".into(),
            source: "Orders".into(),
            headers: vec!["day".into(), "revenue".into()],
            preview,
            total_rows,
        }
    }

    #[test]
    fn test_report_condition() {
        assert!(ReportCondition::Always.should_send(false));
        assert!(ReportCondition::ResultIsEmpty.should_send(false));
        assert!(!ReportCondition::ResultIsEmpty.should_send(true));
        assert!(!ReportCondition::ResultIsNotEmpty.should_send(false));

        let parsed: ReportCondition = serde_json::from_value(json!("RESULT_IS_NOT_EMPTY")).unwrap();
        assert_eq!(parsed, ReportCondition::ResultIsNotEmpty);
    }

    #[test]
    fn test_render_with_preview() {
        let text = message(5, vec![vec![json!("mon"), json!(10)], vec![json!("tue"), json!(null)]])
            .render();

        assert!(text.starts_with("*Weekly revenue*\n5 rows exported from _Orders_"));
        assert!(text.contains("day | revenue\nmon | 10\ntue | \n"));
        assert!(text.ends_with("_3 more rows not shown_"));
    }

    #[test]
    fn test_render_without_rows() {
        let text = message(0, Vec::new()).render();
        assert_eq!(text, "*Weekly revenue*\n0 rows exported from _Orders_");
    }
}
