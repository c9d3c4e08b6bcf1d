//! Google Sheets writer.

use std::sync::Arc;

use martex_oauth::{AuthClientProvider, AuthorizedClient};
use martex_postgres::model::ReportContext;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{
    ReportDataBatch, ReportDataDescription, ReportWriter, WriterFactory, require_config_str,
};
use crate::run::RunLogger;
use crate::{Error, ErrorKind, Result, TRACING_TARGET_PROVIDER};

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4";

const SPREADSHEET_FIELDS: &str = "properties(title,timeZone),\
    sheets(properties(sheetId,title,gridProperties(rowCount,columnCount)))";

/// Returns the A1 range for `rows` rows starting at 1-based `first_row`.
///
/// The end row is one past the last data row, so the range spans `rows + 1`
/// rows; the values written only fill the first `rows`. Quotes in the sheet
/// title are doubled as the A1 notation requires.
pub fn row_range(sheet_title: &str, first_row: usize, rows: usize) -> String {
    let title = sheet_title.replace('\'', "''");
    format!("'{title}'!{first_row}:{}", first_row + rows)
}

/// Creates [`GoogleSheetsWriter`]s.
#[derive(Debug, Clone)]
pub struct GoogleSheetsWriterFactory {
    auth: Arc<AuthClientProvider>,
    base_url: String,
}

impl GoogleSheetsWriterFactory {
    /// Creates a factory.
    pub fn new(auth: Arc<AuthClientProvider>) -> Self {
        Self {
            auth,
            base_url: DEFAULT_BASE_URL.to_owned(),
        }
    }

    /// Overrides the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl WriterFactory for GoogleSheetsWriterFactory {
    fn create_writer(&self) -> Box<dyn ReportWriter> {
        Box::new(GoogleSheetsWriter {
            auth: Arc::clone(&self.auth),
            base_url: self.base_url.clone(),
            target: None,
            logger: None,
        })
    }
}

/// Replaces the content of one sheet with the report data.
///
/// The sheet is cleared and the header row written during preparation; every
/// batch then lands on the rows directly below the previous one. A client is
/// requested from the [`AuthClientProvider`] for every batch, so long exports
/// keep working across token refreshes.
#[derive(Debug)]
pub struct GoogleSheetsWriter {
    auth: Arc<AuthClientProvider>,
    base_url: String,
    target: Option<SheetTarget>,
    logger: Option<RunLogger>,
}

#[derive(Debug)]
struct SheetTarget {
    credential_id: Uuid,
    spreadsheet_id: String,
    spreadsheet_title: String,
    sheet_id: i64,
    sheet_title: String,
    available_rows: usize,
    /// Rows written so far, header included.
    written_rows: usize,
}

impl SheetTarget {
    fn data_rows(&self) -> usize {
        self.written_rows.saturating_sub(1)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    properties: SpreadsheetProperties,
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Default, Deserialize)]
struct SpreadsheetProperties {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    row_count: usize,
    #[serde(default)]
    column_count: usize,
}

impl GoogleSheetsWriter {
    fn target(&mut self) -> Result<&mut SheetTarget> {
        self.target
            .as_mut()
            .ok_or_else(|| Error::internal("Google Sheets writer was not prepared"))
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str, suffix: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|err| {
            Error::from_source(ErrorKind::NotConfigured, err)
                .with_message("Invalid Google Sheets base URL")
        })?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| Error::internal("Google Sheets base URL cannot have a path"))?;
            segments.pop_if_empty().push("spreadsheets").push(spreadsheet_id);
            segments.extend(suffix);
        }

        Ok(url)
    }

    async fn batch_update(
        &self,
        client: &AuthorizedClient,
        spreadsheet_id: &str,
        requests: Vec<Value>,
    ) -> Result<()> {
        let mut url = self.spreadsheet_url(spreadsheet_id, &[])?;
        let last = format!("{spreadsheet_id}:batchUpdate");
        url.path_segments_mut()
            .map_err(|()| Error::internal("Google Sheets base URL cannot have a path"))?
            .pop()
            .push(&last);

        client
            .send(client.post(url.as_str()).json(&json!({ "requests": requests })))
            .await?;
        Ok(())
    }

    async fn update_values(
        &self,
        client: &AuthorizedClient,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<Value>>,
    ) -> Result<()> {
        let url = self.spreadsheet_url(spreadsheet_id, &["values", range])?;
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });

        client
            .send(
                client
                    .put(url.as_str())
                    .query(&[("valueInputOption", "USER_ENTERED")])
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn append_rows(&mut self, rows: usize) -> Result<()> {
        let target = self.target()?;
        let missing = (target.written_rows + rows).saturating_sub(target.available_rows);
        if missing == 0 {
            return Ok(());
        }

        let credential_id = target.credential_id;
        let spreadsheet_id = target.spreadsheet_id.clone();
        let request = append_dimension(target.sheet_id, "ROWS", missing);

        let client = self.auth.get_client(credential_id).await?;
        self.batch_update(&client, &spreadsheet_id, vec![request]).await?;
        self.target()?.available_rows += missing;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReportWriter for GoogleSheetsWriter {
    fn set_run_logger(&mut self, logger: RunLogger) {
        self.logger = Some(logger);
    }

    async fn prepare_to_write_report(
        &mut self,
        context: &ReportContext,
        description: &ReportDataDescription,
    ) -> Result<()> {
        let config = &context.report.destination_config;
        let spreadsheet_id = require_config_str(config, "spreadsheetId", "Google Sheets")?;
        let sheet_id = config
            .get("sheetId")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::invalid_input("Invalid Google Sheets configuration: missing `sheetId`")
            })?;

        if description.headers.is_empty() {
            return Err(Error::invalid_input(
                "Cannot prepare report: Data mart has no connected fields",
            ));
        }

        let credential_id = context.destination.credential_id.ok_or_else(|| {
            Error::new(ErrorKind::CredentialsNotFound)
                .with_message("No authentication method available for Google Sheets")
        })?;
        let client = self.auth.get_client(credential_id).await?;

        let mut url = self.spreadsheet_url(spreadsheet_id, &[])?;
        url.query_pairs_mut().append_pair("fields", SPREADSHEET_FIELDS);
        let spreadsheet: Spreadsheet = client
            .send_json(client.get(url.as_str()))
            .await
            .map_err(|err| {
                let message = format!("Failed to access spreadsheet {spreadsheet_id}: {err}");
                Error::new(ErrorKind::NotFound).with_message(message).with_source(err)
            })?;

        let sheet = spreadsheet
            .sheets
            .into_iter()
            .find(|sheet| sheet.properties.sheet_id == sheet_id)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound).with_message(format!(
                    "Failed to find sheet {sheet_id} in spreadsheet {spreadsheet_id}"
                ))
            })?;

        let grid = &sheet.properties.grid_properties;
        let columns = description.headers.len();
        let mut setup = Vec::new();
        if columns > grid.column_count {
            setup.push(append_dimension(sheet_id, "COLUMNS", columns - grid.column_count));
        }
        setup.push(header_format(sheet_id, columns));

        self.target = Some(SheetTarget {
            credential_id,
            spreadsheet_id: spreadsheet_id.to_owned(),
            spreadsheet_title: spreadsheet.properties.title.unwrap_or_default(),
            sheet_id,
            sheet_title: sheet.properties.title.clone(),
            available_rows: grid.row_count,
            written_rows: 0,
        });

        if let Some(estimated) = description.estimated_row_count {
            self.append_rows(usize::try_from(estimated).unwrap_or(usize::MAX - 1) + 1)
                .await?;
        }

        let clear_range = format!("'{}'", sheet.properties.title.replace('\'', "''"));
        let clear_url = {
            let mut url = self.spreadsheet_url(spreadsheet_id, &["values"])?;
            url.path_segments_mut()
                .map_err(|()| Error::internal("Google Sheets base URL cannot have a path"))?
                .push(&format!("{clear_range}:clear"));
            url
        };
        client.send(client.post(clear_url.as_str()).json(&json!({}))).await?;

        let headers = description
            .headers
            .iter()
            .map(|header| Value::String(header.display_name().to_owned()))
            .collect();
        let range = row_range(&sheet.properties.title, 1, 0);
        self.update_values(&client, spreadsheet_id, &range, vec![headers])
            .await?;
        self.batch_update(&client, spreadsheet_id, setup).await?;

        let target = self.target()?;
        target.written_rows = 1;

        tracing::debug!(
            target: TRACING_TARGET_PROVIDER,
            report_id = %context.report.id,
            spreadsheet_id = %target.spreadsheet_id,
            sheet = %target.sheet_title,
            columns,
            "Google Sheets target prepared"
        );
        Ok(())
    }

    async fn write_report_data_batch(&mut self, batch: &ReportDataBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.append_rows(batch.len()).await?;

        let target = self.target()?;
        let range = row_range(&target.sheet_title, target.written_rows + 1, batch.len());
        let credential_id = target.credential_id;
        let spreadsheet_id = target.spreadsheet_id.clone();
        let values = batch
            .rows
            .iter()
            .map(|row| row.iter().map(cell_value).collect())
            .collect();

        let client = self.auth.get_client(credential_id).await?;
        self.update_values(&client, &spreadsheet_id, &range, values)
            .await?;
        self.target()?.written_rows += batch.len();
        Ok(())
    }

    async fn finalize(&mut self, error: Option<&Error>) -> Result<()> {
        let Some(target) = self.target.take() else {
            return Ok(());
        };

        if let Some(error) = error {
            tracing::debug!(
                target: TRACING_TARGET_PROVIDER,
                spreadsheet_id = %target.spreadsheet_id,
                error = %error,
                "Skipping sheet formatting after a failed transfer"
            );
            return Ok(());
        }

        if target.data_rows() > 0 {
            let requests = vec![json!({
                "updateSheetProperties": {
                    "properties": {
                        "sheetId": target.sheet_id,
                        "gridProperties": { "frozenRowCount": 1 }
                    },
                    "fields": "gridProperties.frozenRowCount"
                }
            })];
            let client = self.auth.get_client(target.credential_id).await?;
            self.batch_update(&client, &target.spreadsheet_id, requests)
                .await?;
        }

        if let Some(logger) = &self.logger {
            logger.log(format!(
                "{} rows written to {} / {}",
                target.data_rows(),
                target.spreadsheet_title,
                target.sheet_title
            ));
        }
        Ok(())
    }
}

fn append_dimension(sheet_id: i64, dimension: &str, length: usize) -> Value {
    json!({
        "appendDimension": { "sheetId": sheet_id, "dimension": dimension, "length": length }
    })
}

fn header_format(sheet_id: i64, columns: usize) -> Value {
    json!({
        "repeatCell": {
            "range": {
                "sheetId": sheet_id,
                "startRowIndex": 0,
                "endRowIndex": 1,
                "startColumnIndex": 0,
                "endColumnIndex": columns
            },
            "cell": { "userEnteredFormat": { "textFormat": { "bold": true } } },
            "fields": "userEnteredFormat.textFormat.bold"
        }
    })
}

/// Converts a storage value into a cell value.
fn cell_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        scalar => scalar.clone(),
    }
}
