//! Google BigQuery reader.

use std::sync::Arc;
use std::time::Duration;

use martex_oauth::{AuthClientProvider, AuthorizedClient};
use martex_postgres::model::ReportContext;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    ReaderFactory, ReportDataBatch, ReportDataDescription, ReportDataHeader, ReportDataRow,
    ReportReader, config_str, require_config_str,
};
use crate::{Error, ErrorKind, Result, TRACING_TARGET_PROVIDER};

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Server-side wait of a single `jobs.query` / `getQueryResults` call.
const QUERY_TIMEOUT_MS: u64 = 10_000;

/// Polls of an unfinished query before giving up.
const MAX_COMPLETION_POLLS: usize = 60;

/// Creates [`BigQueryReader`]s.
#[derive(Debug, Clone)]
pub struct BigQueryReaderFactory {
    auth: Arc<AuthClientProvider>,
    batch_size: usize,
    base_url: String,
}

impl BigQueryReaderFactory {
    /// Creates a factory reading `batch_size` rows per page.
    pub fn new(auth: Arc<AuthClientProvider>, batch_size: usize) -> Self {
        Self {
            auth,
            batch_size,
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

impl ReaderFactory for BigQueryReaderFactory {
    fn create_reader(&self) -> Box<dyn ReportReader> {
        Box::new(BigQueryReader {
            auth: Arc::clone(&self.auth),
            batch_size: self.batch_size,
            base_url: self.base_url.clone(),
            session: None,
        })
    }
}

/// Reads the result of a data mart query page by page.
///
/// Preparation runs `jobs.query` and keeps the first page. Later pages are
/// fetched with `getQueryResults`, the page token being the batch cursor.
///
/// Every request asks the [`AuthClientProvider`] for a client, so a query
/// outliving its access token picks up the refreshed one.
#[derive(Debug)]
pub struct BigQueryReader {
    auth: Arc<AuthClientProvider>,
    batch_size: usize,
    base_url: String,
    session: Option<QuerySession>,
}

#[derive(Debug)]
struct QuerySession {
    credential_id: Uuid,
    job: JobReference,
    first_page: Option<ReportDataBatch>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    max_results: usize,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    total_rows: Option<String>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableFieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

impl BigQueryReader {
    fn session(&mut self) -> Result<&mut QuerySession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::internal("Report data must be prepared before read"))
    }

    fn results_url(&self, job: &JobReference) -> String {
        format!(
            "{}/projects/{}/queries/{}",
            self.base_url, job.project_id, job.job_id
        )
    }

    async fn get_query_results(
        &self,
        client: &AuthorizedClient,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let mut query: Vec<(&str, String)> = vec![
            ("maxResults", self.batch_size.to_string()),
            ("timeoutMs", QUERY_TIMEOUT_MS.to_string()),
        ];
        if let Some(location) = &job.location {
            query.push(("location", location.clone()));
        }
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token.to_owned()));
        }

        let request = client.get(&self.results_url(job)).query(&query);
        client.send_json(request).await
    }
}

#[async_trait::async_trait]
impl ReportReader for BigQueryReader {
    async fn prepare_report_data(
        &mut self,
        context: &ReportContext,
    ) -> Result<ReportDataDescription> {
        let storage = &context.storage;
        let credential_id = storage.credential_id.ok_or_else(|| {
            Error::new(ErrorKind::CredentialsNotFound)
                .with_message("Google BigQuery credentials are not properly configured")
        })?;

        let project_id = require_config_str(&storage.config, "projectId", "Google BigQuery")?;
        let location = config_str(&storage.config, "location");
        let definition = context.data_mart.definition.as_ref().ok_or_else(|| {
            Error::invalid_input("Data Mart is not properly configured")
        })?;
        let sql = definition_query(definition)?;

        let client = self.auth.get_client(credential_id).await?;

        tracing::debug!(
            target: TRACING_TARGET_PROVIDER,
            report_id = %context.report.id,
            project_id,
            "Starting BigQuery query"
        );

        let body = QueryRequest {
            query: &sql,
            use_legacy_sql: false,
            max_results: self.batch_size,
            timeout_ms: QUERY_TIMEOUT_MS,
            location,
        };
        let url = format!("{}/projects/{project_id}/queries", self.base_url);
        let mut response: QueryResponse = client.send_json(client.post(&url).json(&body)).await?;

        let job = response
            .job_reference
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::External).with_message("BigQuery returned no job"))?;

        let mut polls = 0;
        while !response.job_complete {
            polls += 1;
            if polls > MAX_COMPLETION_POLLS {
                return Err(Error::new(ErrorKind::Timeout)
                    .with_message(format!("BigQuery job {} did not complete", job.job_id)));
            }

            tracing::trace!(
                target: TRACING_TARGET_PROVIDER,
                job_id = %job.job_id,
                polls,
                "Waiting for BigQuery job"
            );
            tokio::time::sleep(Duration::from_millis(200)).await;
            let client = self.auth.get_client(credential_id).await?;
            response = self.get_query_results(&client, &job, None).await?;
        }

        let description = ReportDataDescription {
            headers: schema_headers(response.schema.as_ref()),
            estimated_row_count: response.total_rows.as_deref().and_then(|n| n.parse().ok()),
        };

        let first_page = ReportDataBatch::new(decode_rows(response.rows), response.page_token);
        self.session = Some(QuerySession {
            credential_id,
            job,
            first_page: Some(first_page),
        });

        Ok(description)
    }

    async fn read_report_data_batch(&mut self, cursor: Option<&str>) -> Result<ReportDataBatch> {
        let session = self.session()?;
        if cursor.is_none()
            && let Some(first_page) = session.first_page.take()
        {
            return Ok(first_page);
        }

        let credential_id = session.credential_id;
        let job = session.job.clone();
        let client = self.auth.get_client(credential_id).await?;
        let response = self.get_query_results(&client, &job, cursor).await?;

        Ok(ReportDataBatch::new(
            decode_rows(response.rows),
            response.page_token,
        ))
    }

    async fn finalize(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            tracing::debug!(
                target: TRACING_TARGET_PROVIDER,
                job_id = %session.job.job_id,
                "Finalizing BigQuery read"
            );
        }
        Ok(())
    }
}

/// Builds the SQL selecting the data of a data mart definition.
fn definition_query(definition: &serde_json::Value) -> Result<String> {
    if let Some(sql) = config_str(definition, "sqlQuery") {
        return Ok(sql.to_owned());
    }

    if let Some(name) = config_str(definition, "fullyQualifiedName") {
        return Ok(format!("SELECT * FROM `{name}`"));
    }

    if let Some(pattern) = config_str(definition, "pattern") {
        return Ok(format!("SELECT * FROM `{pattern}*`"));
    }

    Err(Error::invalid_input("Invalid data mart definition"))
}

fn schema_headers(schema: Option<&TableSchema>) -> Vec<ReportDataHeader> {
    schema
        .map(|schema| {
            schema
                .fields
                .iter()
                .map(|field| ReportDataHeader {
                    name: field.name.clone(),
                    alias: None,
                    data_type: field.field_type.clone(),
                    description: field.description.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn decode_rows(rows: Vec<TableRow>) -> Vec<ReportDataRow> {
    rows.into_iter()
        .map(|row| row.f.into_iter().map(|cell| cell.v).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use martex_postgres::types::{CredentialScope, DestinationType, StorageType};
    use serde_json::json;

    use super::*;
    use crate::mock::MemoryReportStore;
    use crate::provider::api_stub::{ApiStub, AuthFixture};

    fn query_pages(method: &Method, _path: &str) -> serde_json::Value {
        if *method == Method::POST {
            return json!({
                "jobReference": { "projectId": "analytics", "jobId": "job-1", "location": "US" },
                "jobComplete": true,
                "schema": { "fields": [ { "name": "id", "type": "INTEGER" } ] },
                "totalRows": "2",
                "rows": [ { "f": [ { "v": "1" } ] } ],
                "pageToken": "t2"
            });
        }

        json!({ "jobComplete": true, "rows": [ { "f": [ { "v": "2" } ] } ] })
    }

    #[tokio::test]
    async fn test_later_pages_use_refreshed_token() {
        let api = ApiStub::serve(query_pages).await;
        let auth = AuthFixture::new();
        // just outside the refresh buffer when the query starts
        let credential_id = auth.credential_expiring_in(CredentialScope::Storage, 301_000);

        let mut context = MemoryReportStore::new()
            .seed_report(StorageType::GoogleBigQuery, DestinationType::GoogleSheets);
        context.storage.credential_id = Some(credential_id);

        let mut reader = BigQueryReaderFactory::new(Arc::clone(&auth.provider), 100)
            .with_base_url(api.base_url())
            .create_reader();

        let description = reader.prepare_report_data(&context).await.unwrap();
        assert_eq!(description.estimated_row_count, Some(2));

        let first = reader.read_report_data_batch(None).await.unwrap();
        assert_eq!(first.rows, vec![vec![json!("1")]]);
        assert_eq!(first.next_cursor(), Some("t2"));

        auth.expire_in(credential_id, 1_000);

        let second = reader.read_report_data_batch(Some("t2")).await.unwrap();
        assert_eq!(second.rows, vec![vec![json!("2")]]);
        assert_eq!(second.next_cursor(), None);
        reader.finalize().await.unwrap();

        assert_eq!(api.authorizations(), vec!["Bearer stale", "Bearer access-1"]);
        assert_eq!(auth.endpoint.refresh_calls(), 1);

        let requests = api.requests();
        assert_eq!(requests[1].method, Method::GET);
        assert_eq!(requests[1].path, "/projects/analytics/queries/job-1");
    }

    #[test]
    fn test_definition_query() {
        assert_eq!(
            definition_query(&json!({ "sqlQuery": "SELECT 1" })).unwrap(),
            "SELECT 1"
        );
        assert_eq!(
            definition_query(&json!({ "fullyQualifiedName": "p.d.orders" })).unwrap(),
            "SELECT * FROM `p.d.orders`"
        );
        assert_eq!(
            definition_query(&json!({ "pattern": "p.d.events_" })).unwrap(),
            "SELECT * FROM `p.d.events_*`"
        );
        assert!(definition_query(&json!({})).is_err());
    }

    #[test]
    fn test_decode_query_response() {
        let response: QueryResponse = serde_json::from_value(json!({
            "jobReference": { "projectId": "p", "jobId": "job-1", "location": "EU" },
            "jobComplete": true,
            "schema": { "fields": [
                { "name": "date", "type": "DATE" },
                { "name": "sessions", "type": "INTEGER", "description": "Sessions count" }
            ] },
            "totalRows": "2",
            "rows": [
                { "f": [ { "v": "2024-01-01" }, { "v": "10" } ] },
                { "f": [ { "v": "2024-01-02" }, { "v": null } ] }
            ],
            "pageToken": "token-2"
        }))
        .unwrap();

        let headers = schema_headers(response.schema.as_ref());
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].data_type.as_deref(), Some("INTEGER"));
        assert_eq!(headers[1].description.as_deref(), Some("Sessions count"));

        let rows = decode_rows(response.rows);
        assert_eq!(rows, vec![
            vec![json!("2024-01-01"), json!("10")],
            vec![json!("2024-01-02"), json!(null)],
        ]);
        assert_eq!(response.page_token.as_deref(), Some("token-2"));
    }

    #[test]
    fn test_query_request_body() {
        let body = QueryRequest {
            query: "SELECT 1",
            use_legacy_sql: false,
            max_results: 500,
            timeout_ms: QUERY_TIMEOUT_MS,
            location: Some("EU"),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["useLegacySql"], json!(false));
        assert_eq!(value["maxResults"], json!(500));
        assert_eq!(value["location"], json!("EU"));
    }
}
