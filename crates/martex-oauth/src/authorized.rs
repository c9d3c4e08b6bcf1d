//! Bearer-authenticated HTTP client handed to readers and writers.

use std::fmt;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{Error, ErrorKind, Result};

/// HTTP client bound to one credential's current access token.
///
/// A new instance is built for every request for a client, so concurrent
/// holders never observe each other's token. The underlying connection pool
/// is shared.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: Client,
    credential_id: Uuid,
    access_token: String,
    identity_email: Option<String>,
}

impl fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("credential_id", &self.credential_id)
            .field("identity_email", &self.identity_email)
            .finish_non_exhaustive()
    }
}

impl AuthorizedClient {
    /// Creates a client for the given token.
    pub fn new(
        http: Client,
        credential_id: Uuid,
        access_token: impl Into<String>,
        identity_email: Option<String>,
    ) -> Self {
        Self {
            http,
            credential_id,
            access_token: access_token.into(),
            identity_email,
        }
    }

    /// Returns the credential this client authenticates as.
    pub fn credential_id(&self) -> Uuid {
        self.credential_id
    }

    /// Returns the access token sent as bearer token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the identity email of the credential, if known.
    pub fn identity_email(&self) -> Option<&str> {
        self.identity_email.as_deref()
    }

    /// Starts an authenticated request.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Starts an authenticated `GET`.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Starts an authenticated `POST`.
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Starts an authenticated `PUT`.
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Sends the request and decodes a JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(|err| {
            Error::from_source(ErrorKind::Serialization, err)
                .with_message("Failed to decode API response")
        })
    }

    /// Sends the request and fails on a non-success status.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::from_source(ErrorKind::Timeout, err).with_message("API request timed out")
    } else if err.is_connect() {
        Error::from_source(ErrorKind::Network, err).with_message("Connection failed")
    } else {
        let message = err.to_string();
        Error::from_source(ErrorKind::Network, err).with_message(message)
    }
}

/// Maps an unsuccessful API response to an error.
fn status_error(status: StatusCode, body: &str) -> Error {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Unauthorized,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::InvalidInput,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorKind::Timeout,
        _ => ErrorKind::External,
    };

    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| format!("API responded with status {}", status.as_u16()));

    Error::new(kind).with_message(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_extracts_google_message() {
        let body = r#"{"error":{"code":403,"message":"The caller does not have permission"}}"#;
        let error = status_error(StatusCode::FORBIDDEN, body);
        assert_eq!(error.kind, ErrorKind::Unauthorized);
        assert_eq!(
            error.message.as_deref(),
            Some("The caller does not have permission")
        );

        let error = status_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(error.kind, ErrorKind::External);
        assert_eq!(error.message.as_deref(), Some("API responded with status 502"));
    }

    #[test]
    fn test_debug_hides_token() {
        let client = AuthorizedClient::new(Client::new(), Uuid::nil(), "ya29.secret", None);
        assert!(!format!("{client:?}").contains("ya29"));
        assert_eq!(client.access_token(), "ya29.secret");
    }
}
