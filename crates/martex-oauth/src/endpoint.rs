//! OAuth token endpoint client.

use std::fmt;

use reqwest::Client;
use serde::Deserialize;

use crate::{
    Error, ErrorKind, OAuthClientCredentials, OAuthConfig, Result, TRACING_TARGET_ENDPOINT,
    TokenGrant,
};

/// Calls an OAuth authorization server on behalf of stored credentials.
#[async_trait::async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchanges a refresh token for a new access token.
    async fn refresh(
        &self,
        client: &OAuthClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenGrant>;

    /// Revokes an access or refresh token.
    async fn revoke(&self, token: &str) -> Result<()>;
}

/// OAuth error body returned by Google on a rejected request.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Token endpoint backed by `reqwest`, defaulting to Google.
#[derive(Clone)]
pub struct GoogleTokenEndpoint {
    http: Client,
    token_url: String,
    revoke_url: String,
}

impl fmt::Debug for GoogleTokenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleTokenEndpoint")
            .field("token_url", &self.token_url)
            .field("revoke_url", &self.revoke_url)
            .finish_non_exhaustive()
    }
}

impl GoogleTokenEndpoint {
    /// Builds the HTTP client from the configured timeout and user agent.
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.effective_timeout())
            .user_agent(config.effective_user_agent())
            .build()
            .map_err(|err| {
                Error::from_source(ErrorKind::Internal, err)
                    .with_message("Failed to create OAuth HTTP client")
            })?;

        Ok(Self::with_client(http, config))
    }

    /// Uses an existing HTTP client.
    pub fn with_client(http: Client, config: &OAuthConfig) -> Self {
        Self {
            http,
            token_url: config.token_url.clone(),
            revoke_url: config.revoke_url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn refresh(
        &self,
        client: &OAuthClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenGrant> {
        tracing::debug!(
            target: TRACING_TARGET_ENDPOINT,
            client_id = %client.client_id,
            "Requesting access token refresh"
        );

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| transport_error(ErrorKind::TokenRefreshFailed, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::new(ErrorKind::TokenRefreshFailed)
                .with_message(describe_rejection(status.as_u16(), &body)));
        }

        response.json::<TokenGrant>().await.map_err(|err| {
            Error::from_source(ErrorKind::TokenRefreshFailed, err)
                .with_message("Token endpoint returned an invalid response")
        })
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.revoke_url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|err| transport_error(ErrorKind::TokenRevokeFailed, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::new(ErrorKind::TokenRevokeFailed)
                .with_message(describe_rejection(status.as_u16(), &body)));
        }

        Ok(())
    }
}

fn transport_error(kind: ErrorKind, err: reqwest::Error) -> Error {
    let message = if err.is_timeout() {
        "Token endpoint timed out"
    } else if err.is_connect() {
        "Connection to token endpoint failed"
    } else {
        "Token endpoint request failed"
    };
    Error::from_source(kind, err).with_message(message)
}

/// Formats a rejected response as `error: description`, falling back to the status.
fn describe_rejection(status: u16, body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error,
            error_description: Some(description),
        }) => format!("{error}: {description}"),
        Ok(OAuthErrorBody { error, .. }) => error,
        Err(_) => format!("Token endpoint responded with status {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_rejection() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#;
        assert_eq!(
            describe_rejection(400, body),
            "invalid_grant: Token has been expired or revoked."
        );
        assert_eq!(describe_rejection(400, r#"{"error":"invalid_client"}"#), "invalid_client");
        assert_eq!(
            describe_rejection(502, "<html>"),
            "Token endpoint responded with status 502"
        );
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = OAuthConfig::new().with_endpoints("http://localhost/token", "http://localhost/revoke");
        let endpoint = GoogleTokenEndpoint::new(&config).unwrap();
        assert_eq!(endpoint.token_url, "http://localhost/token");
        assert_eq!(endpoint.revoke_url, "http://localhost/revoke");
    }
}
