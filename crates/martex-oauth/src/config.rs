//! OAuth client configuration.

use std::fmt;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use martex_postgres::types::CredentialScope;
use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// Default Google token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Default Google revocation endpoint.
pub const DEFAULT_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// Default timeout for token endpoint requests: 30 seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Google OAuth application settings.
///
/// Storage and destination credentials are issued to two separate OAuth
/// applications. Each pair is optional; the redirect URI is required as soon
/// as one of them is set.
#[derive(Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct OAuthConfig {
    /// OAuth client id used for storage credentials
    #[cfg_attr(
        feature = "config",
        arg(long = "google-oauth-storage-client-id", env = "GOOGLE_OAUTH_STORAGE_CLIENT_ID")
    )]
    #[serde(default)]
    pub storage_client_id: Option<String>,

    /// OAuth client secret used for storage credentials
    #[cfg_attr(
        feature = "config",
        arg(
            long = "google-oauth-storage-client-secret",
            env = "GOOGLE_OAUTH_STORAGE_CLIENT_SECRET",
            hide_env_values = true
        )
    )]
    #[serde(default)]
    pub storage_client_secret: Option<String>,

    /// OAuth client id used for destination credentials
    #[cfg_attr(
        feature = "config",
        arg(
            long = "google-oauth-destination-client-id",
            env = "GOOGLE_OAUTH_DESTINATION_CLIENT_ID"
        )
    )]
    #[serde(default)]
    pub destination_client_id: Option<String>,

    /// OAuth client secret used for destination credentials
    #[cfg_attr(
        feature = "config",
        arg(
            long = "google-oauth-destination-client-secret",
            env = "GOOGLE_OAUTH_DESTINATION_CLIENT_SECRET",
            hide_env_values = true
        )
    )]
    #[serde(default)]
    pub destination_client_secret: Option<String>,

    /// Redirect URI registered for both OAuth applications
    #[cfg_attr(
        feature = "config",
        arg(long = "google-oauth-redirect-uri", env = "GOOGLE_OAUTH_REDIRECT_URI")
    )]
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Token endpoint URL
    #[cfg_attr(
        feature = "config",
        arg(
            long = "google-oauth-token-url",
            env = "GOOGLE_OAUTH_TOKEN_URL",
            default_value = DEFAULT_TOKEN_URL
        )
    )]
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Revocation endpoint URL
    #[cfg_attr(
        feature = "config",
        arg(
            long = "google-oauth-revoke-url",
            env = "GOOGLE_OAUTH_REVOKE_URL",
            default_value = DEFAULT_REVOKE_URL
        )
    )]
    #[serde(default = "default_revoke_url")]
    pub revoke_url: String,

    /// Token endpoint request timeout in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "oauth-http-timeout", env = "OAUTH_HTTP_TIMEOUT", default_value = "30")
    )]
    #[serde(default = "default_timeout_secs")]
    pub http_timeout: u64,

    /// User-Agent header sent to the token endpoint
    #[cfg_attr(
        feature = "config",
        arg(long = "oauth-user-agent", env = "OAUTH_USER_AGENT")
    )]
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_owned()
}

fn default_revoke_url() -> String {
    DEFAULT_REVOKE_URL.to_owned()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Client id, secret and redirect URI of one OAuth application.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClientCredentials {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Registered redirect URI.
    pub redirect_uri: String,
}

impl fmt::Debug for OAuthClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl OAuthConfig {
    /// Creates a configuration pointing at the Google endpoints with no clients.
    pub fn new() -> Self {
        Self {
            token_url: default_token_url(),
            revoke_url: default_revoke_url(),
            http_timeout: default_timeout_secs(),
            ..Self::default()
        }
    }

    /// Sets the OAuth application used for storage credentials.
    #[must_use]
    pub fn with_storage_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.storage_client_id = Some(client_id.into());
        self.storage_client_secret = Some(client_secret.into());
        self
    }

    /// Sets the OAuth application used for destination credentials.
    #[must_use]
    pub fn with_destination_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.destination_client_id = Some(client_id.into());
        self.destination_client_secret = Some(client_secret.into());
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Overrides the token and revocation endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, token_url: impl Into<String>, revoke_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.revoke_url = revoke_url.into();
        self
    }

    /// Returns the effective timeout, using the default if zero.
    pub fn effective_timeout(&self) -> Duration {
        if self.http_timeout == 0 {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.http_timeout)
        }
    }

    /// Returns the effective user agent, using the default if not set.
    pub fn effective_user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("martex/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Checks that every client pair is complete and the redirect URI is present.
    pub fn validate(&self) -> Result<()> {
        let storage = pair_state(&self.storage_client_id, &self.storage_client_secret, "storage")?;
        let destination = pair_state(
            &self.destination_client_id,
            &self.destination_client_secret,
            "destination",
        )?;

        if (storage || destination) && self.redirect_uri.as_deref().is_none_or(str::is_empty) {
            return Err(Error::new(ErrorKind::NotConfigured)
                .with_message("GOOGLE_OAUTH_REDIRECT_URI is required when an OAuth client is configured"));
        }

        Ok(())
    }

    /// Returns the OAuth application for the given credential scope.
    pub fn client_for(&self, scope: CredentialScope) -> Result<OAuthClientCredentials> {
        let (client_id, client_secret) = match scope {
            CredentialScope::Storage => (&self.storage_client_id, &self.storage_client_secret),
            CredentialScope::Destination => {
                (&self.destination_client_id, &self.destination_client_secret)
            }
        };

        match (client_id, client_secret, &self.redirect_uri) {
            (Some(client_id), Some(client_secret), Some(redirect_uri)) => {
                Ok(OAuthClientCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    redirect_uri: redirect_uri.clone(),
                })
            }
            _ => Err(Error::new(ErrorKind::NotConfigured)
                .with_message(format!("Google OAuth is not configured for {scope} credentials"))),
        }
    }
}

/// Returns whether the pair is set; fails if only one half is.
fn pair_state(id: &Option<String>, secret: &Option<String>, name: &str) -> Result<bool> {
    match (id, secret) {
        (Some(_), Some(_)) => Ok(true),
        (None, None) => Ok(false),
        _ => Err(Error::new(ErrorKind::NotConfigured).with_message(format!(
            "Both client id and client secret are required for the {name} OAuth client"
        ))),
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("storage_client_id", &self.storage_client_id)
            .field("destination_client_id", &self.destination_client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .field("revoke_url", &self.revoke_url)
            .field("http_timeout", &self.http_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_valid() {
        let config = OAuthConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);

        let error = config.client_for(CredentialScope::Storage).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NotConfigured);
    }

    #[test]
    fn test_redirect_uri_required() {
        let config = OAuthConfig::new().with_storage_client("id", "secret");
        assert_eq!(config.validate().unwrap_err().kind, ErrorKind::NotConfigured);

        let config = config.with_redirect_uri("https://app.example.com/oauth/callback");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_half_pair_is_rejected() {
        let config = OAuthConfig {
            destination_client_id: Some("id".into()),
            redirect_uri: Some("https://app.example.com/oauth/callback".into()),
            ..OAuthConfig::new()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_for_scope() {
        let config = OAuthConfig::new()
            .with_storage_client("storage-id", "storage-secret")
            .with_redirect_uri("https://app.example.com/oauth/callback");

        let client = config.client_for(CredentialScope::Storage).unwrap();
        assert_eq!(client.client_id, "storage-id");
        assert!(!format!("{client:?}").contains("storage-secret"));
        assert!(config.client_for(CredentialScope::Destination).is_err());
    }
}
