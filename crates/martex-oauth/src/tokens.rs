//! Google OAuth token payloads.

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// Token pair stored in a `google_oauth` credential secret.
///
/// Unknown fields of the stored secret are kept in `extra` and written back
/// unchanged on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleOAuthTokens {
    /// Bearer token for API calls.
    pub access_token: String,
    /// Long-lived token used to obtain new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry, in Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    /// Space-separated granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Token type, usually `Bearer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Any other field present in the stored secret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Successful response of the token endpoint to a `refresh_token` grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// New access token.
    pub access_token: String,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Rotated refresh token, when the provider rotates on use.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// Token type.
    #[serde(default)]
    pub token_type: Option<String>,
}

impl GoogleOAuthTokens {
    /// Parses the tokens from a credential secret.
    pub fn from_secret(secret: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(secret.clone()).map_err(|err| {
            Error::from_source(ErrorKind::CredentialsNotFound, err)
                .with_message("Stored credential does not contain OAuth tokens")
        })
    }

    /// Serializes the tokens back into a credential secret.
    pub fn to_secret(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Returns the access token expiry.
    pub fn expiry(&self) -> Option<Timestamp> {
        self.expiry_date
            .and_then(|millis| Timestamp::from_millisecond(millis).ok())
    }

    /// Returns whether the access token expires within `buffer` of `now`.
    ///
    /// Tokens without a known expiry are treated as valid.
    pub fn expires_within(&self, now: Timestamp, buffer: SignedDuration) -> bool {
        self.expiry()
            .is_some_and(|expiry| expiry.duration_since(now) < buffer)
    }

    /// Returns whether a refresh token is available.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Applies a refresh grant issued at `now`.
    ///
    /// The refresh token is replaced only when the grant carries a new one.
    pub fn apply_grant(&mut self, grant: TokenGrant, now: Timestamp) {
        self.access_token = grant.access_token;
        self.expiry_date = grant
            .expires_in
            .map(|secs| now.as_millisecond() + secs * 1000);

        if let Some(refresh_token) = grant.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if grant.scope.is_some() {
            self.scope = grant.scope;
        }
        if grant.token_type.is_some() {
            self.token_type = grant.token_type;
        }
    }
}
