//! Refresh, revoke and validation of stored OAuth credentials.

use std::fmt;
use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use martex_postgres::types::CredentialType;
use uuid::Uuid;

use crate::store::credentials_not_found;
use crate::{
    CredentialStore, CredentialUpdate, Error, ErrorKind, GoogleOAuthTokens, OAuthClientCredentials,
    OAuthConfig, Result, StoredCredential, TRACING_TARGET_FLOW, TokenEndpoint, TokenRotation,
};

/// Token lifecycle operations on stored Google OAuth credentials.
#[derive(Clone)]
pub struct TokenFlow {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    config: OAuthConfig,
}

impl fmt::Debug for TokenFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenFlow")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Refresh-token grant executed under the credential lock.
struct RefreshRotation<'a> {
    endpoint: &'a dyn TokenEndpoint,
    client: OAuthClientCredentials,
    /// `None` forces the refresh regardless of expiry.
    buffer: Option<SignedDuration>,
}

#[async_trait::async_trait]
impl TokenRotation for RefreshRotation<'_> {
    fn is_due(&self, credential: &StoredCredential) -> bool {
        let Some(buffer) = self.buffer else {
            return true;
        };

        match GoogleOAuthTokens::from_secret(&credential.secret) {
            Ok(tokens) => tokens.expires_within(Timestamp::now(), buffer),
            Err(_) => true,
        }
    }

    async fn rotate(&self, credential: &StoredCredential) -> Result<CredentialUpdate> {
        let mut tokens = GoogleOAuthTokens::from_secret(&credential.secret)?;
        let Some(refresh_token) = tokens.refresh_token.clone().filter(|t| !t.is_empty()) else {
            return Err(credentials_expired(credential.id));
        };

        let grant = self
            .endpoint
            .refresh(&self.client, &refresh_token)
            .await
            .map_err(|err| {
                tracing::error!(
                    target: TRACING_TARGET_FLOW,
                    credential_id = %credential.id,
                    error = %err,
                    source = ?std::error::Error::source(&err),
                    "Failed to refresh access token"
                );
                match err.kind {
                    ErrorKind::TokenRefreshFailed => err,
                    _ => Error::new(ErrorKind::TokenRefreshFailed)
                        .with_message(err.message_or_kind())
                        .with_source(err),
                }
            })?;

        tokens.apply_grant(grant, Timestamp::now());

        tracing::info!(
            target: TRACING_TARGET_FLOW,
            credential_id = %credential.id,
            expiry_date = tokens.expiry_date,
            "Access token refreshed"
        );

        Ok(CredentialUpdate {
            secret: tokens.to_secret()?,
            expires_at: tokens.expiry(),
        })
    }
}

fn credentials_expired(credential_id: Uuid) -> Error {
    Error::new(ErrorKind::CredentialsExpired).with_message(format!(
        "Credentials {credential_id} have no refresh token, the account must be reconnected"
    ))
}

impl TokenFlow {
    /// Creates a flow over the given store and endpoint.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            store,
            endpoint,
            config,
        }
    }

    /// Returns the credential store.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Loads a Google OAuth credential, failing if it is missing or of another type.
    pub async fn load_oauth_credential(&self, credential_id: Uuid) -> Result<StoredCredential> {
        let credential = self
            .store
            .find_credential(credential_id)
            .await?
            .ok_or_else(|| credentials_not_found(credential_id))?;

        if credential.credential_type != CredentialType::GoogleOAuth {
            return Err(Error::new(ErrorKind::CredentialsNotFound).with_message(format!(
                "Credentials {credential_id} are not Google OAuth credentials"
            )));
        }

        Ok(credential)
    }

    /// Refreshes the access token unconditionally and stores it.
    ///
    /// The other fields of the stored secret are preserved.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_FLOW)]
    pub async fn refresh_tokens_by_credential_id(
        &self,
        credential_id: Uuid,
    ) -> Result<StoredCredential> {
        self.refresh(credential_id, None).await
    }

    /// Refreshes the access token only if it expires within `buffer`.
    ///
    /// The expiry is re-checked once the credential is held exclusively.
    pub async fn refresh_if_due(
        &self,
        credential_id: Uuid,
        buffer: SignedDuration,
    ) -> Result<StoredCredential> {
        self.refresh(credential_id, Some(buffer)).await
    }

    async fn refresh(
        &self,
        credential_id: Uuid,
        buffer: Option<SignedDuration>,
    ) -> Result<StoredCredential> {
        let credential = self.load_oauth_credential(credential_id).await?;
        let tokens = GoogleOAuthTokens::from_secret(&credential.secret)?;
        if !tokens.has_refresh_token() {
            return Err(credentials_expired(credential_id));
        }

        let rotation = RefreshRotation {
            endpoint: self.endpoint.as_ref(),
            client: self.config.client_for(credential.scope)?,
            buffer,
        };

        self.store.rotate_credential(credential_id, &rotation).await
    }

    /// Revokes the credential upstream, then soft-deletes and detaches it.
    ///
    /// An upstream revocation failure is logged and does not prevent the
    /// local revocation.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_FLOW)]
    pub async fn revoke_credential(&self, credential_id: Uuid) -> Result<()> {
        let credential = self
            .store
            .find_credential(credential_id)
            .await?
            .ok_or_else(|| credentials_not_found(credential_id))?;

        if credential.credential_type == CredentialType::GoogleOAuth
            && let Ok(tokens) = GoogleOAuthTokens::from_secret(&credential.secret)
        {
            let token = tokens
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or(tokens.access_token);

            if let Err(err) = self.endpoint.revoke(&token).await {
                tracing::warn!(
                    target: TRACING_TARGET_FLOW,
                    credential_id = %credential_id,
                    error = %err,
                    "Upstream token revocation failed, revoking locally"
                );
            }
        }

        self.store.revoke_credential(credential_id).await
    }

    /// Returns whether the credential exists and can still be refreshed.
    pub async fn is_credential_valid(&self, credential_id: Uuid) -> Result<bool> {
        let credential = self.store.find_credential(credential_id).await?;
        Ok(credential.is_some_and(|credential| Self::has_usable_tokens(&credential)))
    }

    /// Returns whether the credential is a Google OAuth credential with a refresh token.
    pub fn has_usable_tokens(credential: &StoredCredential) -> bool {
        credential.credential_type == CredentialType::GoogleOAuth
            && GoogleOAuthTokens::from_secret(&credential.secret)
                .is_ok_and(|tokens| tokens.has_refresh_token())
    }
}

#[cfg(test)]
mod tests {
    use martex_postgres::types::CredentialScope;
    use serde_json::json;

    use super::*;
    use crate::mock::{MemoryCredentialStore, MockTokenEndpoint};

    fn config() -> OAuthConfig {
        OAuthConfig::new()
            .with_storage_client("storage-id", "storage-secret")
            .with_destination_client("destination-id", "destination-secret")
            .with_redirect_uri("https://app.example.com/oauth/callback")
    }

    fn flow(store: &MemoryCredentialStore, endpoint: &MockTokenEndpoint) -> TokenFlow {
        TokenFlow::new(Arc::new(store.clone()), Arc::new(endpoint.clone()), config())
    }

    #[tokio::test]
    async fn test_refresh_writes_back_tokens() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let credential = store.insert_oauth(
            CredentialScope::Destination,
            json!({
                "access_token": "old",
                "refresh_token": "refresh",
                "expiry_date": 1,
                "scope": "https://www.googleapis.com/auth/spreadsheets",
            }),
        );

        let refreshed = flow(&store, &endpoint)
            .refresh_tokens_by_credential_id(credential.id)
            .await
            .unwrap();

        assert_eq!(endpoint.refresh_calls(), 1);
        assert_eq!(endpoint.last_client_id().as_deref(), Some("destination-id"));
        assert_eq!(refreshed.secret["access_token"], "access-1");
        assert_eq!(refreshed.secret["refresh_token"], "refresh");
        assert_eq!(
            refreshed.secret["scope"],
            "https://www.googleapis.com/auth/spreadsheets"
        );
        assert!(refreshed.expires_at.is_some());
        assert_eq!(store.get(credential.id).unwrap(), refreshed);
    }

    #[tokio::test]
    async fn test_refresh_missing_credential() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();

        let error = flow(&store, &endpoint)
            .refresh_tokens_by_credential_id(Uuid::now_v7())
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::CredentialsNotFound);
        assert_eq!(endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let credential =
            store.insert_oauth(CredentialScope::Storage, json!({ "access_token": "a" }));

        let error = flow(&store, &endpoint)
            .refresh_tokens_by_credential_id(credential.id)
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::CredentialsExpired);
        assert_eq!(endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_sanitized() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        endpoint.fail_with("invalid_grant: Token has been expired or revoked.");
        let credential = store.insert_oauth(
            CredentialScope::Storage,
            json!({ "access_token": "a", "refresh_token": "r", "expiry_date": 1 }),
        );

        let error = flow(&store, &endpoint)
            .refresh_tokens_by_credential_id(credential.id)
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::TokenRefreshFailed);
        assert!(!error.public_message().contains("invalid_grant"));
        assert_eq!(store.get(credential.id).unwrap().secret["access_token"], "a");
    }

    #[tokio::test]
    async fn test_refresh_if_due_skips_fresh_token() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let expiry = Timestamp::now().as_millisecond() + 3_600_000;
        let credential = store.insert_oauth(
            CredentialScope::Storage,
            json!({ "access_token": "a", "refresh_token": "r", "expiry_date": expiry }),
        );

        flow(&store, &endpoint)
            .refresh_if_due(credential.id, SignedDuration::from_mins(5))
            .await
            .unwrap();

        assert_eq!(endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_revoke_soft_deletes_even_if_upstream_fails() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        endpoint.fail_with("upstream unavailable");
        let credential = store.insert_oauth(
            CredentialScope::Storage,
            json!({ "access_token": "a", "refresh_token": "r" }),
        );

        flow(&store, &endpoint)
            .revoke_credential(credential.id)
            .await
            .unwrap();

        assert_eq!(endpoint.revoked_tokens(), vec!["r".to_string()]);
        assert!(store.get(credential.id).is_none());
    }

    #[tokio::test]
    async fn test_revoke_uses_access_token_without_refresh_token() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let credential =
            store.insert_oauth(CredentialScope::Storage, json!({ "access_token": "a" }));

        flow(&store, &endpoint)
            .revoke_credential(credential.id)
            .await
            .unwrap();

        assert_eq!(endpoint.revoked_tokens(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_is_credential_valid() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let flow = flow(&store, &endpoint);

        let valid = store.insert_oauth(
            CredentialScope::Storage,
            json!({ "access_token": "a", "refresh_token": "r" }),
        );
        let invalid =
            store.insert_oauth(CredentialScope::Storage, json!({ "access_token": "a" }));

        assert!(flow.is_credential_valid(valid.id).await.unwrap());
        assert!(!flow.is_credential_valid(invalid.id).await.unwrap());
        assert!(!flow.is_credential_valid(Uuid::now_v7()).await.unwrap());
    }
}
