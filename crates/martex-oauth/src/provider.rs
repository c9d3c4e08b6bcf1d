//! Authorized client provisioning with transparent token refresh.

use std::fmt;
use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use reqwest::Client;
use uuid::Uuid;

use crate::{
    AuthorizedClient, Error, ErrorKind, GoogleOAuthTokens, RefreshCoordinator, Result,
    TRACING_TARGET_PROVIDER, TokenFlow,
};

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_BUFFER: SignedDuration = SignedDuration::from_mins(5);

/// Hands out ready-to-use [`AuthorizedClient`]s for stored credentials.
///
/// Refreshes go through the [`RefreshCoordinator`], so concurrent requests
/// for the same near-expiry credential trigger one upstream call.
#[derive(Clone)]
pub struct AuthClientProvider {
    flow: Arc<TokenFlow>,
    coordinator: RefreshCoordinator,
    http: Client,
    buffer: SignedDuration,
}

impl fmt::Debug for AuthClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClientProvider")
            .field("coordinator", &self.coordinator)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl AuthClientProvider {
    /// Creates a provider.
    ///
    /// `http` is the connection pool shared by every client handed out.
    pub fn new(flow: Arc<TokenFlow>, coordinator: RefreshCoordinator, http: Client) -> Self {
        Self {
            flow,
            coordinator,
            http,
            buffer: REFRESH_BUFFER,
        }
    }

    /// Overrides the refresh buffer.
    #[must_use]
    pub fn with_refresh_buffer(mut self, buffer: SignedDuration) -> Self {
        self.buffer = buffer;
        self
    }

    /// Returns the coordinator used for refreshes.
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Returns the token flow used for refreshes.
    pub fn flow(&self) -> &Arc<TokenFlow> {
        &self.flow
    }

    /// Returns a new client for `credential_id`, refreshing its token first
    /// when it expires within the refresh buffer.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_PROVIDER)]
    pub async fn get_client(&self, credential_id: Uuid) -> Result<AuthorizedClient> {
        let mut credential = self.flow.load_oauth_credential(credential_id).await?;
        let tokens = GoogleOAuthTokens::from_secret(&credential.secret)?;

        if tokens.expires_within(Timestamp::now(), self.buffer) {
            tracing::debug!(
                target: TRACING_TARGET_PROVIDER,
                credential_id = %credential_id,
                expiry_date = tokens.expiry_date,
                "Access token is near expiry, refreshing"
            );

            let flow = Arc::clone(&self.flow);
            let buffer = self.buffer;
            self.coordinator
                .refresh_with_lock(credential_id, move || async move {
                    flow.refresh_if_due(credential_id, buffer).await.map(drop)
                })
                .await?;

            credential = self.flow.load_oauth_credential(credential_id).await?;
        }

        let tokens = GoogleOAuthTokens::from_secret(&credential.secret)?;
        if tokens.access_token.is_empty() {
            return Err(Error::new(ErrorKind::CredentialsExpired)
                .with_message(format!("Credentials {credential_id} have no access token")));
        }

        Ok(AuthorizedClient::new(
            self.http.clone(),
            credential_id,
            tokens.access_token,
            credential.identity_email,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use martex_postgres::types::{CredentialScope, CredentialType};
    use serde_json::json;

    use super::*;
    use crate::OAuthConfig;
    use crate::mock::{MemoryCredentialStore, MockTokenEndpoint};

    fn provider(store: &MemoryCredentialStore, endpoint: &MockTokenEndpoint) -> AuthClientProvider {
        let config = OAuthConfig::new()
            .with_storage_client("storage-id", "storage-secret")
            .with_redirect_uri("https://app.example.com/oauth/callback");
        let flow = TokenFlow::new(Arc::new(store.clone()), Arc::new(endpoint.clone()), config);
        AuthClientProvider::new(Arc::new(flow), RefreshCoordinator::new(), Client::new())
    }

    fn secret_expiring_in(millis: i64) -> serde_json::Value {
        json!({
            "access_token": "stale",
            "refresh_token": "refresh",
            "expiry_date": Timestamp::now().as_millisecond() + millis,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_five_concurrent_callers_refresh_once() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new().with_delay(Duration::from_millis(50));
        let credential = store.insert_oauth(CredentialScope::Storage, secret_expiring_in(200_000));
        let provider = provider(&store, &endpoint);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                provider.get_client(credential.id).await
            }));
        }

        for handle in handles {
            let client = handle.await.unwrap().unwrap();
            assert_eq!(client.access_token(), "access-1");
            assert_eq!(client.credential_id(), credential.id);
        }

        assert_eq!(endpoint.refresh_calls(), 1);
        assert_eq!(provider.coordinator().in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_concurrent_callers_refresh_once() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let credential = store.insert_oauth(CredentialScope::Storage, secret_expiring_in(1_000));
        let provider = provider(&store, &endpoint);

        let results = futures::future::join_all(
            (0..50).map(|_| provider.get_client(credential.id)),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(endpoint.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_valid_token_is_not_refreshed() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let credential =
            store.insert_oauth(CredentialScope::Storage, secret_expiring_in(3_600_000));
        let provider = provider(&store, &endpoint);

        for _ in 0..3 {
            let client = provider.get_client(credential.id).await.unwrap();
            assert_eq!(client.access_token(), "stale");
        }
        assert_eq!(endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_clients_are_not_shared_between_credentials() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let expiring = store.insert_oauth(CredentialScope::Storage, secret_expiring_in(1_000));
        let valid = store.insert_oauth(CredentialScope::Storage, secret_expiring_in(3_600_000));
        let provider = provider(&store, &endpoint);

        let before = provider.get_client(valid.id).await.unwrap();
        let refreshed = provider.get_client(expiring.id).await.unwrap();
        let after = provider.get_client(valid.id).await.unwrap();

        assert_eq!(refreshed.access_token(), "access-1");
        assert_eq!(before.access_token(), "stale");
        assert_eq!(after.access_token(), "stale");
    }

    #[tokio::test]
    async fn test_missing_or_mistyped_credential() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let provider = provider(&store, &endpoint);

        let error = provider.get_client(Uuid::now_v7()).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::CredentialsNotFound);

        let mut api_key = store.insert_oauth(CredentialScope::Storage, json!({ "api_key": "k" }));
        api_key.credential_type = CredentialType::ApiKey;
        store.insert(api_key.clone());

        let error = provider.get_client(api_key.id).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::CredentialsNotFound);
    }

    #[tokio::test]
    async fn test_refresh_failure_reaches_every_caller() {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new().with_delay(Duration::from_millis(20));
        endpoint.fail_with("invalid_grant");
        let credential = store.insert_oauth(CredentialScope::Storage, secret_expiring_in(1_000));
        let provider = provider(&store, &endpoint);

        let (a, b) = tokio::join!(
            provider.get_client(credential.id),
            provider.get_client(credential.id)
        );

        assert_eq!(a.unwrap_err().kind, ErrorKind::TokenRefreshFailed);
        assert_eq!(b.unwrap_err().kind, ErrorKind::TokenRefreshFailed);
        assert_eq!(endpoint.refresh_calls(), 1);
        assert_eq!(provider.coordinator().in_flight(), 0);
    }
}
