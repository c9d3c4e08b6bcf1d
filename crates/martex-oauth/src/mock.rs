//! In-memory credential store and scripted token endpoint for tests.
//!
//! Available with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! martex-oauth = { workspace = true, features = ["test-utils"] }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use martex_postgres::types::{CredentialScope, CredentialType};
use uuid::Uuid;

use crate::store::credentials_not_found;
use crate::{
    CredentialStore, Error, ErrorKind, GoogleOAuthTokens, OAuthClientCredentials, Result,
    StoredCredential, TokenEndpoint, TokenGrant, TokenRotation,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MemoryCredentials {
    active: HashMap<Uuid, StoredCredential>,
    revoked: HashSet<Uuid>,
}

/// [`CredentialStore`] keeping credentials in memory.
///
/// Rotations are serialized by a single store-wide lock, which stands in for
/// the row lock of the Postgres store.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<Mutex<MemoryCredentials>>,
    rotation_lock: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a credential.
    pub fn insert(&self, credential: StoredCredential) {
        let mut credentials = lock(&self.credentials);
        credentials.revoked.remove(&credential.id);
        credentials.active.insert(credential.id, credential);
    }

    /// Inserts a Google OAuth credential with the given secret.
    pub fn insert_oauth(&self, scope: CredentialScope, secret: serde_json::Value) -> StoredCredential {
        let expires_at = GoogleOAuthTokens::from_secret(&secret)
            .ok()
            .and_then(|tokens| tokens.expiry());

        let credential = StoredCredential {
            id: Uuid::now_v7(),
            project_id: Uuid::now_v7(),
            scope,
            credential_type: CredentialType::GoogleOAuth,
            secret,
            identity_email: Some("owner@example.com".to_owned()),
            identity_username: None,
            expires_at,
        };

        self.insert(credential.clone());
        credential
    }

    /// Returns a credential that has not been revoked.
    pub fn get(&self, credential_id: Uuid) -> Option<StoredCredential> {
        lock(&self.credentials).active.get(&credential_id).cloned()
    }

    /// Returns whether the credential was revoked through the store.
    pub fn is_revoked(&self, credential_id: Uuid) -> bool {
        lock(&self.credentials).revoked.contains(&credential_id)
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_credential(&self, credential_id: Uuid) -> Result<Option<StoredCredential>> {
        Ok(self.get(credential_id))
    }

    async fn rotate_credential(
        &self,
        credential_id: Uuid,
        rotation: &dyn TokenRotation,
    ) -> Result<StoredCredential> {
        let _row_lock = self.rotation_lock.lock().await;

        let mut current = self
            .get(credential_id)
            .ok_or_else(|| credentials_not_found(credential_id))?;
        if !rotation.is_due(&current) {
            return Ok(current);
        }

        let update = rotation.rotate(&current).await?;
        update.apply(&mut current);

        let mut credentials = lock(&self.credentials);
        if !credentials.active.contains_key(&credential_id) {
            return Err(credentials_not_found(credential_id));
        }
        credentials.active.insert(credential_id, current.clone());
        Ok(current)
    }

    async fn revoke_credential(&self, credential_id: Uuid) -> Result<()> {
        let mut credentials = lock(&self.credentials);
        if credentials.active.remove(&credential_id).is_some() {
            credentials.revoked.insert(credential_id);
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockEndpointState {
    refresh_calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    failure: Mutex<Option<String>>,
    revoked: Mutex<Vec<String>>,
    last_client_id: Mutex<Option<String>>,
}

/// [`TokenEndpoint`] that issues `access-{n}` tokens and records every call.
#[derive(Clone, Default)]
pub struct MockTokenEndpoint {
    state: Arc<MockEndpointState>,
}

impl MockTokenEndpoint {
    /// Lifetime of issued access tokens in seconds.
    pub const EXPIRES_IN_SECS: i64 = 3600;

    /// Creates an endpoint that succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every refresh by `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.state.delay) = Some(delay);
        self
    }

    /// Makes every following call fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *lock(&self.state.failure) = Some(message.into());
    }

    /// Returns the number of refresh calls received.
    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    /// Returns the tokens passed to `revoke`, in call order.
    pub fn revoked_tokens(&self) -> Vec<String> {
        lock(&self.state.revoked).clone()
    }

    /// Returns the client id used by the last refresh.
    pub fn last_client_id(&self) -> Option<String> {
        lock(&self.state.last_client_id).clone()
    }
}

#[async_trait::async_trait]
impl TokenEndpoint for MockTokenEndpoint {
    async fn refresh(
        &self,
        client: &OAuthClientCredentials,
        _refresh_token: &str,
    ) -> Result<TokenGrant> {
        let call = self.state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.state.last_client_id) = Some(client.client_id.clone());

        let delay = *lock(&self.state.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = lock(&self.state.failure).clone();
        if let Some(message) = failure {
            return Err(Error::new(ErrorKind::TokenRefreshFailed).with_message(message));
        }

        Ok(TokenGrant {
            access_token: format!("access-{call}"),
            expires_in: Some(Self::EXPIRES_IN_SECS),
            refresh_token: None,
            scope: None,
            token_type: Some("Bearer".to_owned()),
        })
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        lock(&self.state.revoked).push(token.to_owned());

        let failure = lock(&self.state.failure).clone();
        match failure {
            Some(message) => Err(Error::new(ErrorKind::TokenRevokeFailed).with_message(message)),
            None => Ok(()),
        }
    }
}
