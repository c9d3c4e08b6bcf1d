//! Local HTTP server standing in for the Google APIs in provider tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, Method, Uri, header};
use martex_oauth::mock::{MemoryCredentialStore, MockTokenEndpoint};
use martex_oauth::{AuthClientProvider, OAuthConfig, RefreshCoordinator, TokenFlow};
use martex_postgres::types::CredentialScope;
use serde_json::{Value, json};
use uuid::Uuid;

/// Request received by an [`ApiStub`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
}

/// Records every request and answers with the body chosen by a responder.
pub struct ApiStub {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ApiStub {
    /// Starts a server on a random local port.
    pub async fn serve<F>(respond: F) -> Self
    where
        F: Fn(&Method, &str) -> Value + Clone + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let router = Router::new().fallback(move |method: Method, uri: Uri, headers: HeaderMap| {
            let respond = respond.clone();
            let recorded = Arc::clone(&recorded);
            async move {
                let authorization = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                recorded.lock().unwrap().push(RecordedRequest {
                    method: method.clone(),
                    path: uri.path().to_owned(),
                    authorization,
                });
                Json(respond(&method, uri.path()))
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Self { addr, requests }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Returns the `Authorization` header of every request, in order.
    pub fn authorizations(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.authorization.unwrap_or_default())
            .collect()
    }
}

/// Credential store, token endpoint and provider sharing them.
pub struct AuthFixture {
    pub store: MemoryCredentialStore,
    pub endpoint: MockTokenEndpoint,
    pub provider: Arc<AuthClientProvider>,
}

impl AuthFixture {
    pub fn new() -> Self {
        let store = MemoryCredentialStore::new();
        let endpoint = MockTokenEndpoint::new();
        let config = OAuthConfig::new()
            .with_storage_client("storage-id", "storage-secret")
            .with_destination_client("destination-id", "destination-secret")
            .with_redirect_uri("https://app.example.com/oauth/callback");
        let flow = TokenFlow::new(Arc::new(store.clone()), Arc::new(endpoint.clone()), config);
        let provider = AuthClientProvider::new(
            Arc::new(flow),
            RefreshCoordinator::new(),
            reqwest::Client::new(),
        );

        Self {
            store,
            endpoint,
            provider: Arc::new(provider),
        }
    }

    /// Stores a credential whose `stale` access token expires in `millis`.
    pub fn credential_expiring_in(&self, scope: CredentialScope, millis: i64) -> Uuid {
        self.store
            .insert_oauth(scope, json!({
                "access_token": "stale",
                "refresh_token": "refresh",
                "expiry_date": jiff::Timestamp::now().as_millisecond() + millis,
            }))
            .id
    }

    /// Moves the expiry of a stored access token to `millis` from now.
    pub fn expire_in(&self, credential_id: Uuid, millis: i64) {
        let mut credential = self.store.get(credential_id).unwrap();
        let expiry_date = jiff::Timestamp::now().as_millisecond() + millis;
        credential.secret["expiry_date"] = json!(expiry_date);
        credential.expires_at = jiff::Timestamp::from_millisecond(expiry_date).ok();
        self.store.insert(credential);
    }
}
