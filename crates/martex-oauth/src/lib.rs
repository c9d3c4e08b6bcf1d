#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod authorized;
mod config;
mod coordinator;
mod endpoint;
mod flow;
mod provider;
mod store;
mod tokens;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod mock;

pub use martex_core::{Error, ErrorKind, Result};

pub use crate::authorized::AuthorizedClient;
pub use crate::config::{OAuthClientCredentials, OAuthConfig};
pub use crate::coordinator::RefreshCoordinator;
pub use crate::endpoint::{GoogleTokenEndpoint, TokenEndpoint};
pub use crate::flow::TokenFlow;
pub use crate::provider::{AuthClientProvider, REFRESH_BUFFER};
pub use crate::store::{
    CredentialStore, CredentialUpdate, PgCredentialStore, StoredCredential, TokenRotation,
};
pub use crate::tokens::{GoogleOAuthTokens, TokenGrant};

/// Tracing target for the refresh coordinator.
pub const TRACING_TARGET_COORDINATOR: &str = "martex_oauth::coordinator";

/// Tracing target for client provisioning.
pub const TRACING_TARGET_PROVIDER: &str = "martex_oauth::provider";

/// Tracing target for refresh and revoke flows.
pub const TRACING_TARGET_FLOW: &str = "martex_oauth::flow";

/// Tracing target for token endpoint HTTP calls.
pub const TRACING_TARGET_ENDPOINT: &str = "martex_oauth::endpoint";
