//! Error model for the authentication backend.
//! Credential rejection and authorization denial are not errors (the backend
//! returns `Ok(None)` for those); this enum covers the operator-facing
//! failure taxonomy only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No HTTP response was obtained from the directory server (DNS/TCP/TLS).
    /// Recoverable once via failover; otherwise fatal to the login call.
    #[error("could not reach directory server {server}")]
    Connection {
        server: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server responded, but not with the JSON-RPC shape we expect.
    #[error("malformed directory response from {server}: {detail}")]
    Protocol { server: String, detail: String },

    /// A field named in the attribute map is absent from the remote profile.
    /// Masking this would leave the local identity inconsistently populated,
    /// so it is surfaced instead of being skipped.
    #[error("remote profile for `{username}` has no field `{field}`")]
    MissingProfileField { username: String, field: String },

    /// The backend settings themselves are unusable.
    #[error("backend misconfigured: {0}")]
    Config(String),

    /// Local identity store failure, propagated unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AuthError::Connection { .. })
    }

    pub(crate) fn protocol(server: impl Into<String>, detail: impl Into<String>) -> Self {
        AuthError::Protocol { server: server.into(), detail: detail.into() }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("password hashing failed: {0}")]
    Password(String),
    #[error("identity store failure: {0}")]
    Persistence(String),
}
