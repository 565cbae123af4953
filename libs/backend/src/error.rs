//! Error type shared by every backend contract

use common::error::{CacheError, DatabaseError};
use thiserror::Error;

/// Errors reported by the identity service, record store and change feed
#[derive(Error, Debug)]
pub enum BackendError {
    /// The operation needs an authenticated session
    #[error("Not signed in")]
    Unauthenticated,

    /// The row-level security policy rejected the write
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Provider name not known to the identity service
    #[error("Unsupported identity provider: {0}")]
    UnsupportedProvider(String),

    /// Change feeds only filter on key columns
    #[error("Unsupported change feed filter: {0}")]
    UnsupportedFilter(String),

    /// OAuth callback did not match a pending sign-in
    #[error("Unknown or expired sign-in state")]
    InvalidSignInState,

    /// Failure talking to the OAuth provider
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Session token could not be issued or validated
    #[error("Session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Infrastructure set-up error
    #[error(transparent)]
    Infrastructure(#[from] DatabaseError),

    /// Session storage error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// HTTP error while calling the provider APIs
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A change notification payload could not be decoded
    #[error("Malformed change notification: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The service refused the request (network down, maintenance)
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Type alias for backend results
pub type BackendResult<T> = Result<T, BackendError>;
