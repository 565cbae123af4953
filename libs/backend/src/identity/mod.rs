//! Identity service contract and its hosted implementation
//!
//! The identity service owns the authenticated principal. It answers the
//! current session, pushes every change to registered listeners, and runs
//! the third-party sign-in flow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    error::{BackendError, BackendResult},
    listeners::ListenerHandle,
    models::Session,
};

pub mod hosted;
pub mod oauth;
pub mod token;
pub mod users;

pub use hosted::{HostedIdentity, IdentityConfig};

/// Handle of a session-change registration; dropping it unregisters
pub type SessionListener = ListenerHandle;

/// Callback invoked with every new session value
pub type SessionCallback = Box<dyn Fn(&Session) + Send + Sync>;

/// Third-party identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    /// Get the provider name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            other => Err(BackendError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Outcome of starting a sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignIn {
    /// The user must visit `url`; the session arrives after the callback
    Redirect { url: String },
    /// Signed in without a redirect
    Completed,
}

/// Query parameters of the provider redirect
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthCallback {
    pub code: String,
    pub state: String,
}

/// Capability contract of the identity service
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Latest known session
    async fn current_session(&self) -> BackendResult<Session>;

    /// Register for session changes for as long as the handle lives
    fn on_session_change(&self, callback: SessionCallback) -> SessionListener;

    /// Start the provider's sign-in flow
    async fn sign_in_with_provider(&self, provider: OAuthProvider) -> BackendResult<SignIn>;

    /// Finish a redirect-based sign-in
    async fn complete_sign_in(&self, callback: OAuthCallback) -> BackendResult<Session>;

    async fn sign_out(&self) -> BackendResult<()>;
}
