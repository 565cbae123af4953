//! Hosted identity service: Google OAuth2, JWT sessions persisted in Redis

use async_trait::async_trait;
use chrono::Utc;
use common::cache::RedisPool;
use oauth2::PkceCodeVerifier;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    IdentityService, OAuthCallback, OAuthProvider, SessionCallback, SessionListener, SignIn,
    oauth::{OAuthClient, OAuthConfig, OAuthSession},
    token::{TokenConfig, TokenService},
    users::UserRepository,
};
use crate::{
    error::{BackendError, BackendResult},
    listeners::ListenerRegistry,
    models::{AuthSession, Session},
};

/// Pending sign-ins are forgotten after ten minutes
const SIGN_IN_STATE_TTL: u64 = 600;

/// Identity service configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub google: OAuthConfig,
    pub tokens: TokenConfig,
    /// Redis key holding the persisted session
    pub storage_key: String,
}

impl IdentityConfig {
    /// Create a new IdentityConfig from environment variables
    ///
    /// # Environment Variables
    /// - `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`: OAuth client credentials (required)
    /// - `OAUTH_REDIRECT_URL`: callback URL (default: "http://localhost:3000/auth/callback")
    /// - `AUTH_STORAGE_KEY`: persisted session key (default: "bookmarks-auth-token")
    /// - plus the variables read by [`TokenConfig::from_env`]
    pub fn from_env() -> BackendResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| {
                BackendError::Configuration(format!("{} environment variable not set", name))
            })
        };

        let redirect_url = std::env::var("OAUTH_REDIRECT_URL")
            .unwrap_or_else(|_| "http://localhost:3000/auth/callback".to_string());
        let storage_key = std::env::var("AUTH_STORAGE_KEY")
            .unwrap_or_else(|_| "bookmarks-auth-token".to_string());

        Ok(Self {
            google: OAuthConfig::google(
                required("GOOGLE_CLIENT_ID")?,
                required("GOOGLE_CLIENT_SECRET")?,
                redirect_url,
            ),
            tokens: TokenConfig::from_env()?,
            storage_key,
        })
    }
}

/// What is kept in Redis between restarts
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
}

struct Inner {
    google: OAuthClient,
    tokens: TokenService,
    users: UserRepository,
    cache: RedisPool,
    storage_key: String,
    current: RwLock<Session>,
    listeners: ListenerRegistry<Session>,
    expiry: Mutex<Option<JoinHandle<()>>>,
}

/// Identity service backed by Google OAuth2, Postgres accounts and Redis
/// session storage
#[derive(Clone)]
pub struct HostedIdentity {
    inner: Arc<Inner>,
}

impl HostedIdentity {
    /// Build the service and restore a persisted session, if still valid
    pub async fn connect(
        config: &IdentityConfig,
        pool: PgPool,
        cache: RedisPool,
    ) -> BackendResult<Self> {
        let inner = Arc::new(Inner {
            google: OAuthClient::new_google(&config.google)?,
            tokens: TokenService::new(&config.tokens)?,
            users: UserRepository::new(pool),
            cache,
            storage_key: config.storage_key.clone(),
            current: RwLock::new(Session::SignedOut),
            listeners: ListenerRegistry::new(),
            expiry: Mutex::new(None),
        });

        match inner
            .cache
            .get_json::<StoredSession>(&inner.storage_key)
            .await?
        {
            Some(stored) => match inner.tokens.validate(&stored.access_token) {
                Ok(session) => {
                    info!("Restored session for user {}", session.user.user_id);
                    Inner::set_session(&inner, Session::Authenticated(session));
                }
                Err(e) => {
                    warn!("Discarding persisted session: {}", e);
                    inner.cache.delete(&inner.storage_key).await?;
                }
            },
            None => debug!("No persisted session"),
        }

        Ok(Self { inner })
    }
}

impl Inner {
    fn read_session(&self) -> Session {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the session, reschedule expiry and notify listeners
    fn set_session(inner: &Arc<Inner>, session: Session) {
        *inner
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session.clone();

        let timer = match &session {
            Session::Authenticated(auth) => Some(Inner::schedule_expiry(inner, auth)),
            Session::SignedOut => None,
        };
        let previous = std::mem::replace(
            &mut *inner
                .expiry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            timer,
        );
        if let Some(previous) = previous {
            previous.abort();
        }

        inner.listeners.notify(&session);
    }

    fn schedule_expiry(inner: &Arc<Inner>, session: &AuthSession) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let user_id = session.user.user_id;
        let delay = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Inner::expire(&inner, user_id).await;
            }
        })
    }

    async fn expire(inner: &Arc<Inner>, user_id: Uuid) {
        if inner.read_session().user_id() != Some(user_id) {
            return;
        }
        // Detach our own timer so set_session does not abort it.
        inner
            .expiry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        info!("Session for user {} expired", user_id);
        if let Err(e) = inner.cache.delete(&inner.storage_key).await {
            warn!("Failed to remove expired session from Redis: {}", e);
        }
        Inner::set_session(inner, Session::SignedOut);
    }
}

#[async_trait]
impl IdentityService for HostedIdentity {
    async fn current_session(&self) -> BackendResult<Session> {
        let session = self.inner.read_session();
        match &session {
            Session::Authenticated(auth) if auth.expires_at <= Utc::now() => {
                Ok(Session::SignedOut)
            }
            _ => Ok(session),
        }
    }

    fn on_session_change(&self, callback: SessionCallback) -> SessionListener {
        self.inner
            .listeners
            .register(move |session: &Session| callback(session))
    }

    async fn sign_in_with_provider(&self, provider: OAuthProvider) -> BackendResult<SignIn> {
        if provider != self.inner.google.provider() {
            return Err(BackendError::UnsupportedProvider(
                provider.as_str().to_string(),
            ));
        }

        let request = self.inner.google.authorization_request();
        let pending = OAuthSession {
            pkce_verifier: request.pkce_verifier.secret().clone(),
            provider,
            created_at: Utc::now().timestamp(),
        };
        self.inner
            .cache
            .set_json(
                &format!("oauth:{}", request.csrf_token.secret()),
                &pending,
                Some(SIGN_IN_STATE_TTL),
            )
            .await?;

        Ok(SignIn::Redirect { url: request.url })
    }

    async fn complete_sign_in(&self, callback: OAuthCallback) -> BackendResult<Session> {
        let key = format!("oauth:{}", callback.state);
        let pending: OAuthSession = self
            .inner
            .cache
            .get_json(&key)
            .await?
            .ok_or(BackendError::InvalidSignInState)?;
        // Single use
        self.inner.cache.delete(&key).await?;

        let provider_token = self
            .inner
            .google
            .exchange_code(callback.code, PkceCodeVerifier::new(pending.pkce_verifier))
            .await?;
        let profile = self.inner.google.user_profile(&provider_token).await?;
        let principal = self.inner.users.upsert_oauth_user(&profile).await?;

        let session = self.inner.tokens.issue(principal)?;
        self.inner
            .cache
            .set_json(
                &self.inner.storage_key,
                &StoredSession {
                    access_token: session.access_token.clone(),
                },
                Some(self.inner.tokens.session_ttl()),
            )
            .await?;

        info!("User {} signed in", session.user.user_id);
        let session = Session::Authenticated(session);
        Inner::set_session(&self.inner, session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.inner.cache.delete(&self.inner.storage_key).await?;

        if let Some(user_id) = self.inner.read_session().user_id() {
            info!("User {} signed out", user_id);
        }
        Inner::set_session(&self.inner, Session::SignedOut);
        Ok(())
    }
}
