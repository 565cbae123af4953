//! Session tokens issued by the identity service
//!
//! Tokens are HS256 JWTs carrying the owner identifier and email. They are
//! the token material of an [`AuthSession`]; a token that fails validation
//! (bad signature, expired) yields no session.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{BackendError, BackendResult},
    models::{AuthSession, Principal},
};

/// Token configuration
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Shared secret used to sign session tokens
    pub secret: String,
    /// Session lifetime in seconds (default: 1 hour)
    pub session_ttl: u64,
}

impl TokenConfig {
    /// Create a new TokenConfig from environment variables
    ///
    /// # Environment Variables
    /// - `SESSION_SECRET`: signing secret (required)
    /// - `SESSION_TTL`: session lifetime in seconds (default: 3600)
    pub fn from_env() -> BackendResult<Self> {
        let secret = std::env::var("SESSION_SECRET").map_err(|_| {
            BackendError::Configuration("SESSION_SECRET environment variable not set".to_string())
        })?;

        let session_ttl = std::env::var("SESSION_TTL")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);

        Ok(TokenConfig {
            secret,
            session_ttl,
        })
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    pub email: String,
    /// Issued at time
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
}

/// Issues and validates session tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    session_ttl: u64,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> BackendResult<Self> {
        if config.secret.len() < 16 {
            return Err(BackendError::Configuration(
                "SESSION_SECRET must be at least 16 bytes".to_string(),
            ));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            session_ttl: config.session_ttl,
        })
    }

    pub fn session_ttl(&self) -> u64 {
        self.session_ttl
    }

    /// Start a session for `user` valid for the configured lifetime
    pub fn issue(&self, user: Principal) -> BackendResult<AuthSession> {
        self.issue_at(user, Utc::now())
    }

    fn issue_at(&self, user: Principal, now: DateTime<Utc>) -> BackendResult<AuthSession> {
        let expires_at = now + chrono::Duration::seconds(self.session_ttl as i64);
        let claims = Claims {
            sub: user.user_id,
            email: user.email.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        Ok(AuthSession {
            user,
            access_token,
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(expires_at),
        })
    }

    /// Rebuild the session a token stands for
    pub fn validate(&self, token: &str) -> BackendResult<AuthSession> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or_else(|| {
            BackendError::Configuration(format!("token expiry out of range: {}", claims.exp))
        })?;

        Ok(AuthSession {
            user: Principal {
                user_id: claims.sub,
                email: claims.email,
            },
            access_token: token.to_string(),
            expires_at,
        })
    }
}
