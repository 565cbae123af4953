//! User repository for the accounts behind OAuth identities

use sqlx::{PgPool, Row};
use tracing::info;

use super::oauth::OAuthUserProfile;
use crate::{error::BackendResult, models::Principal};

/// User repository for database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find or create the account for a provider identity. The owner
    /// identifier stays stable across sign-ins; the email is refreshed.
    pub async fn upsert_oauth_user(&self, profile: &OAuthUserProfile) -> BackendResult<Principal> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (email, provider, provider_subject)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider, provider_subject) DO UPDATE SET
                email = EXCLUDED.email,
                updated_at = NOW()
            RETURNING id, email
            "#,
        )
        .bind(&profile.email)
        .bind(profile.provider.as_str())
        .bind(&profile.subject)
        .fetch_one(&self.pool)
        .await?;

        let principal = Principal {
            user_id: row.get("id"),
            email: row.get("email"),
        };
        info!("Resolved {} user {}", profile.provider.as_str(), principal.user_id);

        Ok(principal)
    }
}
