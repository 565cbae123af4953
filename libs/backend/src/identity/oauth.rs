//! OAuth2 integration for the Google provider

use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl, basic::BasicClient,
    reqwest::async_http_client,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::OAuthProvider;
use crate::error::{BackendError, BackendResult};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GOOGLE_SCOPES: &[&str] = &["openid", "email", "profile"];

/// OAuth2 configuration for a provider
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
}

impl OAuthConfig {
    /// Google endpoints with the given client credentials
    pub fn google(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

/// Authorization URL plus the secrets needed to finish the exchange
pub struct AuthorizationRequest {
    pub url: String,
    pub csrf_token: CsrfToken,
    pub pkce_verifier: PkceCodeVerifier,
}

/// OAuth2 client wrapper
#[derive(Clone)]
pub struct OAuthClient {
    provider: OAuthProvider,
    client: BasicClient,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Create a new OAuth2 client for Google
    pub fn new_google(config: &OAuthConfig) -> BackendResult<Self> {
        let invalid = |e: oauth2::url::ParseError| BackendError::Configuration(e.to_string());

        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.auth_url.clone()).map_err(invalid)?,
            Some(TokenUrl::new(config.token_url.clone()).map_err(invalid)?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone()).map_err(invalid)?);

        Ok(Self {
            provider: OAuthProvider::Google,
            client,
            http: reqwest::Client::new(),
        })
    }

    pub fn provider(&self) -> OAuthProvider {
        self.provider
    }

    /// Generate authorization URL with PKCE
    pub fn authorization_request(&self) -> AuthorizationRequest {
        info!("Generating authorization URL for {:?}", self.provider);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);

        for scope in GOOGLE_SCOPES {
            request = request.add_scope(Scope::new(scope.to_string()));
        }

        let (url, csrf_token) = request.url();

        AuthorizationRequest {
            url: url.to_string(),
            csrf_token,
            pkce_verifier,
        }
    }

    /// Exchange authorization code for the provider access token
    pub async fn exchange_code(
        &self,
        code: String,
        pkce_verifier: PkceCodeVerifier,
    ) -> BackendResult<String> {
        info!(
            "Exchanging authorization code for access token for {:?}",
            self.provider
        );

        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| BackendError::OAuth(e.to_string()))?;

        Ok(token_response.access_token().secret().clone())
    }

    /// Get user profile information from the provider
    pub async fn user_profile(&self, access_token: &str) -> BackendResult<OAuthUserProfile> {
        let response = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::OAuth(format!(
                "Failed to get Google user profile: {}",
                response.status()
            )));
        }

        let google_user: GoogleUser = response.json().await?;
        if !google_user.verified_email {
            return Err(BackendError::OAuth(format!(
                "Google account {} has no verified email",
                google_user.email
            )));
        }

        Ok(OAuthUserProfile {
            subject: google_user.id,
            email: google_user.email,
            provider: OAuthProvider::Google,
        })
    }
}

/// Google user profile response
#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    email: String,
    verified_email: bool,
}

/// OAuth user profile information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthUserProfile {
    pub subject: String,
    pub email: String,
    pub provider: OAuthProvider,
}

/// Pending sign-in stored in Redis under the CSRF token
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthSession {
    pub pkce_verifier: String,
    pub provider: OAuthProvider,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuthConfig {
        OAuthConfig::google(
            "client-id".to_string(),
            "client-secret".to_string(),
            "http://localhost:3000/auth/callback".to_string(),
        )
    }

    #[test]
    fn test_authorization_request_carries_pkce_and_state() {
        let client = OAuthClient::new_google(&config()).unwrap();
        let request = client.authorization_request();

        assert!(request.url.starts_with(GOOGLE_AUTH_URL));
        assert!(request.url.contains("client_id=client-id"));
        assert!(request.url.contains("code_challenge_method=S256"));
        assert!(request.url.contains(&format!("state={}", request.csrf_token.secret())));
        assert!(request.url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fcallback"));
        assert!(!request.pkce_verifier.secret().is_empty());
    }

    #[test]
    fn test_each_request_gets_fresh_state() {
        let client = OAuthClient::new_google(&config()).unwrap();
        let first = client.authorization_request();
        let second = client.authorization_request();
        assert_ne!(first.csrf_token.secret(), second.csrf_token.secret());
    }

    #[test]
    fn test_invalid_redirect_url_is_rejected() {
        let mut config = config();
        config.redirect_url = "not a url".to_string();
        assert!(matches!(
            OAuthClient::new_google(&config),
            Err(BackendError::Configuration(_))
        ));
    }
}
