use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use thiserror::Error;

pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Horizon used by the scheduled token-refresh tick.
pub const SCHEDULED_REFRESH_HORIZON: Duration = Duration::minutes(10);
/// Horizon used by on-demand callers (send, move, label listing) before they
/// talk to the provider.
pub const ON_DEMAND_REFRESH_HORIZON: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl OAuthTokens {
    pub fn needs_refresh(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        now + horizon >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("missing refresh token")]
    MissingRefreshToken,
    #[error("authorization code exchange returned no refresh token")]
    NoRefreshTokenGranted,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token response decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("invalid expires_in value: {0}")]
    InvalidExpires(i64),
}

impl OAuthError {
    /// Invalid grants mean the user revoked access; retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        match self {
            OAuthError::MissingRefreshToken | OAuthError::NoRefreshTokenGranted => true,
            OAuthError::TokenEndpoint { status, body } => {
                (400..500).contains(status) || body.contains("invalid_grant")
            }
            _ => false,
        }
    }
}

/// Persistence seam invoked whenever a client refreshes its tokens mid-call.
#[async_trait]
pub trait TokenStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn save_tokens(&self, tokens: &OAuthTokens) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopTokenStore;

#[async_trait]
impl TokenStore for NoopTokenStore {
    type Error = Infallible;

    async fn save_tokens(&self, _tokens: &OAuthTokens) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[allow(dead_code)]
    token_type: Option<String>,
}

pub async fn refresh_access_token_with_endpoint(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    tokens: &OAuthTokens,
    endpoint: &str,
) -> Result<OAuthTokens, OAuthError> {
    if tokens.refresh_token.is_empty() {
        return Err(OAuthError::MissingRefreshToken);
    }

    let response = client
        .post(endpoint)
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", tokens.refresh_token.as_str()),
        ])
        .send()
        .await?;

    let payload = decode_token_response(response).await?;
    let refresh_token = payload
        .refresh_token
        .unwrap_or_else(|| tokens.refresh_token.clone());

    Ok(OAuthTokens {
        access_token: payload.access_token,
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(payload.expires_in),
    })
}

/// Exchange an authorization code (with its PKCE verifier) for a fresh token
/// pair during mailbox connection.
pub async fn exchange_code_with_endpoint(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code: &str,
    code_verifier: &str,
    endpoint: &str,
) -> Result<OAuthTokens, OAuthError> {
    let response = client
        .post(endpoint)
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("code", code),
            ("code_verifier", code_verifier),
        ])
        .send()
        .await?;

    let payload = decode_token_response(response).await?;
    let refresh_token = payload
        .refresh_token
        .ok_or(OAuthError::NoRefreshTokenGranted)?;

    Ok(OAuthTokens {
        access_token: payload.access_token,
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(payload.expires_in),
    })
}

async fn decode_token_response(response: reqwest::Response) -> Result<TokenResponse, OAuthError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text().await?;
    let payload: TokenResponse = serde_json::from_str(&body).map_err(OAuthError::Decode)?;
    if payload.expires_in <= 0 {
        return Err(OAuthError::InvalidExpires(payload.expires_in));
    }
    Ok(payload)
}
