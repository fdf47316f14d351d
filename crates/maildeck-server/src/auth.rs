use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use ring::hmac;
use serde::Deserialize;

use crate::AppState;
use crate::api::error::ApiError;

/// Verifies HS256 bearer tokens minted by the external auth service and
/// yields the authenticated user id.
pub struct TokenVerifier {
    key: hmac::Key,
    audience: String,
    issuer: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    aud: String,
    iss: String,
    exp: i64,
}

impl TokenVerifier {
    pub fn new(secret: &str, audience: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            audience: audience.into(),
            issuer: issuer.into(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<i64, ApiError> {
        let verifier = min_jwt::verify::ring::HmacKeyVerifier::with_hs256(&self.key);
        let verified = min_jwt::verify(token, &verifier)
            .map_err(|_| ApiError::unauthorized("invalid access token"))?;
        let claims_bytes = verified
            .decode_claims()
            .map_err(|_| ApiError::unauthorized("invalid access token"))?;
        let claims: Claims = serde_json::from_slice(&claims_bytes)
            .map_err(|_| ApiError::unauthorized("invalid access token"))?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(ApiError::unauthorized("access token expired"));
        }
        if claims.aud != self.audience || claims.iss != self.issuer {
            return Err(ApiError::unauthorized("access token not accepted here"));
        }

        claims
            .sub
            .parse::<i64>()
            .map_err(|_| ApiError::unauthorized("invalid access token"))
    }
}

/// Extractor for the authenticated user on every `/v1` route.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing access token"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

        let user_id = state.verifier.verify(token)?;
        Ok(AuthUser(user_id))
    }
}
