//! Bearer-token authentication with the pre-shared access key.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use jwt::VerifyWithKey;
use proxops_common::error::Error;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: i64,
}

#[derive(Clone)]
pub struct AuthState {
    key: Option<Hmac<Sha256>>,
}

impl AuthState {
    /// An empty key disables authentication entirely; the caller is expected
    /// to have logged that loudly.
    pub fn new(access_key: &str) -> Result<Self, Error> {
        let key = if access_key.is_empty() {
            None
        } else {
            Some(
                Hmac::new_from_slice(access_key.as_bytes())
                    .map_err(|e| Error::Config(format!("access key: {e}")))?,
            )
        };
        Ok(Self { key })
    }

    pub fn enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn verify(&self, token: &str) -> bool {
        let Some(key) = &self.key else {
            return true;
        };
        let claims: Result<Claims, _> = token.verify_with_key(key);
        claims.is_ok()
    }
}

pub async fn require_auth(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !auth.enabled() {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if !auth.verify(token) {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}
