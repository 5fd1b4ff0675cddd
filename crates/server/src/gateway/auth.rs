use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;
use super::AppState;

pub const API_KEY_HEADER: &str = "PDF-CHAT-API-KEY";

/// A request that presented the configured shared secret.
#[derive(Debug, Clone)]
pub struct ApiKey(pub String);

#[async_trait]
impl FromRequestParts<AppState> for ApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ApiError::MissingApiKey)?;

        if !keys_match(presented.as_bytes(), state.api_key.as_bytes()) {
            return Err(ApiError::InvalidApiKey);
        }

        Ok(ApiKey(presented.to_string()))
    }
}

/// Compares without short-circuiting on the first differing byte.
fn keys_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
