use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use crate::db::User;
use crate::routes::{AppError, AppState};

const API_KEY_SCHEME: &str = "ApiKey ";

/// The user owning the API key in the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Extracts the key from `Authorization: ApiKey <key>`.
pub fn api_key_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let key = value.strip_prefix(API_KEY_SCHEME)?.trim();
    (!key.is_empty()).then_some(key)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = api_key_from_headers(&parts.headers)
            .ok_or(AppError::Unauthorized("missing or malformed API key"))?;

        let user = state
            .db
            .get_user_by_api_key(api_key)
            .await?
            .ok_or(AppError::Unauthorized("unknown API key"))?;

        Ok(AuthUser(user))
    }
}
