//! Caller identity extracted from the request.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

/// Header carrying the user id verified by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The verified caller of a request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| AuthUser(UserId::new(value)))
            .ok_or(ApiError::Unauthorized)
    }
}
