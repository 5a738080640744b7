//! Caller identity.
//!
//! Token verification happens upstream; the authentication layer forwards the
//! verified user id in the `x-user-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

/// Header carrying the verified user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Extractor for the authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(|id| AuthUser(UserId::new(id)))
            .ok_or_else(|| ApiError::Unauthorized(format!("malformed {USER_ID_HEADER} header")))
    }
}
