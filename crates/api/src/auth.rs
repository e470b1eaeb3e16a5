//! Caller identity extraction.
//!
//! Authentication is an external concern (a reverse proxy or gateway
//! terminates it); handlers consume only the resolved user id, delivered
//! in the `x-user-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use annolab_core::types::DbId;

use crate::error::AppError;

/// Header carrying the authenticated caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, extracted from request headers.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: DbId,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {USER_ID_HEADER} header")))?;

        let user_id = header
            .to_str()
            .ok()
            .and_then(|value| value.parse::<DbId>().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(format!("Invalid {USER_ID_HEADER} header"))
            })?;

        Ok(AuthUser { user_id })
    }
}
