//! Caller identity set by the upstream authentication layer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::error::AppError;
use crate::execution::Owner;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SERVICE_PRINCIPAL_ID_HEADER: &str = "x-service-principal-id";

/// The authenticated principal making the request.
///
/// Exactly one of `X-User-Id` and `X-Service-Principal-Id` must be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub Owner);

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let owner = match (
            header_string(headers, USER_ID_HEADER),
            header_string(headers, SERVICE_PRINCIPAL_ID_HEADER),
        ) {
            (Some(user), None) => Owner::user(user)?,
            (None, Some(principal)) => Owner::service_principal(principal)?,
            (Some(_), Some(_)) => {
                return Err(AppError::Auth(
                    "Send either X-User-Id or X-Service-Principal-Id, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(AppError::Auth("Not authenticated".to_string()));
            }
        };
        Ok(Self(owner))
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
