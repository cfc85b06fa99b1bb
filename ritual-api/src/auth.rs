//! Permission boundary. Callers present a bearer token; tokens are mapped
//! to a permission level through environment configuration. User
//! management, sessions and invitations live outside this service.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ritual_common::Error;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UserPermission {
    None,
    Read,
    ReadWrite,
    Admin,
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(axum::http::header::AUTHORIZATION)?;
    let auth = auth.to_str().ok()?.trim();
    let prefix = "Bearer ";
    if auth.len() <= prefix.len() || !auth.starts_with(prefix) {
        return None;
    }
    Some(auth[prefix.len()..].trim().to_string())
}

fn tokens_from_env(name: &str) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Resolves the caller's permission level from the bearer token.
pub fn permission_for(headers: &HeaderMap) -> UserPermission {
    let Some(token) = extract_bearer(headers) else {
        return UserPermission::None;
    };
    if tokens_from_env("RITUAL_ADMIN_TOKENS").contains(&token) {
        return UserPermission::Admin;
    }
    if tokens_from_env("RITUAL_WRITE_TOKENS").contains(&token) {
        return UserPermission::ReadWrite;
    }
    if tokens_from_env("RITUAL_READ_TOKENS").contains(&token) {
        return UserPermission::Read;
    }
    UserPermission::None
}

/// Rejects callers below the required permission level.
pub fn require(headers: &HeaderMap, minimum: UserPermission) -> Result<(), ApiError> {
    if permission_for(headers) < minimum {
        return Err(ApiError::unauthorized());
    }
    Ok(())
}

/// Error envelope every handler returns: a status code and the message the
/// dashboard shows.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized user".to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Upstream(_) | Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}
