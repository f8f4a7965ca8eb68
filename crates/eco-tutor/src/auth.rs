//! Caller identity from the upstream auth gateway.
//!
//! The gateway authenticates users and forwards who they are in two headers:
//!
//! - `x-user-id`: the user's UUID
//! - `x-user-role`: `student` or `professor`
//!
//! When a gateway token is configured, every `/api` request must also carry
//! `Authorization: Bearer <token>` so the headers cannot be forged by callers
//! that bypass the gateway. Without a configured token all requests pass.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::error::{Result, TutorError};

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's role.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// What a caller is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Chats with the tutor on assignments.
    Student,
    /// Authors assignments and grades sessions.
    Professor,
}

impl std::str::FromStr for Role {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "professor" => Ok(Self::Professor),
            other => Err(TutorError::unauthenticated(format!("unknown role '{other}'"))),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// User id.
    pub user_id: Uuid,
    /// Role.
    pub role: Role,
}

impl Identity {
    /// Reads the identity headers.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Unauthenticated` if a header is missing or
    /// malformed.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let user_id = header_str(headers, USER_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|_| TutorError::unauthenticated(format!("invalid {USER_ID_HEADER}")))?;
        let role = header_str(headers, USER_ROLE_HEADER)?.parse()?;
        Ok(Self { user_id, role })
    }

    /// Returns the user id if the caller has `role`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::AccessDenied` for any other role.
    pub fn require(&self, role: Role) -> Result<Uuid> {
        if self.role == role {
            Ok(self.user_id)
        } else {
            Err(TutorError::AccessDenied)
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::trim)
        .ok_or_else(|| TutorError::unauthenticated(format!("missing {name}")))
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers).map_err(ApiError::from)
    }
}

/// Extracts the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Compares tokens without short-circuiting on the first differing byte.
fn tokens_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len()
        && expected
            .bytes()
            .zip(given.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Rejects requests without the configured gateway token.
pub async fn require_gateway_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.gateway_token.as_deref() else {
        return next.run(req).await;
    };

    match bearer_token(req.headers()) {
        Some(token) if tokens_match(expected, token) => next.run(req).await,
        _ => {
            debug!(path = %req.uri().path(), "Rejected request without gateway token");
            ApiError::from(TutorError::unauthenticated("invalid or missing gateway token"))
                .into_response()
        }
    }
}
