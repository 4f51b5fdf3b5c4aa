use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Provider,
    Admin,
    /// Internal actor for webhook-driven and sweeper transitions. Never
    /// accepted from a request header.
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Provider => "provider",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }

    fn from_header(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "provider" => Some(Self::Provider),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Authenticated actor as resolved by the fronting gateway. The core treats
/// the `(uid, role)` pair as an opaque trusted value.
#[derive(Debug, Clone)]
pub struct Principal {
    pub uid: String,
    pub role: Role,
}

impl Principal {
    pub fn new(uid: impl Into<String>, role: Role) -> Self {
        Self {
            uid: uid.into(),
            role,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let uid = parts
            .headers
            .get("x-uid")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthorized("missing x-uid header"))?;

        let role = parts
            .headers
            .get("x-role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::from_header)
            .ok_or_else(|| ApiError::unauthorized("missing or invalid x-role header"))?;

        Ok(Principal::new(uid, role))
    }
}

/// Verifies the shared gateway bearer token before the `x-uid` / `x-role`
/// headers are trusted. When no token is configured (development), requests
/// pass through; production refuses to start without one.
pub async fn gateway_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = &state.config.gateway_token else {
        return Ok(next.run(req).await);
    };

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let token =
        bearer_token(header).ok_or_else(|| ApiError::unauthorized("gateway token required"))?;

    if !constant_time_eq(expected.as_bytes(), token.as_bytes()) {
        return Err(ApiError::unauthorized("gateway token rejected"));
    }

    Ok(next.run(req).await)
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
