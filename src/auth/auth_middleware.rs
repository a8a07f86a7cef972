// Axum authentication middleware

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::api::responses::ApiError;
use crate::auth::guard::{self, RoleSet};
use crate::auth::token::{Claims, TokenService};
use crate::core::errors::CoreError;

/// Authentication state shared by the middleware
#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenService>,
}

/// Authentication middleware function
///
/// Extracts the bearer token from `Authorization`, validates it, and stores the
/// decoded `Claims` in request extensions for handlers to use.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // 1. Extract token from header
    let token = extract_bearer_token(request.headers()).ok_or(CoreError::Unauthenticated)?;

    // 2. Validate
    let claims = auth_state.tokens.validate(&token).map_err(|e| {
        warn!(
            reason = %e,
            ip_address = ?extract_ip_address(request.headers()),
            "Authentication failed"
        );
        CoreError::Token(e)
    })?;

    // 3. Set extensions for handler
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Route-level role requirement, layered after `auth_middleware`
pub async fn require_roles(
    State(allowed): State<RoleSet>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    guard::check(request.extensions().get::<Claims>(), allowed)?;
    Ok(next.run(request).await)
}

/// Extract bearer token from request headers
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Extract client address, preferring `X-Forwarded-For`
fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .or_else(|| headers.get("X-Real-IP"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
