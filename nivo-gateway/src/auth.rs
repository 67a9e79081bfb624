//! JWT authentication middleware (spec §4.2).
//!
//! A fixed set of public paths bypasses auth entirely. Every other
//! `/api/v1/...` request must carry a valid `Bearer` token; on success the
//! claims are attached to the request's [`RequestContext`] and the
//! `Authorization` header is forwarded to the backend untouched. Failure
//! returns `UNAUTHORIZED` without proxying anything.

use std::sync::Arc;

use axum::extract::Request;
use axum::extract::State;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use http::HeaderMap;
use nivo_envelope::AppError;
use nivo_envelope::ErrorCode;

use crate::GatewayState;
use crate::context::RequestContext;

/// Paths that never require a bearer token (spec §4.2: "registration,
/// login, health, metrics").
pub const PUBLIC_PATHS: &[&str] = &[
    "/api/v1/auth/register",
    "/api/v1/auth/login",
    "/health",
    "/metrics",
];

#[must_use]
pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim)
}

pub async fn auth_middleware(State(state): State<Arc<GatewayState>>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if is_public_path(&path) {
        return next.run(req).await;
    }

    let Some(token) = extract_bearer_token(req.headers()) else {
        return AppError::new(ErrorCode::Unauthorized, "missing bearer token").into_response();
    };

    match state.jwt.validate(token) {
        Ok(claims) => {
            if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
                context.user_id = Some(claims.sub.clone());
            }
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(_) => AppError::new(ErrorCode::Unauthorized, "invalid or expired token").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn public_paths_bypass_auth() {
        assert!(is_public_path("/api/v1/auth/login"));
        assert!(is_public_path("/health"));
        assert!(!is_public_path("/api/v1/wallets"));
    }

    #[test]
    fn extracts_bearer_token_from_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn rejects_non_bearer_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
