#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Shared response/error envelope used by every Nivo HTTP service.
//!
//! Every handler returns `Envelope<T>` (or, via [`AppError`], an error
//! envelope) so that success and failure payloads have exactly the two
//! documented shapes: `{success: true, data, meta?}` or
//! `{success: false, error, meta?}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

mod money;
pub use money::Currency;
pub use money::Money;
pub use money::MoneyError;

/// Closed enumeration of error codes. Each variant maps to exactly one HTTP
/// status via [`ErrorCode::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
    InsufficientFunds,
    LimitExceeded,
    WalletFrozen,
    AccountFrozen,
    RateLimited,
}

impl ErrorCode {
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::LimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::WalletFrozen => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::AccountFrozen => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The seam every domain error type implements so it can be turned into an
/// HTTP response without each handler hand-rolling a `match`.
pub trait IntoEnvelopeError {
    fn code(&self) -> ErrorCode;
    fn message(&self) -> String;
    fn details(&self) -> Option<Value> {
        None
    }
}

/// An error ready to be returned directly from an `axum` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    pub error: ApiError,
}

impl AppError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ApiError {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.error.details = Some(details);
        self
    }

    #[must_use]
    pub fn from_domain<E: IntoEnvelopeError>(err: &E) -> Self {
        Self {
            error: ApiError {
                code: err.code(),
                message: err.message(),
                details: err.details(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.error.code.status();
        (status, Json(Envelope::<()>::error(self.error))).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageMeta {
    #[must_use]
    pub fn new(page: u32, page_size: u32, total_items: u64) -> Self {
        let page_size = page_size.max(1);
        let total_pages = ((total_items as f64) / f64::from(page_size)).ceil() as u32;
        let total_pages = total_pages.max(1);
        Self {
            page,
            page_size,
            total_pages,
            total_items,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }
    }

    #[must_use]
    pub fn ok_with_meta(data: T, meta: PageMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(meta),
        }
    }

    #[must_use]
    pub fn error(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            self.error
                .as_ref()
                .map(|e| e.code.status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        };
        (status, Json(self)).into_response()
    }
}

/// Wraps a `(StatusCode, Envelope<T>)` pair for handlers that need to pick
/// a status distinct from the default (e.g. `201 Created`).
pub struct Created<T>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(Envelope::ok(self.0))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn page_meta_computes_ceiling_division() {
        let meta = PageMeta::new(1, 10, 25);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next);
        assert!(!meta.has_prev);
    }

    #[test]
    fn page_meta_floors_total_pages_at_one_when_empty() {
        let meta = PageMeta::new(1, 10, 0);
        assert_eq!(meta.total_pages, 1);
        assert!(!meta.has_next);
    }

    #[test]
    fn error_code_status_mapping_is_stable() {
        assert_eq!(ErrorCode::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::Unavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn envelope_serializes_without_null_fields() {
        let envelope = Envelope::ok(42);
        let json = serde_json::to_value(&envelope).expect("serializable");
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert!(json.get("error").is_none());
        assert!(json.get("meta").is_none());
    }
}
