#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Nivo's edge gateway: a single externally reachable `axum` service that
//! authenticates, rate-limits, and proxies every `/api/v1/...` request to
//! the internal service that owns it (spec §4.2).
//!
//! Unlike the other Nivo crates, the gateway holds no ledger/wallet state
//! of its own — the only mutable state across requests is the rate
//! limiter's buckets and the metrics counters (spec §5).

pub mod auth;
pub mod context;
pub mod headers;
pub mod metrics;
pub mod proxy;
pub mod ratelimit;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use axum::extract::State;
use axum::middleware;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::any;
use axum::routing::get;
use nivo_envelope::AppError;
use nivo_envelope::ErrorCode;
use nivo_identity::JwtIssuer;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::context::RequestContext;
use crate::headers::request_id;
use crate::metrics::Metrics;
use crate::ratelimit::TokenBucketLimiter;
use crate::ratelimit::global_limiter;
use crate::ratelimit::money_movement_limiter;
use crate::registry::Service;
use crate::registry::ServiceRegistry;

/// Per-request read/write budget (spec §5: "15s read/write timeout at the
/// edge").
pub const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared, read-mostly state handed to every handler and middleware layer
/// via `axum`'s `State` extractor.
pub struct GatewayState {
    pub registry: ServiceRegistry,
    pub metrics: Metrics,
    pub client: reqwest::Client,
    pub jwt: Arc<JwtIssuer>,
    pub global_limiter: TokenBucketLimiter,
    pub money_limiter: TokenBucketLimiter,
    service_urls: HashMap<Service, String>,
}

impl GatewayState {
    #[must_use]
    pub fn new(jwt: Arc<JwtIssuer>, service_urls: HashMap<Service, String>) -> Self {
        Self {
            registry: ServiceRegistry::new(),
            metrics: Metrics::new(),
            client: proxy::build_client(),
            jwt,
            global_limiter: global_limiter(),
            money_limiter: money_movement_limiter(),
            service_urls,
        }
    }

    #[must_use]
    pub fn service_url(&self, service: Service) -> Option<&str> {
        self.service_urls.get(&service).map(String::as_str)
    }
}

/// Money-movement paths that sit behind the stricter limiter (spec §4.5).
fn is_money_movement_path(path: &str) -> bool {
    path.starts_with("/api/v1/transactions") || path.contains("/transactions")
}

async fn rate_limit_middleware(State(state): State<Arc<GatewayState>>, req: Request, next: Next) -> Response {
    let remote = proxy::connect_info(&req);
    let key = headers::real_ip(req.headers(), remote);
    let path = req.uri().path().to_string();

    let allowed = if is_money_movement_path(&path) {
        state.money_limiter.try_acquire(&key).await
    } else {
        state.global_limiter.try_acquire(&key).await
    };

    if !allowed {
        return AppError::new(ErrorCode::RateLimited, "rate limit exceeded").into_response();
    }
    next.run(req).await
}

/// Stamps a [`RequestContext`] (request id, deadline, and eventually the
/// authenticated user) onto every request before auth and rate limiting
/// run (spec §9).
async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    let id = request_id(req.headers());
    req.extensions_mut().insert(RequestContext::new(id, READ_WRITE_TIMEOUT));
    next.run(req).await
}

async fn health() -> &'static str {
    "ok"
}

async fn render_metrics(State(state): State<Arc<GatewayState>>) -> String {
    state.metrics.render_prometheus()
}

/// Records the final response status for every request, regardless of
/// whether it was rejected by rate limiting or auth before ever reaching
/// the proxy handler. This must be the outermost layer so it observes the
/// true final status (spec §4.2: "metrics must see the final status").
async fn metrics_middleware(State(state): State<Arc<GatewayState>>, req: Request, next: Next) -> Response {
    state.metrics.record_request();
    let response = next.run(req).await;
    state.metrics.record_status(response.status());
    response
}

/// Builds the full `axum::Router`, applying the middleware stack in the
/// documented outer-to-inner order (spec §4.2): metrics, CORS,
/// request-id assignment, structured logging, panic recovery, global
/// rate limit. Auth sits innermost, just outside the fallback proxy
/// handler, since only routed `/api/v1/...` traffic needs it. "Order
/// matters: metrics must see the final status; request-id must exist
/// before logging; recovery must wrap everything that could panic."
#[must_use]
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let authenticated = Router::new().fallback(any(proxy::proxy_handler)).layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn_with_state(Arc::clone(&state), rate_limit_middleware))
            .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_middleware)),
    );

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .merge(authenticated)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(Arc::clone(&state), metrics_middleware))
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(request_context_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_movement_paths_are_recognized() {
        assert!(is_money_movement_path("/api/v1/transactions"));
        assert!(is_money_movement_path("/api/v1/wallets/w-1/transactions"));
        assert!(!is_money_movement_path("/api/v1/auth/login"));
    }
}
