//! Reverse proxy to backend services (spec §4.2, §4.2 "Proxy failure
//! policy").
//!
//! An unreachable backend yields `UNAVAILABLE` (503); the gateway never
//! retries a proxied call — retry is the client's policy (spec §4.2).

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use http::HeaderMap;
use http::Method;
use http::StatusCode;
use nivo_envelope::AppError;
use nivo_envelope::ErrorCode;
use reqwest::Client;

use crate::GatewayState;
use crate::headers::HEADER_FORWARDED_HOST;
use crate::headers::HEADER_FORWARDED_PROTO;
use crate::headers::HEADER_REAL_IP;
use crate::headers::HEADER_REQUEST_ID;
use crate::headers::real_ip;
use crate::headers::request_id;

/// Per-outbound-call timeout (spec §5: "10s per outbound call").
pub const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

#[must_use]
pub fn build_client() -> Client {
    Client::builder()
        .timeout(OUTBOUND_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Handles every request that did not match a local route: resolves the
/// target service from the [`crate::registry::ServiceRegistry`], rewrites
/// forwarding headers, and relays the request and response verbatim.
pub async fn proxy_handler(State(state): State<std::sync::Arc<GatewayState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();

    let Some(target) = state.registry.resolve(&path) else {
        return AppError::new(ErrorCode::NotFound, format!("no route for {path}")).into_response();
    };

    let Some(base_url) = state.service_url(target.service) else {
        return AppError::new(ErrorCode::Internal, "target service is not configured").into_response();
    };

    let mut url = format!("{}{}", base_url.trim_end_matches('/'), target.forward_path);
    if let Some(query) = req.uri().query() {
        url.push('?');
        url.push_str(query);
    }

    let method = req.method().clone();
    let mut headers = req.headers().clone();
    let remote = connect_info(&req);
    apply_forwarding_headers(&mut headers, &req, remote);

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::new(ErrorCode::BadRequest, "failed to read request body").into_response();
        }
    };

    send(&state.client, method, &url, &headers, body).await
}

async fn send(client: &Client, method: Method, url: &str, headers: &HeaderMap, body: axum::body::Bytes) -> Response {
    let mut request_builder = client.request(method, url).body(body.to_vec());
    for (name, value) in headers.iter() {
        if name == http::header::HOST {
            continue;
        }
        request_builder = request_builder.header(name.as_str(), value.as_bytes());
    }

    match request_builder.send().await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = Response::builder().status(status);
            if let Some(response_headers) = builder.headers_mut() {
                for (name, value) in upstream.headers() {
                    response_headers.insert(name, value.clone());
                }
            }
            let body = upstream.bytes().await.unwrap_or_default();
            builder.body(Body::from(body)).unwrap_or_else(|_| {
                AppError::new(ErrorCode::Internal, "failed to build proxied response").into_response()
            })
        }
        Err(err) if err.is_timeout() || err.is_connect() => {
            AppError::new(ErrorCode::Unavailable, "upstream service is unreachable").into_response()
        }
        Err(_) => AppError::new(ErrorCode::Internal, "failed to reach upstream service").into_response(),
    }
}

/// Pulls the TCP peer address `axum::serve`'s connect-info layer attaches
/// to every request, falling back to an unroutable placeholder in tests
/// that build requests without it.
pub fn connect_info(req: &Request) -> std::net::SocketAddr {
    req.extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0)
        .unwrap_or_else(|| "0.0.0.0:0".parse().expect("fallback addr parses"))
}

fn apply_forwarding_headers(headers: &mut HeaderMap, req: &Request, remote: std::net::SocketAddr) {
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let scheme = req.uri().scheme_str().unwrap_or("http").to_string();
    let ip = real_ip(req.headers(), remote);
    let id = request_id(req.headers());

    if let Ok(value) = http::HeaderValue::from_str(&host) {
        headers.insert(HEADER_FORWARDED_HOST, value);
    }
    if let Ok(value) = http::HeaderValue::from_str(&scheme) {
        headers.insert(HEADER_FORWARDED_PROTO, value);
    }
    if let Ok(value) = http::HeaderValue::from_str(&ip) {
        headers.insert(HEADER_REAL_IP, value);
    }
    if let Ok(value) = http::HeaderValue::from_str(&id.to_string()) {
        headers.insert(HEADER_REQUEST_ID, value);
    }
}
