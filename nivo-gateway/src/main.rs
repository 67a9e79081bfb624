use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nivo_gateway::GatewayState;
use nivo_gateway::build_router;
use nivo_gateway::registry::Service;
use nivo_identity::JwtIssuer;
use tokio::net::TcpListener;
use tokio::signal;

/// Reads `{SERVICE}_SERVICE_URL` for every backend the registry knows
/// about; a service missing from the environment simply has no route
/// (the proxy handler answers `INTERNAL` if something tries to reach it).
fn service_urls_from_env() -> HashMap<Service, String> {
    [
        Service::Identity,
        Service::Wallet,
        Service::Transaction,
        Service::Ledger,
        Service::Rbac,
    ]
    .into_iter()
    .filter_map(|service| std::env::var(service.env_var()).ok().map(|url| (service, url)))
    .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_default();
    let jwt = Arc::new(JwtIssuer::from_secret(jwt_secret).expect("JWT_SECRET must be set and non-empty"));

    let state = Arc::new(GatewayState::new(jwt, service_urls_from_env()));
    let app = build_router(state);

    let addr = std::env::var("GATEWAY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = TcpListener::bind(&addr).await.expect("failed to bind gateway listener");
    tracing::info!(%addr, "nivo-gateway listening");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());

    // Spec §5: "30s graceful shutdown window" once the signal fires; axum
    // drains in-flight requests on its own, so this is an upper bound on
    // how long `serve` is allowed to block past the signal.
    if tokio::time::timeout(Duration::from_secs(30), server).await.is_err() {
        tracing::warn!("graceful shutdown window elapsed before all connections drained");
    }
}
