use std::sync::Arc;

use nivo_ledger::InMemoryLedgerService;
use nivo_ledger::http::internal_router;
use nivo_ledger::http::router;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async { signal::ctrl_c().await.expect("failed to install SIGINT handler") };
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
}

#[cfg(feature = "postgres")]
async fn build_service() -> Arc<dyn nivo_ledger::LedgerService> {
    let cfg = nivo_persistence::PgPoolConfig::from_env().expect("DATABASE_URL must be set");
    let pool = nivo_persistence::pg::connect(&cfg).await.expect("failed to connect to postgres");
    if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
        nivo_persistence::pg::run_migrations(&pool, std::path::Path::new(&dir))
            .await
            .expect("failed to run migrations");
    }
    Arc::new(nivo_ledger::postgres_store::PostgresLedgerService::new(pool))
}

#[cfg(not(feature = "postgres"))]
async fn build_service() -> Arc<dyn nivo_ledger::LedgerService> {
    Arc::new(InMemoryLedgerService::new())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let service = build_service().await;
    let app = router(Arc::clone(&service)).merge(internal_router(service));

    let addr = std::env::var("LEDGER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8083".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind ledger listener");
    tracing::info!(%addr, "nivo-ledger listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("ledger server crashed");
}
