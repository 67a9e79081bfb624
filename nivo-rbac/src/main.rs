use std::sync::Arc;

use nivo_rbac::InMemoryRoleStore;
use nivo_rbac::RbacEngine;
use nivo_rbac::http::router;
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
async fn build_store() -> Arc<dyn nivo_rbac::RoleStore> {
    let cfg = nivo_persistence::PgPoolConfig::from_env().expect("DATABASE_URL must be set");
    let pool = nivo_persistence::pg::connect(&cfg).await.expect("failed to connect to postgres");
    if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
        nivo_persistence::pg::run_migrations(&pool, std::path::Path::new(&dir))
            .await
            .expect("failed to run migrations");
    }
    Arc::new(nivo_rbac::postgres_store::PostgresRoleStore::new(pool))
}

#[cfg(not(feature = "postgres"))]
async fn build_store() -> Arc<dyn nivo_rbac::RoleStore> {
    Arc::new(InMemoryRoleStore::new())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let engine = Arc::new(RbacEngine::new(build_store().await));
    let app = router(engine);

    let addr = std::env::var("RBAC_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8085".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind rbac listener");
    tracing::info!(%addr, "nivo-rbac listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("rbac server crashed");
}
