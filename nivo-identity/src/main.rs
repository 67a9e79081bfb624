use std::sync::Arc;

use nivo_identity::AdminSessionStore;
use nivo_identity::IdentityService;
use nivo_identity::InMemoryIdentityStore;
use nivo_identity::JwtIssuer;
use nivo_identity::http::router;
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
async fn build_store() -> Arc<dyn nivo_identity::IdentityStore> {
    let cfg = nivo_persistence::PgPoolConfig::from_env().expect("DATABASE_URL must be set");
    let pool = nivo_persistence::pg::connect(&cfg).await.expect("failed to connect to postgres");
    if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
        nivo_persistence::pg::run_migrations(&pool, std::path::Path::new(&dir))
            .await
            .expect("failed to run migrations");
    }
    Arc::new(nivo_identity::postgres_store::PostgresIdentityStore::new(pool))
}

#[cfg(not(feature = "postgres"))]
async fn build_store() -> Arc<dyn nivo_identity::IdentityStore> {
    Arc::new(InMemoryIdentityStore::new())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::error!("JWT_SECRET is required");
        std::process::exit(1);
    });
    let jwt = JwtIssuer::from_secret(jwt_secret).expect("JWT_SECRET must not be empty");

    let service = Arc::new(IdentityService::new(
        build_store().await,
        jwt,
        Arc::new(AdminSessionStore::new()),
    ));
    let app = router(service);

    let addr = std::env::var("IDENTITY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind identity listener");
    tracing::info!(%addr, "nivo-identity listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("identity server crashed");
}
