use std::sync::Arc;

use nivo_wallet::IdentityLookup;
use nivo_wallet::InMemoryWalletService;
use nivo_wallet::UserId;
use nivo_wallet::WalletId;
use nivo_wallet::WalletResult;
use nivo_wallet::http::internal_router;
use nivo_wallet::http::router;
use tokio::signal;

/// Looks up a phone number's owning user and default wallet by calling the
/// identity service directly, the one cross-service hop this service makes
/// outside of what the orchestrator already does for it.
struct HttpIdentityLookup {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait::async_trait]
impl IdentityLookup for HttpIdentityLookup {
    async fn find_user_and_default_wallet(&self, phone: &str) -> WalletResult<Option<(UserId, WalletId)>> {
        #[derive(serde::Deserialize)]
        struct Data {
            user_id: UserId,
            wallet_id: WalletId,
        }
        #[derive(serde::Deserialize)]
        struct Envelope {
            data: Option<Data>,
        }

        let url = format!("{}/internal/v1/phone-lookup", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("phone", phone)])
            .send()
            .await
            .map_err(|err| nivo_wallet::WalletError::IdentityLookup(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|err| nivo_wallet::WalletError::IdentityLookup(err.to_string()))?;
        Ok(envelope.data.map(|d| (d.user_id, d.wallet_id)))
    }

    async fn record_default_wallet(&self, user_id: &UserId, wallet_id: WalletId) -> WalletResult<()> {
        #[derive(serde::Serialize)]
        struct Body {
            wallet_id: WalletId,
        }

        let url = format!("{}/internal/v1/users/{user_id}/default-wallet", self.base_url.trim_end_matches('/'));
        self.client
            .post(&url)
            .json(&Body { wallet_id })
            .send()
            .await
            .map_err(|err| nivo_wallet::WalletError::IdentityLookup(err.to_string()))?;
        Ok(())
    }
}

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
async fn build_service(identity: Arc<dyn IdentityLookup>) -> Arc<dyn nivo_wallet::WalletService> {
    let cfg = nivo_persistence::PgPoolConfig::from_env().expect("DATABASE_URL must be set");
    let pool = nivo_persistence::pg::connect(&cfg).await.expect("failed to connect to postgres");
    if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
        nivo_persistence::pg::run_migrations(&pool, std::path::Path::new(&dir))
            .await
            .expect("failed to run migrations");
    }
    Arc::new(nivo_wallet::postgres_store::PostgresWalletService::new(pool, identity))
}

#[cfg(not(feature = "postgres"))]
async fn build_service(identity: Arc<dyn IdentityLookup>) -> Arc<dyn nivo_wallet::WalletService> {
    Arc::new(InMemoryWalletService::new(identity))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let identity_url = std::env::var("IDENTITY_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8081".to_string());
    let identity: Arc<dyn IdentityLookup> = Arc::new(HttpIdentityLookup {
        client: reqwest::Client::new(),
        base_url: identity_url,
    });

    let service = build_service(identity).await;
    let app = router(Arc::clone(&service)).merge(internal_router(service));

    let addr = std::env::var("WALLET_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8082".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind wallet listener");
    tracing::info!(%addr, "nivo-wallet listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("wallet server crashed");
}
