use std::sync::Arc;
use std::time::Duration;

use nivo_ledger::AccountType;
use nivo_ledger::CreateAccountRequest;
use nivo_ledger::InMemoryLedgerService;
use nivo_ledger::LedgerService;
use nivo_rbac::InMemoryRoleStore;
use nivo_rbac::RbacEngine;
use nivo_transactions::InMemoryTransactionStore;
use nivo_transactions::ReconciliationSweep;
use nivo_transactions::TransactionOrchestrator;
use nivo_transactions::http::internal_router;
use nivo_transactions::http::router;
use nivo_wallet::IdentityLookup;
use nivo_wallet::InMemoryWalletService;
use nivo_wallet::UserId;
use nivo_wallet::WalletId;
use nivo_wallet::WalletResult;
use tokio::signal;

/// Looks up a phone number's owning user and default wallet by calling the
/// identity service directly, the same cross-service hop `nivo-wallet`
/// makes on its own behalf.
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
}

/// Creates the clearing account deposits and withdrawals post against.
/// The in-memory ledger starts empty on every boot, so this always creates
/// a fresh account rather than looking one up.
async fn suspense_account_id(ledger: &dyn LedgerService) -> uuid::Uuid {
    ledger
        .create_account(CreateAccountRequest {
            code: "SUSPENSE-INR".to_string(),
            name: "Deposit/withdrawal clearing".to_string(),
            account_type: AccountType::Asset,
            currency: "INR".to_string(),
            parent_account_id: None,
        })
        .await
        .expect("create suspense account")
        .id
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
async fn build_store() -> Arc<dyn nivo_transactions::TransactionStore> {
    let cfg = nivo_persistence::PgPoolConfig::from_env().expect("DATABASE_URL must be set");
    let pool = nivo_persistence::pg::connect(&cfg).await.expect("failed to connect to postgres");
    if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
        nivo_persistence::pg::run_migrations(&pool, std::path::Path::new(&dir))
            .await
            .expect("failed to run migrations");
    }
    Arc::new(nivo_transactions::postgres_store::PostgresTransactionStore::new(pool))
}

#[cfg(not(feature = "postgres"))]
async fn build_store() -> Arc<dyn nivo_transactions::TransactionStore> {
    Arc::new(InMemoryTransactionStore::new())
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

    let ledger: Arc<dyn LedgerService> = Arc::new(InMemoryLedgerService::new());
    let wallets: Arc<dyn nivo_wallet::WalletService> = Arc::new(InMemoryWalletService::new(identity));
    let rbac = Arc::new(RbacEngine::new(Arc::new(InMemoryRoleStore::new())));
    let store: Arc<dyn nivo_transactions::TransactionStore> = build_store().await;

    let suspense_account_id = suspense_account_id(ledger.as_ref()).await;
    let orchestrator = Arc::new(TransactionOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&wallets),
        Arc::clone(&ledger),
        rbac,
        suspense_account_id,
    ));
    let sweep = Arc::new(ReconciliationSweep::new(store, wallets, ledger, chrono::Duration::minutes(5)));

    let sweep_handle = Arc::clone(&sweep);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(err) = sweep_handle.run_once(chrono::Utc::now()).await {
                tracing::warn!(%err, "reconciliation sweep failed");
            }
        }
    });

    let app = router(orchestrator).merge(internal_router(sweep));

    let addr = std::env::var("TRANSACTIONS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8084".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind transactions listener");
    tracing::info!(%addr, "nivo-transactions listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("transactions server crashed");
}
