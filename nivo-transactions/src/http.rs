//! Thin `axum` surface over [`TransactionOrchestrator`] (spec §6).
//!
//! Reversal, like every other mutation here, trusts the caller's identity
//! as forwarded by the gateway; the orchestrator itself still checks RBAC
//! permissions before moving money.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::routing::get;
use axum::routing::post;
use chrono::DateTime;
use chrono::Utc;
use nivo_envelope::AppError;
use nivo_envelope::Created;
use nivo_envelope::Envelope;
use serde::Deserialize;
use uuid::Uuid;

use crate::CreateTransferRequest;
use crate::ReconciliationSweep;
use crate::TransactionFilter;
use crate::TransactionId;
use crate::TransactionOrchestrator;
use crate::TransactionStatus;
use crate::TransactionType;

pub fn router(orchestrator: Arc<TransactionOrchestrator>) -> Router {
    Router::new()
        .route("/api/v1/transactions/transfer", post(create_transfer))
        .route("/api/v1/transactions/deposit", post(create_deposit))
        .route("/api/v1/transactions/withdrawal", post(create_withdrawal))
        .route("/api/v1/transactions/{id}", get(get_transaction))
        .route("/api/v1/transactions/{id}/reverse", post(reverse_transaction))
        .route("/api/v1/wallets/{id}/transactions", get(list_wallet_transactions))
        .with_state(orchestrator)
}

/// Mounted separately from [`router`] since a reconciliation sweep is an
/// operational endpoint, not part of the public API surface.
pub fn internal_router(sweep: Arc<ReconciliationSweep>) -> Router {
    Router::new().route("/internal/v1/transactions/reconcile", post(run_reconciliation_sweep)).with_state(sweep)
}

async fn create_transfer(
    State(orchestrator): State<Arc<TransactionOrchestrator>>,
    Json(request): Json<CreateTransferRequest>,
) -> Result<Created<crate::Transaction>, AppError> {
    let transaction = orchestrator.create_transfer(request).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(transaction))
}

#[derive(Debug, Deserialize)]
struct OneSidedBody {
    initiated_by: String,
    wallet_id: Uuid,
    amount_minor: i64,
    currency: String,
    description: String,
}

async fn create_deposit(
    State(orchestrator): State<Arc<TransactionOrchestrator>>,
    Json(body): Json<OneSidedBody>,
) -> Result<Created<crate::Transaction>, AppError> {
    let transaction = orchestrator
        .create_deposit(body.initiated_by, body.wallet_id, body.amount_minor, body.currency, body.description)
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(transaction))
}

async fn create_withdrawal(
    State(orchestrator): State<Arc<TransactionOrchestrator>>,
    Json(body): Json<OneSidedBody>,
) -> Result<Created<crate::Transaction>, AppError> {
    let transaction = orchestrator
        .create_withdrawal(body.initiated_by, body.wallet_id, body.amount_minor, body.currency, body.description)
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(transaction))
}

async fn get_transaction(
    State(orchestrator): State<Arc<TransactionOrchestrator>>,
    Path(id): Path<TransactionId>,
) -> Result<Envelope<crate::Transaction>, AppError> {
    let transaction = orchestrator.get_transaction(id).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(transaction))
}

#[derive(Debug, Deserialize)]
struct ReverseBody {
    reversed_by: String,
    reason: String,
}

async fn reverse_transaction(
    State(orchestrator): State<Arc<TransactionOrchestrator>>,
    Path(id): Path<TransactionId>,
    Json(body): Json<ReverseBody>,
) -> Result<Created<crate::Transaction>, AppError> {
    let transaction = orchestrator
        .reverse_transaction(body.reversed_by, id, body.reason)
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(transaction))
}

/// Query-string DTO for `GET /api/v1/wallets/{id}/transactions`.
///
/// [`TransactionFilter`] itself isn't `Deserialize`: its `page`/`page_size`
/// fields are non-`Option` with defaults a plain derive can't supply for a
/// query string, so this mirrors it field-for-field and fills the defaults
/// in [`into_filter`](ListTransactionsQuery::into_filter).
#[derive(Debug, Deserialize)]
struct ListTransactionsQuery {
    status: Option<TransactionStatus>,
    #[serde(rename = "type")]
    transaction_type: Option<TransactionType>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    search: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

impl ListTransactionsQuery {
    fn into_filter(self, wallet_id: Uuid) -> TransactionFilter {
        TransactionFilter {
            wallet_id: Some(wallet_id),
            status: self.status,
            transaction_type: self.transaction_type,
            from: self.from,
            to: self.to,
            search: self.search,
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(20),
        }
    }
}

async fn list_wallet_transactions(
    State(orchestrator): State<Arc<TransactionOrchestrator>>,
    Path(wallet_id): Path<Uuid>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Envelope<Vec<crate::Transaction>>, AppError> {
    let page = orchestrator
        .list_transactions(query.into_filter(wallet_id))
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok_with_meta(page.items, page.meta))
}

async fn run_reconciliation_sweep(
    State(sweep): State<Arc<ReconciliationSweep>>,
) -> Result<Envelope<Vec<TransactionId>>, AppError> {
    let resolved = sweep.run_once(Utc::now()).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(resolved))
}
