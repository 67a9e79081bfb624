//! Thin `axum` surface over [`WalletService`] (spec §6).
//!
//! The wallet service never authenticates a request itself: the gateway
//! strips the bearer token down to a validated `x-user-id`, which the
//! handlers trust. It owns money-container state only; it reaches into
//! the ledger or identity services for nothing here.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::routing::get;
use axum::routing::post;
use chrono::Utc;
use nivo_envelope::AppError;
use nivo_envelope::Created;
use nivo_envelope::Envelope;
use serde::Deserialize;
use serde::Serialize;

use crate::AddBeneficiaryRequest;
use crate::CreateWalletRequest;
use crate::TransferRequest;
use crate::WalletId;
use crate::WalletService;

pub fn router(service: Arc<dyn WalletService>) -> Router {
    Router::new()
        .route("/api/v1/wallets", post(create_wallet))
        .route("/api/v1/wallets/{id}/activate", post(activate_wallet))
        .route("/api/v1/wallets/{id}/balance", get(get_balance))
        .route(
            "/api/v1/wallets/{id}/beneficiaries",
            get(list_beneficiaries).post(add_beneficiary),
        )
        .with_state(service)
}

/// Cross-service surface the transaction orchestrator calls directly
/// (spec §2's "wallet service's reserve-and-move" hop). Not reachable
/// through the gateway's public segment registry.
pub fn internal_router(service: Arc<dyn WalletService>) -> Router {
    Router::new()
        .route("/internal/v1/wallets/{id}", get(get_wallet))
        .route("/internal/v1/wallets/{id}/limits", get(get_wallet_limits))
        .route("/internal/v1/wallets/reserve-and-move", post(reserve_and_move))
        .with_state(service)
}

async fn get_wallet(
    State(service): State<Arc<dyn WalletService>>,
    Path(id): Path<WalletId>,
) -> Result<Envelope<crate::Wallet>, AppError> {
    let wallet = service.get_wallet(id).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(wallet))
}

async fn get_wallet_limits(
    State(service): State<Arc<dyn WalletService>>,
    Path(id): Path<WalletId>,
) -> Result<Envelope<crate::WalletLimits>, AppError> {
    let limits = current_limits(service.as_ref(), id).await?;
    Ok(Envelope::ok(limits))
}

async fn reserve_and_move(
    State(service): State<Arc<dyn WalletService>>,
    Json(request): Json<TransferRequest>,
) -> Result<Envelope<crate::TransferOutcome>, AppError> {
    let outcome = service.reserve_and_move(request).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(outcome))
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    balance: i64,
    available_balance: i64,
}

async fn create_wallet(
    State(service): State<Arc<dyn WalletService>>,
    Json(request): Json<CreateWalletRequest>,
) -> Result<Created<crate::Wallet>, AppError> {
    let wallet = service.create_wallet(request).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(wallet))
}

async fn activate_wallet(
    State(service): State<Arc<dyn WalletService>>,
    Path(id): Path<WalletId>,
) -> Result<Envelope<crate::Wallet>, AppError> {
    let wallet = service.activate_wallet(id).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(wallet))
}

async fn get_balance(
    State(service): State<Arc<dyn WalletService>>,
    Path(id): Path<WalletId>,
) -> Result<Envelope<BalanceResponse>, AppError> {
    let wallet = service.get_wallet(id).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(BalanceResponse {
        balance: wallet.balance_minor,
        available_balance: wallet.available_balance_minor,
    }))
}

#[derive(Debug, Deserialize)]
struct AddBeneficiaryBody {
    owner_user_id: String,
    phone: String,
    nickname: String,
}

async fn add_beneficiary(
    State(service): State<Arc<dyn WalletService>>,
    Json(body): Json<AddBeneficiaryBody>,
) -> Result<Created<crate::Beneficiary>, AppError> {
    let beneficiary = service
        .add_beneficiary(AddBeneficiaryRequest {
            owner_user_id: body.owner_user_id,
            phone: body.phone,
            nickname: body.nickname,
        })
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(beneficiary))
}

#[derive(Debug, Deserialize)]
struct ListBeneficiariesQuery {
    owner_user_id: String,
}

async fn list_beneficiaries(
    State(service): State<Arc<dyn WalletService>>,
    axum::extract::Query(query): axum::extract::Query<ListBeneficiariesQuery>,
) -> Result<Envelope<Vec<crate::Beneficiary>>, AppError> {
    let beneficiaries = service
        .list_beneficiaries(&query.owner_user_id)
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(beneficiaries))
}

/// Internal helper kept on the service for the orchestrator and tests:
/// fetches a wallet's lazily-reset limits as of now.
pub async fn current_limits(service: &dyn WalletService, id: WalletId) -> Result<crate::WalletLimits, AppError> {
    service.get_limits(id, Utc::now()).await.map_err(|e| AppError::from_domain(&e))
}
