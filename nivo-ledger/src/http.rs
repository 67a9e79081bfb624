//! Thin `axum` surface over [`LedgerService`] (spec §6).

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::routing::get;
use axum::routing::post;
use nivo_envelope::AppError;
use nivo_envelope::Created;
use nivo_envelope::Envelope;
use serde::Deserialize;

use crate::AccountId;
use crate::CreateAccountRequest;
use crate::CreateEntryRequest;
use crate::EntryId;
use crate::LedgerService;

pub fn router(service: Arc<dyn LedgerService>) -> Router {
    Router::new()
        .route("/api/v1/accounts", post(create_account))
        .route("/internal/v1/accounts", post(create_account))
        .route("/api/v1/journal-entries", post(create_entry))
        .route("/api/v1/journal-entries/{id}", get(get_entry))
        .route("/api/v1/journal-entries/{id}/post", post(post_entry))
        .route("/api/v1/journal-entries/{id}/void", post(void_entry))
        .route("/api/v1/journal-entries/{id}/reverse", post(reverse_entry))
        .with_state(service)
}

/// Cross-service surface the transaction orchestrator calls directly for
/// posting and reconciliation. Not reachable through the gateway's public
/// segment registry.
pub fn internal_router(service: Arc<dyn LedgerService>) -> Router {
    Router::new()
        .route("/internal/v1/accounts/{id}", get(get_account))
        .route("/internal/v1/journal-entries", post(create_entry))
        .route("/internal/v1/journal-entries/{id}/post", post(post_entry))
        .route("/internal/v1/journal-entries/{id}/reverse", post(reverse_entry))
        .route("/internal/v1/journal-entries/by-reference", get(find_entry_by_reference))
        .with_state(service)
}

async fn get_account(
    State(service): State<Arc<dyn LedgerService>>,
    Path(id): Path<AccountId>,
) -> Result<Envelope<crate::Account>, AppError> {
    let account = service.get_account(id).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(account))
}

#[derive(Debug, Deserialize)]
struct ReferenceQuery {
    reference_type: String,
    reference_id: String,
}

async fn find_entry_by_reference(
    State(service): State<Arc<dyn LedgerService>>,
    axum::extract::Query(query): axum::extract::Query<ReferenceQuery>,
) -> Result<Envelope<Option<crate::JournalEntry>>, AppError> {
    let entry = service
        .find_entry_by_reference(&query.reference_type, &query.reference_id)
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(entry))
}

async fn create_account(
    State(service): State<Arc<dyn LedgerService>>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<Created<crate::Account>, AppError> {
    let account = service.create_account(request).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(account))
}

async fn create_entry(
    State(service): State<Arc<dyn LedgerService>>,
    Json(request): Json<CreateEntryRequest>,
) -> Result<Created<crate::JournalEntry>, AppError> {
    let entry = service.create_entry(request).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(entry))
}

async fn get_entry(
    State(service): State<Arc<dyn LedgerService>>,
    Path(id): Path<EntryId>,
) -> Result<Envelope<crate::JournalEntry>, AppError> {
    let entry = service.get_entry(id).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(entry))
}

#[derive(Debug, Deserialize)]
struct ActorBody {
    actor: String,
}

async fn post_entry(
    State(service): State<Arc<dyn LedgerService>>,
    Path(id): Path<EntryId>,
    Json(body): Json<ActorBody>,
) -> Result<Envelope<crate::JournalEntry>, AppError> {
    let entry = service.post_entry(id, &body.actor).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(entry))
}

#[derive(Debug, Deserialize)]
struct VoidBody {
    actor: String,
    reason: String,
}

async fn void_entry(
    State(service): State<Arc<dyn LedgerService>>,
    Path(id): Path<EntryId>,
    Json(body): Json<VoidBody>,
) -> Result<Envelope<crate::JournalEntry>, AppError> {
    let entry = service
        .void_entry(id, &body.actor, &body.reason)
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(entry))
}

async fn reverse_entry(
    State(service): State<Arc<dyn LedgerService>>,
    Path(id): Path<EntryId>,
    Json(body): Json<VoidBody>,
) -> Result<Created<crate::JournalEntry>, AppError> {
    let entry = service
        .reverse_entry(id, &body.actor, &body.reason)
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(entry))
}
