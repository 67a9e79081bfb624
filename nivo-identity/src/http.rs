//! Thin `axum` surface over [`IdentityService`] (spec §6).
//!
//! `/internal/v1/*` routes are service-network only: no gateway auth check
//! fronts them, matching spec's "Internal (no auth, service-network only)"
//! list.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::routing::get;
use axum::routing::post;
use nivo_envelope::AppError;
use nivo_envelope::Created;
use nivo_envelope::Envelope;
use serde::Deserialize;
use serde::Serialize;

use crate::IdentityService;
use crate::LoginRequest;
use crate::RegisterRequest;
use crate::UserId;
use crate::UserResponse;

pub fn router(service: Arc<IdentityService>) -> Router {
    Router::new()
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
        .route("/internal/v1/phone-lookup", get(phone_lookup))
        .route("/internal/v1/users/{id}/default-wallet", post(set_default_wallet))
        .with_state(service)
}

async fn register(
    State(service): State<Arc<IdentityService>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Created<UserResponse>, AppError> {
    let user = service.register(request).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Created(UserResponse::from(&user)))
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    user: UserResponse,
}

async fn login(
    State(service): State<Arc<IdentityService>>,
    Json(request): Json<LoginRequest>,
) -> Result<Envelope<LoginResponse>, AppError> {
    let (token, user) = service.login(request).await.map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(LoginResponse {
        token,
        user: UserResponse::from(&user),
    }))
}

#[derive(Debug, Deserialize)]
struct PhoneLookupQuery {
    phone: String,
}

#[derive(Debug, Serialize)]
struct PhoneLookupResponse {
    user_id: UserId,
    wallet_id: uuid::Uuid,
}

async fn phone_lookup(
    State(service): State<Arc<IdentityService>>,
    Query(query): Query<PhoneLookupQuery>,
) -> Result<Envelope<PhoneLookupResponse>, AppError> {
    let found = service.phone_lookup(&query.phone).await.map_err(|e| AppError::from_domain(&e))?;
    let (user_id, wallet_id) = found.ok_or(AppError::new(
        nivo_envelope::ErrorCode::NotFound,
        format!("no user with a default wallet for phone {}", query.phone),
    ))?;
    Ok(Envelope::ok(PhoneLookupResponse { user_id, wallet_id }))
}

#[derive(Debug, Deserialize)]
struct SetDefaultWalletBody {
    wallet_id: uuid::Uuid,
}

async fn set_default_wallet(
    State(service): State<Arc<IdentityService>>,
    Path(id): Path<UserId>,
    Json(body): Json<SetDefaultWalletBody>,
) -> Result<Envelope<()>, AppError> {
    service
        .set_default_wallet_if_unset(id, body.wallet_id)
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(()))
}
