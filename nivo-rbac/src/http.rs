//! Thin `axum` surface over [`RbacEngine`] (spec §6).

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::routing::get;
use axum::routing::post;
use chrono::Utc;
use nivo_envelope::AppError;
use nivo_envelope::Envelope;
use serde::Deserialize;
use serde::Serialize;

use crate::RbacEngine;
use crate::UserId;

pub fn router(engine: Arc<RbacEngine>) -> Router {
    Router::new().route("/api/v1/check-permission", post(check_permission)).with_state(Arc::clone(&engine)).merge(
        Router::new()
            .route("/internal/v1/users/{id}/permissions", get(list_permissions))
            .with_state(engine),
    )
}

#[derive(Debug, Deserialize)]
struct CheckPermissionRequest {
    user_id: UserId,
    permission: String,
}

#[derive(Debug, Serialize)]
struct CheckPermissionResponse {
    allowed: bool,
}

async fn check_permission(
    State(engine): State<Arc<RbacEngine>>,
    Json(request): Json<CheckPermissionRequest>,
) -> Result<Envelope<CheckPermissionResponse>, AppError> {
    let allowed = engine
        .check(&request.user_id, &request.permission, Utc::now())
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(CheckPermissionResponse { allowed }))
}

async fn list_permissions(
    State(engine): State<Arc<RbacEngine>>,
    Path(user_id): Path<UserId>,
) -> Result<Envelope<Vec<String>>, AppError> {
    let permissions = engine
        .effective_permissions(&user_id, Utc::now())
        .await
        .map_err(|e| AppError::from_domain(&e))?;
    Ok(Envelope::ok(permissions.into_iter().collect()))
}
