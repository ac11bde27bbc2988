//! Route handlers for the rental lifecycle surface.

use crate::api::types::{DeployResponse, RentalView, StatusQuery, TerminateResponse};
use crate::domain::orchestrator::{DeployRequest, SshAccess};
use crate::domain::status::ClusterStatus;
use crate::domain::types::ClusterId;
use crate::error::Result;
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::json;
use tracing::info;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "neotix-rentals" }))
}

/// Deploy the cluster's chosen GPU configuration.
pub async fn deploy_gpu(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
    body: Option<Json<DeployRequest>>,
) -> Result<Json<DeployResponse>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    info!(%cluster_id, "deploy requested");

    let outcome = state.orchestrator.deploy(&cluster_id, request).await?;
    Ok(Json(DeployResponse::from(outcome)))
}

/// Terminate the cluster's rental and settle billing.
pub async fn terminate_gpu(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
) -> Result<Json<TerminateResponse>> {
    info!(%cluster_id, "terminate requested");

    let outcome = state.orchestrator.terminate(&cluster_id).await?;
    Ok(Json(TerminateResponse::from(outcome)))
}

/// Key material and live connection details for the active rental.
pub async fn gpu_ssh_key(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
) -> Result<Json<SshAccess>> {
    Ok(Json(state.orchestrator.ssh_access(&cluster_id).await?))
}

pub async fn cluster_status(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
) -> Result<Json<ClusterStatus>> {
    Ok(Json(state.status.resolve_cluster(&cluster_id).await?))
}

pub async fn all_cluster_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<ClusterStatus>>> {
    Ok(Json(state.status.resolve_all(&query.user_id).await?))
}

pub async fn cluster_history(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
) -> Result<Json<Vec<RentalView>>> {
    let history = state.registry.history_for(&cluster_id).await?;
    Ok(Json(history.into_iter().map(RentalView::from).collect()))
}
