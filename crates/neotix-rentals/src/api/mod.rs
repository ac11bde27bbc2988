//! Thin HTTP surface over the rental saga. Validation, error mapping and
//! serialization only; every decision lives in the domain layer.

pub mod routes;
pub mod types;

use crate::server::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/clusters/status", get(routes::all_cluster_status))
        .route("/clusters/:cluster_id/gpu/deploy", post(routes::deploy_gpu))
        .route("/clusters/:cluster_id/gpu", delete(routes::terminate_gpu))
        .route(
            "/clusters/:cluster_id/gpu/ssh-key",
            get(routes::gpu_ssh_key),
        )
        .route("/clusters/:cluster_id/status", get(routes::cluster_status))
        .route(
            "/clusters/:cluster_id/history",
            get(routes::cluster_history),
        )
        .with_state(state)
}
