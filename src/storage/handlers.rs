use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

use super::client::NodeClient;
use super::memory::MemoryNode;
use super::protocol::{
    DeleteRequest, DeleteResponse, ENDPOINT_DELETE, ENDPOINT_GET, ENDPOINT_HEALTH, ENDPOINT_INCR,
    ENDPOINT_SCAN, ENDPOINT_SET, GetResponse, IncrRequest, IncrResponse, ScanParams, ScanResponse,
    SetRequest, SetResponse,
};

/// Routes served by a storage node process.
pub fn node_router(node: Arc<MemoryNode>) -> Router {
    Router::new()
        .route(ENDPOINT_HEALTH, get(handle_health))
        .route(&format!("{}/:key", ENDPOINT_GET), get(handle_get))
        .route(ENDPOINT_SET, post(handle_set))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_INCR, post(handle_incr))
        .route(ENDPOINT_SCAN, get(handle_scan))
        .layer(Extension(node))
}

pub async fn handle_health() -> StatusCode {
    StatusCode::OK
}

pub async fn handle_get(
    Extension(node): Extension<Arc<MemoryNode>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<GetResponse>) {
    match node.get(&key).await {
        Ok(Some(value)) => (StatusCode::OK, Json(GetResponse { value: Some(value) })),
        Ok(None) => (StatusCode::NOT_FOUND, Json(GetResponse { value: None })),
        Err(e) => {
            tracing::error!("Failed to get '{}': {}", key, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(GetResponse { value: None }),
            )
        }
    }
}

pub async fn handle_set(
    Extension(node): Extension<Arc<MemoryNode>>,
    Json(req): Json<SetRequest>,
) -> (StatusCode, Json<SetResponse>) {
    match node.set(&req.key, req.value).await {
        Ok(()) => (StatusCode::OK, Json(SetResponse { success: true })),
        Err(e) => {
            tracing::error!("Failed to set '{}': {}", req.key, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(SetResponse { success: false }),
            )
        }
    }
}

pub async fn handle_delete(
    Extension(node): Extension<Arc<MemoryNode>>,
    Json(req): Json<DeleteRequest>,
) -> (StatusCode, Json<DeleteResponse>) {
    match node.delete(&req.key).await {
        Ok(deleted) => (StatusCode::OK, Json(DeleteResponse { deleted })),
        Err(e) => {
            tracing::error!("Failed to delete '{}': {}", req.key, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(DeleteResponse { deleted: false }),
            )
        }
    }
}

pub async fn handle_incr(
    Extension(node): Extension<Arc<MemoryNode>>,
    Json(req): Json<IncrRequest>,
) -> (StatusCode, Json<IncrResponse>) {
    match node.incr_by(&req.key, req.amount).await {
        Ok(value) => (StatusCode::OK, Json(IncrResponse { value })),
        Err(e) => {
            tracing::error!("Failed to increment '{}': {}", req.key, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(IncrResponse { value: 0 }),
            )
        }
    }
}

pub async fn handle_scan(
    Extension(node): Extension<Arc<MemoryNode>>,
    Query(params): Query<ScanParams>,
) -> (StatusCode, Json<ScanResponse>) {
    let pattern = params.pattern.unwrap_or_else(|| "*".to_string());
    match node.scan_keys(&pattern).await {
        Ok(keys) => (StatusCode::OK, Json(ScanResponse { keys })),
        Err(e) => {
            tracing::warn!("Failed to scan '{}': {}", pattern, e);
            let status = if e.is_unavailable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(ScanResponse { keys: Vec::new() }))
        }
    }
}
