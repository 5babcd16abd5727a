use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;

use super::service::VisitCounterService;
use super::types::{ErrorResponse, NodeRequest, NodesResponse, RecordResponse};
use crate::error::ShardError;
use crate::storage::types::NodeId;

pub const ENDPOINT_VISIT: &str = "/visit";
pub const ENDPOINT_VISITS: &str = "/visits";
pub const ENDPOINT_ADMIN_NODES: &str = "/admin/nodes";
pub const ENDPOINT_ADMIN_NODES_REMOVE: &str = "/admin/nodes/remove";
pub const ENDPOINT_ADMIN_FLUSH: &str = "/admin/flush";

/// Public counter API plus the membership admin endpoints.
pub fn counter_router(service: Arc<VisitCounterService>) -> Router {
    Router::new()
        .route(&format!("{}/:page_id", ENDPOINT_VISIT), post(handle_record_visit))
        .route(&format!("{}/:page_id", ENDPOINT_VISITS), get(handle_get_visits))
        .route(
            ENDPOINT_ADMIN_NODES,
            get(handle_list_nodes).post(handle_add_node),
        )
        .route(ENDPOINT_ADMIN_NODES_REMOVE, post(handle_remove_node))
        .route(ENDPOINT_ADMIN_FLUSH, post(handle_flush))
        .layer(Extension(service))
}

pub fn status_for(error: &ShardError) -> StatusCode {
    match error {
        ShardError::NoNodesAvailable | ShardError::NodeUnreachable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ShardError::InvalidKey(_) | ShardError::UnsupportedNode(_) => StatusCode::BAD_REQUEST,
        ShardError::UnknownNode(_) => StatusCode::NOT_FOUND,
        ShardError::LastNodeRemoval(_) => StatusCode::CONFLICT,
        ShardError::MigrationPartialFailure { .. } | ShardError::InvalidValue { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(error: ShardError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    } else {
        tracing::debug!("Request rejected: {}", error);
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub async fn handle_record_visit(
    Extension(service): Extension<Arc<VisitCounterService>>,
    Path(page_id): Path<String>,
) -> Response {
    match service.record_increment(&page_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(RecordResponse {
                status: "success".to_string(),
                message: format!("Visit recorded for page {}", page_id),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_visits(
    Extension(service): Extension<Arc<VisitCounterService>>,
    Path(page_id): Path<String>,
) -> Response {
    match service.get_visit_count(&page_id).await {
        Ok(count) => (StatusCode::OK, Json(count)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_list_nodes(
    Extension(service): Extension<Arc<VisitCounterService>>,
) -> (StatusCode, Json<NodesResponse>) {
    (
        StatusCode::OK,
        Json(NodesResponse {
            nodes: service.store().node_ids(),
        }),
    )
}

pub async fn handle_add_node(
    Extension(service): Extension<Arc<VisitCounterService>>,
    Json(req): Json<NodeRequest>,
) -> Response {
    match service.store().add_node(NodeId::new(req.node)).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_remove_node(
    Extension(service): Extension<Arc<VisitCounterService>>,
    Json(req): Json<NodeRequest>,
) -> Response {
    match service.store().remove_node(&NodeId::new(req.node)).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_flush(Extension(service): Extension<Arc<VisitCounterService>>) -> Response {
    let stats = service.flush_all().await;
    (StatusCode::OK, Json(stats)).into_response()
}
