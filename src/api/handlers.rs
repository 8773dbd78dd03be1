// HTTP control surface: order ingestion and status queries

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::types::{OrderStatus, SubmitOrderRequest, SubmitOrderResponse};
use crate::AppState;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "match-relayer",
        "timestamp": Utc::now()
    }))
}

/// Ingest one pre-validated signed order: gate on the enablement table,
/// check invariants, index it, and propose matches. Matches flow to the
/// execution worker asynchronously.
pub async fn submit_order(
    State(state): State<AppState>,
    Json(request): Json<SubmitOrderRequest>,
) -> impl IntoResponse {
    let order = request.order;
    info!("Received order {} from {}", order.id, order.marketplace);

    if let Err(e) = state.registry.require_enabled(order.marketplace, order.kind) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string(), "order_id": null })),
        )
            .into_response();
    }
    if let Err(e) = order.validate(state.config.chain_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string(), "order_id": null })),
        )
            .into_response();
    }

    if let Err(e) = state.storage.save(&order).await {
        error!("Failed to save order {}: {}", order.id, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to save order", "order_id": order.id })),
        )
            .into_response();
    }

    let matches = if order.status == OrderStatus::Active {
        match state.matching.match_order(&order).await {
            Ok(matches) => matches,
            Err(e) => {
                error!("Matching failed for order {}: {}", order.id, e);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    for mtch in &matches {
        if let Err(e) = state.match_tx.send(mtch.clone()) {
            error!("Failed to queue match {} for execution: {}", mtch.id, e);
        }
    }

    let response = SubmitOrderResponse {
        order_id: order.id.clone(),
        status: if matches.is_empty() { "active".to_string() } else { "matched".to_string() },
        matches,
    };
    (StatusCode::OK, Json(response)).into_response()
}

pub async fn get_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> impl IntoResponse {
    match state.storage.get_status(&order_id).await {
        Ok(Some(status)) => {
            (StatusCode::OK, Json(json!({ "order_id": order_id, "status": status })))
                .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "order not found", "order_id": order_id })),
        )
            .into_response(),
        Err(e) => {
            error!("Status lookup failed for {}: {}", order_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "status lookup failed" })),
            )
                .into_response()
        }
    }
}

pub async fn get_execution_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> impl IntoResponse {
    match state.storage.get_execution_status(&order_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => {
            error!("Execution status lookup failed for {}: {}", order_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "execution status lookup failed" })),
            )
                .into_response()
        }
    }
}

/// Mark an order cancelled: it leaves every index and its matches cascade.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> impl IntoResponse {
    let order = match state.storage.get_order(&order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "order not found", "cancelled": false })),
            )
                .into_response();
        }
        Err(e) => {
            error!("Cancel lookup failed for {}: {}", order_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "cancel failed", "cancelled": false })),
            )
                .into_response();
        }
    };

    let mut cancelled = order;
    cancelled.status = OrderStatus::Cancelled;
    match state.storage.save(&cancelled).await {
        Ok(()) => {
            info!("Order {} cancelled", order_id);
            (StatusCode::OK, Json(json!({ "order_id": order_id, "cancelled": true })))
                .into_response()
        }
        Err(e) => {
            error!("Cancel failed for {}: {}", order_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "cancel failed", "cancelled": false })),
            )
                .into_response()
        }
    }
}
