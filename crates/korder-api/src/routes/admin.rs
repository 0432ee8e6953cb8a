//! Admin endpoints: stock replenishment and order monitoring

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;

use korder_core::inventory::AdjustmentOutcome;
use korder_core::models::{Order, OrderStatus};
use korder_core::orders::OrderStats;
use korder_core::Error;

use super::error_response;
use crate::middleware::Principal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StockAdjustmentRequest {
    pub item_id: i64,
    /// Signed: positive replenishes, negative removes
    pub quantity: i32,
}

/// POST /api/admin/items/stock
pub async fn replenish_stock(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<StockAdjustmentRequest>,
) -> Result<Json<AdjustmentOutcome>, (StatusCode, Json<serde_json::Value>)> {
    if request.quantity == 0 {
        return Err(error_response(Error::validation(
            "Adjustment quantity must be non-zero",
        )));
    }

    let outcome = state
        .ledger()
        .adjust(request.item_id, request.quantity, &principal.username)
        .await
        .map_err(error_response)?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/admin/orders?status=PENDING&limit=50&offset=0
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<Order>>, (StatusCode, Json<serde_json::Value>)> {
    let status: OrderStatus = query.status.parse().map_err(error_response)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let orders = state
        .orders()
        .list_orders_by_status(status, limit, offset)
        .await
        .map_err(error_response)?;

    Ok(Json(orders))
}

/// GET /api/admin/orders/stats
pub async fn order_stats(
    State(state): State<AppState>,
) -> Result<Json<OrderStats>, (StatusCode, Json<serde_json::Value>)> {
    let stats = state.orders().status_stats().await.map_err(error_response)?;
    Ok(Json(stats))
}
