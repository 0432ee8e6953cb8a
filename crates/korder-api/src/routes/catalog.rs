//! Kiosk catalog read

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::error_response;
use crate::state::AppState;

/// Active catalog entry with its current stock, as shown on the kiosk.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CatalogItem {
    pub item_id: i64,
    pub name_ru: String,
    pub name_eng: Option<String>,
    pub description_ru: String,
    pub description_eng: Option<String>,
    pub unit_name_ru: String,
    pub unit_name_eng: Option<String>,
    pub food_category: Option<String>,
    pub price_net: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub price_gross: Decimal,
    pub stock_quantity: i32,
    pub created_at: DateTime<Utc>,
}

/// GET /api/kiosk/items
pub async fn list_items(
    State(state): State<AppState>,
) -> Result<Json<Vec<CatalogItem>>, (StatusCode, Json<serde_json::Value>)> {
    let items = sqlx::query_as::<_, CatalogItem>(
        r#"
        SELECT i.item_id, i.name_ru, i.name_eng, i.description_ru, i.description_eng,
               i.unit_name_ru, i.unit_name_eng, i.food_category,
               i.price_net, i.vat_rate, i.vat_amount, i.price_gross,
               COALESCE(a.stock_quantity, 0) AS stock_quantity,
               i.created_at
        FROM items_live i
        LEFT JOIN items_availability a ON a.item_id = i.item_id
        WHERE i.is_active
        ORDER BY i.item_id
        "#,
    )
    .fetch_all(state.ctx.db.pool())
    .await
    .map_err(|e| error_response(e.into()))?;

    Ok(Json(items))
}
