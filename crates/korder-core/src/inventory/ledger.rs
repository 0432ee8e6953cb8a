//! Append-only stock ledger
//!
//! Every stock change goes through `adjust`: the availability row is updated
//! under a row lock and a ledger entry is appended in the same transaction.
//! A negative delta larger than the current stock is clamped so the stock
//! never goes below zero; the entry keeps both the requested and the applied
//! delta, so summing applied deltas per item reproduces the current stock.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::models::StockAdjustment;
use crate::{Error, Result};

/// Actor identity for deductions triggered by a kiosk order completion
pub const KIOSK_AUTO_DEDUCTION: &str = "KIOSK_AUTO_DEDUCTION";

/// Actor identity for other automated adjustments
pub const SYSTEM_IDENTITY: &str = "SYSTEM";

#[derive(Clone)]
pub struct InventoryLedger {
    db: Database,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentOutcome {
    pub operation_id: i64,
    pub item_id: i64,
    pub requested_delta: i32,
    pub applied_delta: i32,
    pub stock_quantity: i32,
    pub changed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AvailabilityRow {
    stock_quantity: i32,
    name_ru: String,
    unit_name_ru: String,
    unit_name_eng: Option<String>,
}

impl InventoryLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Apply a signed stock adjustment and append the ledger entry, as one
    /// transaction. Returns the new quantity.
    pub async fn adjust(
        &self,
        item_id: i64,
        delta: i32,
        actor_identity: &str,
    ) -> Result<AdjustmentOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query_as::<_, AvailabilityRow>(
            r#"
            SELECT a.stock_quantity, i.name_ru, a.unit_name_ru, a.unit_name_eng
            FROM items_availability a
            JOIN items_live i ON i.item_id = a.item_id
            WHERE a.item_id = $1
            FOR UPDATE OF a
            "#,
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("Availability for item {} not found", item_id)))?;

        // Clamp: stock never goes below zero. The requested delta is still
        // recorded for audit.
        let applied_delta = if delta < 0 && (delta as i64).abs() > row.stock_quantity as i64 {
            -row.stock_quantity
        } else {
            delta
        };
        let new_quantity = row.stock_quantity + applied_delta;

        sqlx::query("UPDATE items_availability SET stock_quantity = $2 WHERE item_id = $1")
            .bind(item_id)
            .bind(new_quantity)
            .execute(&mut *tx)
            .await?;

        let adjustment = sqlx::query_as::<_, StockAdjustment>(
            r#"
            INSERT INTO stock_adjustments
                (item_id, name_ru, unit_name_ru, unit_name_eng,
                 change_quantity, applied_quantity, changed_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(item_id)
        .bind(&row.name_ru)
        .bind(&row.unit_name_ru)
        .bind(&row.unit_name_eng)
        .bind(delta)
        .bind(applied_delta)
        .bind(actor_identity)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if applied_delta != delta {
            tracing::warn!(
                item_id,
                requested = delta,
                applied = applied_delta,
                "stock adjustment clamped at zero"
            );
        }

        Ok(AdjustmentOutcome {
            operation_id: adjustment.operation_id,
            item_id,
            requested_delta: delta,
            applied_delta,
            stock_quantity: new_quantity,
            changed_at: adjustment.changed_at,
        })
    }

    /// Deduct stock for every line of a completed order. Per-line failures
    /// are logged and do not stop the remaining lines or revert the order
    /// status; the return value reports whether every line succeeded.
    pub async fn deduct_for_order(&self, order_id: i64, actor_identity: &str) -> Result<bool> {
        let lines: Vec<(i64, i32)> =
            sqlx::query_as("SELECT item_id, quantity FROM order_items WHERE order_id = $1")
                .bind(order_id)
                .fetch_all(self.db.pool())
                .await?;

        if lines.is_empty() {
            tracing::warn!(order_id, "no items found for inventory deduction");
            return Ok(true);
        }

        let total = lines.len();
        let mut succeeded = 0usize;

        for (item_id, quantity) in lines {
            match self.adjust(item_id, -quantity, actor_identity).await {
                Ok(outcome) => {
                    tracing::info!(
                        order_id,
                        item_id,
                        deducted = quantity,
                        new_stock = outcome.stock_quantity,
                        "inventory deducted for completed order"
                    );
                    succeeded += 1;
                }
                Err(e) => {
                    tracing::error!(
                        order_id,
                        item_id,
                        error = %e,
                        "failed to deduct inventory for order line"
                    );
                }
            }
        }

        if succeeded == total {
            tracing::info!(order_id, lines = total, "inventory deduction complete");
            Ok(true)
        } else {
            tracing::warn!(
                order_id,
                succeeded,
                total,
                "partial inventory deduction for completed order"
            );
            Ok(false)
        }
    }

    /// History of adjustments for one item, newest first.
    pub async fn history(&self, item_id: i64, limit: i64) -> Result<Vec<StockAdjustment>> {
        let entries = sqlx::query_as::<_, StockAdjustment>(
            "SELECT * FROM stock_adjustments WHERE item_id = $1 ORDER BY operation_id DESC LIMIT $2",
        )
        .bind(item_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(entries)
    }
}
