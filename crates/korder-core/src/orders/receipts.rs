//! Receipt persistence
//!
//! Slip, fiscal and summary receipts are opaque JSON documents owned by the
//! order. The saga handler stores them as gateway steps succeed; the kiosk
//! can read them back afterwards.

use serde::Serialize;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{FiscalReceipt, SlipReceipt, SummaryReceipt};
use crate::Result;

/// Identity recorded into `created_by` for rows written by the saga handler
pub const STATE_HANDLER_IDENTITY: &str = "FSM_STATE_HANDLER";

#[derive(Clone)]
pub struct ReceiptStore {
    db: Database,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderReceipts {
    pub slip: Vec<SlipReceipt>,
    pub fiscal: Vec<FiscalReceipt>,
    pub summary: Vec<SummaryReceipt>,
}

impl ReceiptStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save_fiscal_receipt(
        &self,
        order_id: i64,
        machine_receipt_id: Option<&str>,
        body: serde_json::Value,
    ) -> Result<FiscalReceipt> {
        let receipt = sqlx::query_as::<_, FiscalReceipt>(
            r#"
            INSERT INTO fiscal_receipts
                (fiscal_receipt_id, order_id, fiscal_machine_receipt_id, receipt_body, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(machine_receipt_id)
        .bind(body)
        .bind(STATE_HANDLER_IDENTITY)
        .fetch_one(self.db.pool())
        .await?;

        tracing::info!(order_id, "fiscal receipt saved");
        Ok(receipt)
    }

    pub async fn save_slip_receipt(
        &self,
        order_id: i64,
        terminal_receipt_id: Option<&str>,
        body: serde_json::Value,
    ) -> Result<SlipReceipt> {
        let receipt = sqlx::query_as::<_, SlipReceipt>(
            r#"
            INSERT INTO slip_receipts
                (slip_receipt_id, order_id, terminal_receipt_id, receipt_body, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(terminal_receipt_id)
        .bind(body)
        .bind(STATE_HANDLER_IDENTITY)
        .fetch_one(self.db.pool())
        .await?;

        tracing::info!(order_id, "slip receipt saved");
        Ok(receipt)
    }

    /// Assemble the summary receipt from the order's latest slip and fiscal
    /// receipts once the customer receipt is printed.
    pub async fn save_summary_receipt(
        &self,
        order_id: i64,
        pickup_number: Option<&str>,
        pin_code: Option<&str>,
    ) -> Result<SummaryReceipt> {
        let slip_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT slip_receipt_id FROM slip_receipts WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(self.db.pool())
        .await?;

        let fiscal_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT fiscal_receipt_id FROM fiscal_receipts WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(self.db.pool())
        .await?;

        let receipt = sqlx::query_as::<_, SummaryReceipt>(
            r#"
            INSERT INTO summary_receipts
                (summary_receipt_id, order_id, slip_receipt_id, fiscal_receipt_id,
                 pickup_number, pin_code, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(slip_id)
        .bind(fiscal_id)
        .bind(pickup_number)
        .bind(pin_code)
        .bind(STATE_HANDLER_IDENTITY)
        .fetch_one(self.db.pool())
        .await?;

        tracing::info!(order_id, "summary receipt saved");
        Ok(receipt)
    }

    /// Body of the most recent slip receipt for an order, if any. Used by
    /// the printing step to render the terminal response onto the slip.
    pub async fn latest_slip_body(&self, order_id: i64) -> Result<Option<serde_json::Value>> {
        let body: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT receipt_body FROM slip_receipts WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(body)
    }

    /// All stored receipts for an order.
    pub async fn receipts_for_order(&self, order_id: i64) -> Result<OrderReceipts> {
        let slip = sqlx::query_as::<_, SlipReceipt>(
            "SELECT * FROM slip_receipts WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(self.db.pool())
        .await?;

        let fiscal = sqlx::query_as::<_, FiscalReceipt>(
            "SELECT * FROM fiscal_receipts WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(self.db.pool())
        .await?;

        let summary = sqlx::query_as::<_, SummaryReceipt>(
            "SELECT * FROM summary_receipts WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(OrderReceipts {
            slip,
            fiscal,
            summary,
        })
    }
}
