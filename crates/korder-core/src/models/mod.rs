//! Persistent data model
//!
//! Row structs map 1:1 onto the Postgres schema created by `db::migrate`.
//! Order lines carry full snapshots of the catalog entry at order time, so
//! later menu edits never change what a customer bought.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::fsm::spec::{Event, State};

/// Business status of an order. Derived from the terminal FSM state; frozen
/// once the order reaches any terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(crate::Error::validation(format!(
                "Unknown order status: {}",
                other
            ))),
        }
    }
}

/// Who triggered a lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "actor_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    Customer,
    PosTerminal,
    FiscalDevice,
    Printer,
    Kitchen,
    System,
}

/// Catalog entry. Mutated only through admin paths; orders reference it by
/// id snapshot, never by live pointer.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ItemLive {
    pub item_id: i64,
    pub name_ru: String,
    pub name_eng: Option<String>,
    pub description_ru: String,
    pub description_eng: Option<String>,
    pub is_active: bool,
    pub unit_name_ru: String,
    pub unit_name_eng: Option<String>,
    pub food_category: Option<String>,
    pub price_net: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub price_gross: Decimal,
    pub created_at: DateTime<Utc>,
}

/// One-to-one with ItemLive. `stock_quantity` never goes below zero.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ItemAvailability {
    pub item_id: i64,
    pub stock_quantity: i32,
    pub reserved_quantity: i32,
    pub unit_name_ru: String,
    pub unit_name_eng: Option<String>,
}

/// Append-only stock ledger entry. `change_quantity` is the requested delta
/// as submitted; `applied_quantity` is what actually hit the stock after the
/// non-negativity clamp. Summing applied deltas per item reproduces the
/// current stock quantity.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StockAdjustment {
    pub operation_id: i64,
    pub item_id: i64,
    pub name_ru: String,
    pub unit_name_ru: String,
    pub unit_name_eng: Option<String>,
    pub change_quantity: i32,
    pub applied_quantity: i32,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Order {
    pub order_id: i64,
    pub order_date: NaiveDate,
    pub status: OrderStatus,
    pub order_time: DateTime<Utc>,
    pub currency: String,
    pub total_amount_net: Decimal,
    pub total_amount_vat: Decimal,
    pub total_amount_gross: Decimal,
    pub customer_id: Option<i64>,
    pub session_id: Option<Uuid>,
    pub pickup_number: String,
    pub pin_code: String,
}

/// Line within an order. Everything except `quantity` and `wishes` is a
/// snapshot taken from ItemLive at order time.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct OrderItem {
    pub item_in_order_id: Uuid,
    pub order_id: i64,
    pub item_id: i64,
    pub name_ru: String,
    pub name_eng: Option<String>,
    pub description_ru: String,
    pub description_eng: Option<String>,
    pub unit_of_measure_ru: String,
    pub unit_of_measure_eng: Option<String>,
    pub item_price_net: Decimal,
    pub item_vat_rate: Decimal,
    pub item_vat_amount: Decimal,
    pub item_price_gross: Decimal,
    pub quantity: i32,
    pub total_price_net: Decimal,
    pub total_vat_amount: Decimal,
    pub total_price_gross: Decimal,
    pub wishes: Option<String>,
}

/// Context captured from one external step (payment, fiscal, printing).
/// Stored as JSONB inside the FSM runtime row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    pub session_id: Option<String>,
    pub device_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub response_at: Option<DateTime<Utc>>,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    pub transaction_id: Option<String>,
}

impl StepContext {
    /// Fold gateway event data into the context. Unknown keys are ignored;
    /// known keys overwrite previous attempts (each retry replaces the last).
    pub fn absorb(&mut self, event_data: &serde_json::Value) {
        if let Some(v) = event_data.get("session_id").and_then(|v| v.as_str()) {
            self.session_id = Some(v.to_string());
        }
        if let Some(v) = event_data.get("device_id").and_then(|v| v.as_str()) {
            self.device_id = Some(v.to_string());
        }
        if let Some(v) = event_data.get("result_code").and_then(|v| v.as_str()) {
            self.result_code = Some(v.to_string());
        }
        if let Some(v) = event_data.get("result_description").and_then(|v| v.as_str()) {
            self.result_description = Some(v.to_string());
        }
        if let Some(v) = event_data.get("transaction_id").and_then(|v| v.as_str()) {
            self.transaction_id = Some(v.to_string());
        }
        self.response_at = Some(Utc::now());
    }
}

/// One-to-one FSM runtime row for an order. Only the orchestrator mutates
/// `current_state`, under a row lock.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FsmRuntime {
    pub fsm_runtime_id: Uuid,
    pub order_id: i64,
    pub kiosk_username: String,
    pub current_state: State,
    pub payment_context: Option<Json<StepContext>>,
    pub fiscal_context: Option<Json<StepContext>>,
    pub printing_context: Option<Json<StepContext>>,
    pub pickup_number: Option<String>,
    pub pin_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Append-only audit log of FSM transitions. Entries for one order form a
/// chain: each entry's `from_state` equals the previous entry's `to_state`,
/// and the last `to_state` equals the runtime's current state. Rejected
/// transitions are logged with `from_state == to_state`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LifecycleLog {
    pub log_id: Uuid,
    pub order_id: i64,
    pub fsm_runtime_id: Option<Uuid>,
    pub from_state: Option<State>,
    pub to_state: State,
    pub trigger_event: Option<Event>,
    pub actor_type: Option<ActorType>,
    pub actor_id: Option<String>,
    pub comment: Option<String>,
    pub event_created_at: DateTime<Utc>,
}

/// POS terminal slip receipt stored after a successful payment.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SlipReceipt {
    pub slip_receipt_id: Uuid,
    pub order_id: i64,
    pub terminal_receipt_id: Option<String>,
    pub receipt_body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// Fiscal receipt stored after successful fiscalization.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FiscalReceipt {
    pub fiscal_receipt_id: Uuid,
    pub order_id: i64,
    pub fiscal_machine_receipt_id: Option<String>,
    pub receipt_body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// Logical combination of slip and fiscal receipts plus pickup identifiers,
/// assembled once the customer receipt is printed.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SummaryReceipt {
    pub summary_receipt_id: Uuid,
    pub order_id: i64,
    pub slip_receipt_id: Option<Uuid>,
    pub fiscal_receipt_id: Option<Uuid>,
    pub pickup_number: Option<String>,
    pub pin_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_status_round_trip() {
        for (status, name) in [
            (OrderStatus::Pending, "PENDING"),
            (OrderStatus::Completed, "COMPLETED"),
            (OrderStatus::Failed, "FAILED"),
            (OrderStatus::Cancelled, "CANCELLED"),
        ] {
            assert_eq!(status.as_str(), name);
            assert_eq!(name.parse::<OrderStatus>().unwrap(), status);
        }
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_actor_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ActorType::PosTerminal).unwrap(),
            "\"POS_TERMINAL\""
        );
        assert_eq!(
            serde_json::to_string(&ActorType::FiscalDevice).unwrap(),
            "\"FISCAL_DEVICE\""
        );
    }

    #[test]
    fn test_step_context_absorb() {
        let mut ctx = StepContext::default();
        ctx.absorb(&json!({
            "session_id": "SES_7_1",
            "result_code": "00",
            "transaction_id": "TXN_AB12CD34",
            "unknown_key": true,
        }));

        assert_eq!(ctx.session_id.as_deref(), Some("SES_7_1"));
        assert_eq!(ctx.result_code.as_deref(), Some("00"));
        assert_eq!(ctx.transaction_id.as_deref(), Some("TXN_AB12CD34"));
        assert!(ctx.response_at.is_some());
        assert!(ctx.device_id.is_none());

        // A later attempt overwrites the earlier result
        ctx.absorb(&json!({ "result_code": "05" }));
        assert_eq!(ctx.result_code.as_deref(), Some("05"));
        assert_eq!(ctx.transaction_id.as_deref(), Some("TXN_AB12CD34"));
    }
}
