//! Order creation, reads and receipts

pub mod pickup;
pub mod receipts;
pub mod store;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FsmRuntime, LifecycleLog, Order, OrderItem, OrderStatus};
use crate::{Error, Result};

pub use receipts::{OrderReceipts, ReceiptStore};
pub use store::OrderStore;

/// Maximum length of a free-text customer wish on a line
pub const MAX_WISHES_LEN: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLineRequest {
    pub item_id: i64,
    pub quantity: i32,
    pub wishes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLineRequest>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub customer_id: Option<i64>,
    pub session_id: Option<Uuid>,
}

fn default_currency() -> String {
    // ISO 4217 numeric code for RUB
    "643".to_string()
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(Error::validation("Order must have at least one item"));
        }
        for line in &self.items {
            if line.quantity <= 0 {
                return Err(Error::validation(format!(
                    "Quantity must be positive for item {}",
                    line.item_id
                )));
            }
            if let Some(wishes) = &line.wishes {
                if wishes.len() > MAX_WISHES_LEN {
                    return Err(Error::validation(format!(
                        "Wishes too long for item {} (max {} chars)",
                        line.item_id, MAX_WISHES_LEN
                    )));
                }
            }
        }
        if self.currency.len() != 3 {
            return Err(Error::validation("Currency must be a 3-character code"));
        }
        Ok(())
    }
}

/// What the kiosk gets back immediately after order creation. Progress past
/// this point arrives over the SSE stream.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: i64,
    pub status: OrderStatus,
    pub pickup_number: String,
    pub pin_code: String,
    pub total_amount_gross: Decimal,
    pub currency: String,
}

/// Deep order read: the order row plus everything it owns.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub runtime: Option<FsmRuntime>,
    pub lifecycle: Vec<LifecycleLog>,
}

/// Per-status order counts for monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderStats {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Convert a 2-fractional-digit decimal amount into integer kopecks for the
/// gateway wire contracts.
pub fn to_kopecks(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid_request() -> CreateOrderRequest {
        CreateOrderRequest {
            items: vec![OrderLineRequest {
                item_id: 10,
                quantity: 2,
                wishes: None,
            }],
            currency: "643".to_string(),
            customer_id: None,
            session_id: None,
        }
    }

    #[test]
    fn test_validate_accepts_good_request() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_order() {
        let mut request = valid_request();
        request.items.clear();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_quantity() {
        let mut request = valid_request();
        request.items[0].quantity = 0;
        assert!(request.validate().is_err());
        request.items[0].quantity = -1;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_wishes() {
        let mut request = valid_request();
        request.items[0].wishes = Some("x".repeat(MAX_WISHES_LEN + 1));
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_default_currency_is_rub() {
        let request: CreateOrderRequest =
            serde_json::from_str(r#"{"items":[{"item_id":10,"quantity":1}]}"#).unwrap();
        assert_eq!(request.currency, "643");
    }

    #[test]
    fn test_to_kopecks() {
        assert_eq!(to_kopecks(dec!(3.00)), 300);
        assert_eq!(to_kopecks(dec!(2.50)), 250);
        assert_eq!(to_kopecks(dec!(0.01)), 1);
        assert_eq!(to_kopecks(dec!(0)), 0);
        assert_eq!(to_kopecks(dec!(1234.56)), 123456);
    }
}
