//! Saga state handler
//!
//! On entry to each non-terminal state exactly one handler runs, wrapping a
//! single gateway call under a step deadline and mapping the result to the
//! next FSM event. Terminal states freeze the order's business status; only
//! SENT_TO_KDS additionally deducts inventory.
//!
//! Handlers are reentrant-safe: every invocation works from a fresh database
//! read and carries no in-memory state from earlier steps, so recovery can
//! re-run the current state's handler after a restart.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;

use super::orchestrator::{EventSubmission, Orchestrator};
use super::spec::{Event, State};
use crate::app::AppContext;
use crate::gateways::{
    FiscalItem, FiscalRequest, FiscalResponse, KdsOrderItem, KdsRequest, KdsResponse,
    PaymentOutcome, PaymentRequest, PrinterRequest, PrinterResponse, ReceiptType,
};
use crate::inventory::{InventoryLedger, KIOSK_AUTO_DEDUCTION};
use crate::models::{ActorType, OrderStatus};
use crate::orders::{to_kopecks, OrderStore, ReceiptStore};
use crate::Result;

/// Saga step deadlines. The payment deadline is long because the customer is
/// interacting with the terminal; the state timer in the orchestrator is an
/// independent safety net.
pub const FISCALIZATION_DEADLINE: Duration = Duration::from_secs(30);
pub const PAYMENT_DEADLINE: Duration = Duration::from_secs(180);
pub const PRINTING_DEADLINE: Duration = Duration::from_secs(60);
pub const KDS_DEADLINE: Duration = Duration::from_secs(20);

/// Entry point used by the orchestrator to dispatch a handler as a detached
/// task. Handler errors are logged, never propagated into the FSM.
pub fn run_entry_handler(
    ctx: Arc<AppContext>,
    order_id: i64,
    state: State,
    kiosk: String,
) -> BoxFuture<'static, ()> {
    async move {
        let handler = StateHandler::new(ctx);
        if let Err(e) = handler.handle(order_id, state, &kiosk).await {
            tracing::error!(
                order_id,
                state = %state,
                error = %e,
                "state entry handler failed"
            );
        }
    }
    .boxed()
}

pub struct StateHandler {
    ctx: Arc<AppContext>,
}

impl StateHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.ctx.clone())
    }

    fn orders(&self) -> OrderStore {
        OrderStore::new(self.ctx.clone())
    }

    fn receipts(&self) -> ReceiptStore {
        ReceiptStore::new(self.ctx.db.clone())
    }

    fn ledger(&self) -> InventoryLedger {
        InventoryLedger::new(self.ctx.db.clone())
    }

    /// Route to the handler for the state just entered.
    pub async fn handle(&self, order_id: i64, state: State, kiosk: &str) -> Result<()> {
        tracing::info!(order_id, state = %state, "handling state entry");

        match state {
            State::Init => self.fiscalize(order_id, kiosk).await,
            State::AwaitingPayment => self.collect_payment(order_id, kiosk).await,
            State::AwaitingPrinting => self.print_receipt(order_id, kiosk).await,
            State::AwaitingKds => self.send_to_kitchen(order_id, kiosk).await,

            State::SentToKds => self.complete_order(order_id, kiosk).await,

            State::SentToKdsFailed
            | State::UnsuccessfulFiscalization
            | State::UnsuccessfulPayment
            | State::PrintingFailed => self.freeze_order(order_id, OrderStatus::Failed).await,

            State::CanceledByUser | State::CanceledByTimeout => {
                self.freeze_order(order_id, OrderStatus::Cancelled).await
            }
        }
    }

    /// Saga step 1: fiscalization.
    async fn fiscalize(&self, order_id: i64, kiosk: &str) -> Result<()> {
        let orders = self.orders();
        let order = orders.get_order_row(order_id).await?;
        let items = orders.get_order_items(order_id).await?;

        let request = FiscalRequest {
            order_id,
            kiosk_id: kiosk.to_string(),
            items: items
                .iter()
                .map(|item| FiscalItem {
                    item_id: item.item_id,
                    item_description: item.name_ru.clone(),
                    item_price_net: to_kopecks(item.item_price_net),
                    item_price_gross: to_kopecks(item.item_price_gross),
                    item_vat_value: to_kopecks(item.item_vat_amount),
                    quantity: item.quantity,
                })
                .collect(),
            total_net: to_kopecks(order.total_amount_net),
            total_vat: to_kopecks(order.total_amount_vat),
            total_gross: to_kopecks(order.total_amount_gross),
            payment_method: "CARD".to_string(),
        };

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            FISCALIZATION_DEADLINE,
            self.ctx.gateways.fiscal.fiscalize(&request),
        )
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        let submission = match outcome {
            Err(_) => {
                tracing::error!(order_id, "fiscalization deadline exceeded");
                let response = FiscalResponse::timeout(FISCALIZATION_DEADLINE.as_secs());
                EventSubmission::new(Event::FiscalizationFailed, ActorType::System)
                    .with_comment(format!(
                        "Fiscalization timeout after {}s",
                        FISCALIZATION_DEADLINE.as_secs()
                    ))
                    .with_event_data(json!({
                        "result_code": response.error_code,
                        "result_description": response.error_message,
                    }))
            }
            Ok(Err(e)) => {
                tracing::error!(order_id, error = %e, "fiscalization call failed");
                EventSubmission::new(Event::FiscalizationFailed, ActorType::System)
                    .with_comment(format!("Fiscalization error: {}", e))
                    .with_event_data(json!({ "result_description": e.to_string() }))
            }
            Ok(Ok(response)) if response.is_ok() => {
                tracing::info!(order_id, elapsed, "fiscalization succeeded");

                let machine_receipt_id = response
                    .fiscal_receipt
                    .as_ref()
                    .map(|receipt| receipt.fiscal_document_number.clone());
                self.receipts()
                    .save_fiscal_receipt(
                        order_id,
                        machine_receipt_id.as_deref(),
                        serde_json::to_value(&response)?,
                    )
                    .await?;

                let receipt = response.fiscal_receipt.as_ref();
                EventSubmission::new(Event::FiscalizationSucceeded, ActorType::FiscalDevice)
                    .with_comment(format!("Fiscalization completed in {:.2}s", elapsed))
                    .with_event_data(json!({
                        "result_code": "OK",
                        "transaction_id": receipt.map(|r| r.fiscal_document_number.clone()),
                        "fn_number": receipt.map(|r| r.fn_number.clone()),
                        "ofd_reg_number": receipt.map(|r| r.ofd_reg_number.clone()),
                    }))
            }
            Ok(Ok(response)) => {
                tracing::error!(
                    order_id,
                    code = response.error_code.as_deref().unwrap_or("?"),
                    "fiscalization failed"
                );
                EventSubmission::new(Event::FiscalizationFailed, ActorType::FiscalDevice)
                    .with_comment(format!(
                        "Fiscalization failed: {}",
                        response.error_message.as_deref().unwrap_or("unknown error")
                    ))
                    .with_event_data(json!({
                        "result_code": response.error_code,
                        "result_description": response.error_message,
                    }))
            }
        };

        self.orchestrator().submit(order_id, kiosk, submission).await?;
        Ok(())
    }

    /// Saga step 2: card payment. A deadline here means the customer never
    /// finished the terminal interaction, which cancels by inactivity rather
    /// than failing the payment.
    async fn collect_payment(&self, order_id: i64, kiosk: &str) -> Result<()> {
        let order = self.orders().get_order_row(order_id).await?;
        let sum = to_kopecks(order.total_amount_gross);

        let request = PaymentRequest {
            kiosk_id: kiosk.to_string(),
            order_id,
            sum,
        };

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            PAYMENT_DEADLINE,
            self.ctx.gateways.payment.process_payment(&request),
        )
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        let submission = match outcome {
            Err(_) => {
                tracing::error!(order_id, "payment deadline exceeded");
                EventSubmission::new(Event::InactivityTimeout, ActorType::System).with_comment(
                    format!("Payment timeout after {}s", PAYMENT_DEADLINE.as_secs()),
                )
            }
            Ok(Err(e)) => {
                tracing::error!(order_id, error = %e, "payment call failed");
                EventSubmission::new(Event::PaymentFailed, ActorType::System)
                    .with_comment(format!("Payment error: {}", e))
                    .with_event_data(json!({ "result_description": e.to_string() }))
            }
            Ok(Ok(response)) if response.is_success() => {
                tracing::info!(order_id, elapsed, transaction_id = %response.transaction_id, "payment succeeded");

                self.receipts()
                    .save_slip_receipt(
                        order_id,
                        Some(&response.transaction_id),
                        serde_json::to_value(&response)?,
                    )
                    .await?;

                EventSubmission::new(Event::PaymentSucceeded, ActorType::PosTerminal)
                    .with_actor_id(response.terminal_id.clone())
                    .with_comment(format!("Payment completed in {:.2}s", elapsed))
                    .with_event_data(json!({
                        "session_id": response.session_id,
                        "transaction_id": response.transaction_id,
                        "result_code": response.response_code,
                        "auth_code": response.auth_code,
                        "rrn": response.rrn,
                        "amount": response.amount,
                    }))
            }
            Ok(Ok(response)) => {
                tracing::error!(
                    order_id,
                    code = %response.response_code,
                    message = %response.response_message,
                    "payment failed"
                );
                let actor = match response.status {
                    PaymentOutcome::Timeout => ActorType::System,
                    _ => ActorType::PosTerminal,
                };
                EventSubmission::new(Event::PaymentFailed, actor)
                    .with_comment(format!("Payment failed: {}", response.response_message))
                    .with_event_data(json!({
                        "session_id": response.session_id,
                        "result_code": response.response_code,
                        "result_description": response.response_message,
                    }))
            }
        };

        self.orchestrator().submit(order_id, kiosk, submission).await?;
        Ok(())
    }

    /// Saga step 3: customer receipt printing. On success the summary receipt
    /// is assembled from the stored slip and fiscal receipts.
    async fn print_receipt(&self, order_id: i64, kiosk: &str) -> Result<()> {
        let orchestrator = self.orchestrator();
        let runtime = orchestrator.get_runtime(order_id).await?;

        // The slip receipt stored at payment success carries the full
        // terminal response for the slip rendering.
        let payment_data = self
            .receipts()
            .latest_slip_body(order_id)
            .await?
            .unwrap_or_else(|| {
                json!({
                    "transaction_id": runtime
                        .payment_context
                        .as_ref()
                        .and_then(|ctx| ctx.0.transaction_id.clone()),
                })
            });

        let request = PrinterRequest {
            order_id,
            kiosk_id: kiosk.to_string(),
            payment_data,
            receipt_type: ReceiptType::Customer,
        };

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            PRINTING_DEADLINE,
            self.ctx.gateways.printer.print_receipt(&request),
        )
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        let submission = match outcome {
            Err(_) => {
                tracing::error!(order_id, "printing deadline exceeded");
                let response = PrinterResponse::timeout(PRINTING_DEADLINE.as_secs());
                EventSubmission::new(Event::PrintingFailedOrTimeout, ActorType::System)
                    .with_comment(format!(
                        "Receipt printing timeout after {}s",
                        PRINTING_DEADLINE.as_secs()
                    ))
                    .with_event_data(json!({
                        "result_code": response.error_code,
                        "result_description": response.error_message,
                    }))
            }
            Ok(Err(e)) => {
                tracing::error!(order_id, error = %e, "printer call failed");
                EventSubmission::new(Event::PrintingFailedOrTimeout, ActorType::System)
                    .with_comment(format!("Receipt printing error: {}", e))
                    .with_event_data(json!({ "result_description": e.to_string() }))
            }
            Ok(Ok(response)) if response.is_success() => {
                tracing::info!(
                    order_id,
                    elapsed,
                    path = response.receipt_file_path.as_deref().unwrap_or(""),
                    "receipt printed"
                );

                if let Err(e) = self
                    .receipts()
                    .save_summary_receipt(
                        order_id,
                        runtime.pickup_number.as_deref(),
                        runtime.pin_code.as_deref(),
                    )
                    .await
                {
                    // The printed receipt is already in the customer's hands
                    tracing::error!(order_id, error = %e, "failed to save summary receipt");
                }

                EventSubmission::new(Event::PrintingSucceeded, ActorType::Printer)
                    .with_comment(format!("Receipt printed in {:.2}s", elapsed))
                    .with_event_data(json!({
                        "result_code": "SUCCESS",
                        "receipt_file_path": response.receipt_file_path,
                    }))
            }
            Ok(Ok(response)) => {
                tracing::error!(
                    order_id,
                    code = response.error_code.as_deref().unwrap_or("?"),
                    "printing failed"
                );
                EventSubmission::new(Event::PrintingFailedOrTimeout, ActorType::Printer)
                    .with_comment(format!(
                        "Receipt printing failed: {}",
                        response.error_message.as_deref().unwrap_or("unknown error")
                    ))
                    .with_event_data(json!({
                        "result_code": response.error_code,
                        "result_description": response.error_message,
                    }))
            }
        };

        orchestrator.submit(order_id, kiosk, submission).await?;
        Ok(())
    }

    /// Saga step 4: kitchen dispatch. Fail-fast, no retry.
    async fn send_to_kitchen(&self, order_id: i64, kiosk: &str) -> Result<()> {
        let items = self.orders().get_order_items(order_id).await?;

        let request = KdsRequest {
            order_id,
            kiosk_id: kiosk.to_string(),
            items: items
                .iter()
                .map(|item| KdsOrderItem {
                    item_id: item.item_id,
                    description: item.name_ru.clone(),
                    quantity: item.quantity,
                })
                .collect(),
        };

        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(KDS_DEADLINE, self.ctx.gateways.kds.send_order(&request)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let submission = match outcome {
            Err(_) => {
                tracing::error!(order_id, "KDS deadline exceeded");
                let response = KdsResponse::timeout(KDS_DEADLINE.as_secs());
                EventSubmission::new(Event::KdsErrorOrNoResponse, ActorType::System)
                    .with_comment(format!("KDS timeout after {}s", KDS_DEADLINE.as_secs()))
                    .with_event_data(json!({
                        "result_code": response.error_code,
                        "result_description": response.error_message,
                    }))
            }
            Ok(Err(e)) => {
                tracing::error!(order_id, error = %e, "KDS call failed");
                EventSubmission::new(Event::KdsErrorOrNoResponse, ActorType::System)
                    .with_comment(format!("KDS send error: {}", e))
                    .with_event_data(json!({ "result_description": e.to_string() }))
            }
            Ok(Ok(response)) if response.is_ok() => {
                tracing::info!(
                    order_id,
                    elapsed,
                    ticket = response.kds_ticket_id.as_deref().unwrap_or(""),
                    "order confirmed by kitchen"
                );
                EventSubmission::new(Event::KdsConfirmation, ActorType::Kitchen)
                    .with_comment(format!("Order sent to KDS in {:.2}s", elapsed))
                    .with_event_data(json!({
                        "result_code": "OK",
                        "kds_ticket_id": response.kds_ticket_id,
                    }))
            }
            Ok(Ok(response)) => {
                tracing::error!(
                    order_id,
                    code = response.error_code.as_deref().unwrap_or("?"),
                    "KDS rejected order"
                );
                EventSubmission::new(Event::KdsErrorOrNoResponse, ActorType::Kitchen)
                    .with_comment(format!(
                        "KDS send failed: {}",
                        response.error_message.as_deref().unwrap_or("unknown error")
                    ))
                    .with_event_data(json!({
                        "result_code": response.error_code,
                        "result_description": response.error_message,
                    }))
            }
        };

        self.orchestrator().submit(order_id, kiosk, submission).await?;
        Ok(())
    }

    /// Terminal SENT_TO_KDS: the kitchen accepted the order. Mark it
    /// COMPLETED and deduct stock for every line. Deduction failures are
    /// logged and never revert the order status.
    async fn complete_order(&self, order_id: i64, _kiosk: &str) -> Result<()> {
        self.freeze_order(order_id, OrderStatus::Completed).await?;

        match self
            .ledger()
            .deduct_for_order(order_id, KIOSK_AUTO_DEDUCTION)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(order_id, "order completed with partial inventory deduction");
            }
            Err(e) => {
                tracing::error!(
                    order_id,
                    error = %e,
                    "inventory deduction failed; order stays completed, stock needs manual adjustment"
                );
            }
        }

        Ok(())
    }

    /// Freeze the order's business status for a terminal FSM state. A repeat
    /// (recovery re-entering a terminal state) is a no-op conflict.
    async fn freeze_order(&self, order_id: i64, status: OrderStatus) -> Result<()> {
        match self.orders().update_status(order_id, status).await {
            Ok(()) => Ok(()),
            Err(crate::Error::Conflict(message)) => {
                tracing::debug!(order_id, %message, "order status already frozen");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_deadlines_match_state_timeouts() {
        use super::super::spec;

        // The saga deadline is authoritative inside the handler; the state
        // timer mirrors it for payment, printing and KDS.
        assert_eq!(
            spec::state_timeout(State::AwaitingPayment),
            Some(PAYMENT_DEADLINE)
        );
        assert_eq!(
            spec::state_timeout(State::AwaitingPrinting),
            Some(PRINTING_DEADLINE)
        );
        assert_eq!(spec::state_timeout(State::AwaitingKds), Some(KDS_DEADLINE));
        assert_eq!(FISCALIZATION_DEADLINE, Duration::from_secs(30));
    }
}
