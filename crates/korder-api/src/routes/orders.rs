//! Kiosk order endpoints
//!
//! Creation returns immediately with pickup identifiers; everything that
//! happens to the order afterwards is observed over the SSE stream. Commands
//! are acknowledged with 202 whether or not the FSM accepted them; the `ack`
//! flag carries the verdict.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use korder_core::fsm::spec::Event;
use korder_core::models::ActorType;
use korder_core::orders::{CreateOrderRequest, CreateOrderResponse, OrderDetails, OrderReceipts};
use korder_core::EventSubmission;

use super::error_response;
use crate::middleware::Principal;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandAction {
    RetryPayment,
    ChangeCard,
    CancelOrder,
    RetryFiscalization,
    RetryPrinting,
    AcceptAlternativeReceipt,
    DeclineAlternativeReceipt,
}

impl CommandAction {
    fn as_str(&self) -> &'static str {
        match self {
            CommandAction::RetryPayment => "RETRY_PAYMENT",
            CommandAction::ChangeCard => "CHANGE_CARD",
            CommandAction::CancelOrder => "CANCEL_ORDER",
            CommandAction::RetryFiscalization => "RETRY_FISCALIZATION",
            CommandAction::RetryPrinting => "RETRY_PRINTING",
            CommandAction::AcceptAlternativeReceipt => "ACCEPT_ALTERNATIVE_RECEIPT",
            CommandAction::DeclineAlternativeReceipt => "DECLINE_ALTERNATIVE_RECEIPT",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderCommandRequest {
    pub action: CommandAction,
    pub operation_id: Option<String>,
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct OrderCommandResponse {
    pub ack: bool,
    pub state: Option<String>,
    pub message: String,
    pub operation_id: Option<String>,
}

/// POST /api/kiosk/orders
pub async fn create_order(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), (StatusCode, Json<serde_json::Value>)> {
    let response = state
        .orders()
        .create_order(request, &principal.username)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/kiosk/orders/{order_id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderDetails>, (StatusCode, Json<serde_json::Value>)> {
    let details = state
        .orders()
        .get_order(order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(details))
}

/// GET /api/kiosk/orders/{order_id}/receipts
pub async fn get_receipts(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderReceipts>, (StatusCode, Json<serde_json::Value>)> {
    // 404 for unknown orders rather than an empty receipt set
    state
        .orders()
        .get_order_row(order_id)
        .await
        .map_err(error_response)?;

    let receipts = state
        .receipts()
        .receipts_for_order(order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(receipts))
}

/// POST /api/kiosk/orders/{order_id}/commands
pub async fn submit_command(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(order_id): Path<i64>,
    Json(command): Json<OrderCommandRequest>,
) -> Result<(StatusCode, Json<OrderCommandResponse>), (StatusCode, Json<serde_json::Value>)> {
    // Reject commands for unknown orders outright
    state
        .orders()
        .get_order_row(order_id)
        .await
        .map_err(error_response)?;

    let orchestrator = state.orchestrator();
    let action = command.action;

    let ack = match action {
        CommandAction::CancelOrder => {
            let mut submission = EventSubmission::new(Event::UserCanceled, ActorType::Customer)
                .with_actor_id(principal.username.clone())
                .with_comment(format!("Command: {}", action.as_str()));
            if let Some(parameters) = command.parameters.clone() {
                submission = submission.with_event_data(parameters);
            }
            orchestrator
                .submit(order_id, &principal.username, submission)
                .await
                .map_err(error_response)?
        }

        CommandAction::RetryPayment
        | CommandAction::ChangeCard
        | CommandAction::RetryFiscalization
        | CommandAction::RetryPrinting => orchestrator
            .retry_current_step(order_id, &principal.username, action.as_str())
            .await
            .map_err(error_response)?,

        // Receipt preference commands do not touch the FSM
        CommandAction::AcceptAlternativeReceipt | CommandAction::DeclineAlternativeReceipt => {
            tracing::info!(order_id, action = action.as_str(), "receipt preference recorded");
            true
        }
    };

    let current_state = orchestrator
        .get_runtime(order_id)
        .await
        .map(|runtime| runtime.current_state.to_string())
        .ok();

    let message = if ack {
        format!("Command {} processed successfully", action.as_str())
    } else {
        format!("Command {} could not be processed", action.as_str())
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(OrderCommandResponse {
            ack,
            state: current_state,
            message,
            operation_id: command.operation_id,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_action_wire_names() {
        let action: CommandAction = serde_json::from_str("\"RETRY_PAYMENT\"").unwrap();
        assert_eq!(action, CommandAction::RetryPayment);
        assert_eq!(action.as_str(), "RETRY_PAYMENT");

        let action: CommandAction = serde_json::from_str("\"CANCEL_ORDER\"").unwrap();
        assert_eq!(action, CommandAction::CancelOrder);

        assert!(serde_json::from_str::<CommandAction>("\"EXPLODE\"").is_err());
    }

    #[test]
    fn test_command_request_parsing() {
        let request: OrderCommandRequest = serde_json::from_str(
            r#"{"action":"CANCEL_ORDER","operation_id":"op-1","parameters":{"reason":"changed my mind"}}"#,
        )
        .unwrap();
        assert_eq!(request.action, CommandAction::CancelOrder);
        assert_eq!(request.operation_id.as_deref(), Some("op-1"));
        assert!(request.parameters.is_some());
    }
}
