pub mod admin;
pub mod catalog;
pub mod events;
pub mod orders;

use axum::http::StatusCode;
use axum::Json;

/// Map a core error onto the HTTP surface. Gateway failures never travel
/// this path for order flows; they reach the kiosk via the event stream.
pub(crate) fn error_response(e: korder_core::Error) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        tracing::error!(category = e.category(), error = %e, "request failed");
    } else {
        tracing::debug!(category = e.category(), error = %e, "request rejected");
    }

    (status, Json(serde_json::json!({ "error": e.to_string() })))
}
