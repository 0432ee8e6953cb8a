//! Kiosk SSE stream
//!
//! Long-lived push-only stream per authenticated kiosk. Events are routed by
//! kiosk username; a client that reconnects sees only events published after
//! its new subscription. Heartbeat comments every 15s keep proxies from
//! closing the idle connection.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Extension,
};
use futures::stream::{self, Stream, StreamExt};

use crate::middleware::Principal;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const RETRY_HINT: Duration = Duration::from_millis(3000);

fn event_stream(
    state: &AppState,
    kiosk: &str,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    let subscription = state.ctx.bus.subscribe(kiosk);

    // Reconnect hint first, then bus events as JSON data frames. Dropping the
    // stream on client disconnect drops the subscription with it.
    let retry_hint = stream::once(async { Ok(SseEvent::default().retry(RETRY_HINT)) });
    let events = subscription
        .into_stream()
        .map(|event| Ok(SseEvent::default().data(event.to_string())));

    retry_hint.chain(events)
}

/// GET /api/kiosk/events
pub async fn kiosk_events(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Response {
    tracing::info!(kiosk = %principal.username, "SSE stream opened");

    let sse = Sse::new(event_stream(&state, &principal.username)).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("ping"),
    );

    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_and_retry_settings() {
        assert_eq!(HEARTBEAT_INTERVAL, Duration::from_secs(15));
        assert_eq!(RETRY_HINT, Duration::from_millis(3000));
    }
}
