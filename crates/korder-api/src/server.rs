use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use korder_core::{AppContext, Error, Result};

use crate::middleware::{admin_auth_middleware, kiosk_auth_middleware};
use crate::routes::{admin, catalog, events, orders};
use crate::state::AppState;

/// Build the full API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let kiosk_routes = Router::new()
        .route("/orders", post(orders::create_order))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/orders/:order_id/commands", post(orders::submit_command))
        .route("/orders/:order_id/receipts", get(orders::get_receipts))
        .route("/items", get(catalog::list_items))
        .route("/events", get(events::kiosk_events))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            kiosk_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/items/stock", post(admin::replenish_stock))
        .route("/orders", get(admin::list_orders))
        .route("/orders/stats", get(admin::order_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/kiosk", kiosk_routes)
        .nest("/api/admin", admin_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    let database = state.ctx.db.health_check().await.is_ok();
    Json(serde_json::json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "version": korder_core::VERSION,
    }))
}

/// Serve the API until shutdown. Ctrl-C cancels all active order timers
/// before the listener closes; committed FSM state is picked up by recovery
/// on the next start.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = SocketAddr::from((
        ctx.config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid host: {}", e)))?,
        ctx.config.server.port,
    ));

    let app = build_router(AppState::new(ctx.clone()));

    info!("korder API server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ctx))
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(())
}

async fn shutdown_signal(ctx: Arc<AppContext>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
    ctx.shutdown();
}
