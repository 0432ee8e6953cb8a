//! Startup recovery
//!
//! Orders interrupted by a restart sit in non-terminal FSM states with their
//! timers gone. On startup every such runtime gets a recovery log entry, its
//! state timer re-armed, and its entry handler re-dispatched. Re-dispatch may
//! repeat a gateway call; requests carry `order_id` so providers can
//! deduplicate.

use std::sync::Arc;

use super::orchestrator::{insert_log, Orchestrator};
use super::spec;
use crate::app::AppContext;
use crate::models::{ActorType, FsmRuntime};
use crate::Result;

/// Resume every FSM left in a non-terminal state. Returns how many orders
/// were resumed.
pub async fn recover_incomplete_orders(ctx: &Arc<AppContext>) -> Result<usize> {
    let incomplete = sqlx::query_as::<_, FsmRuntime>(
        r#"
        SELECT * FROM order_fsm_runtime
        WHERE current_state NOT IN (
            'CANCELED_BY_USER', 'CANCELED_BY_TIMEOUT', 'UNSUCCESSFUL_PAYMENT',
            'PRINTING_FAILED', 'SENT_TO_KDS', 'SENT_TO_KDS_FAILED',
            'UNSUCCESSFUL_FISCALIZATION'
        )
        ORDER BY order_id
        "#,
    )
    .fetch_all(ctx.db.pool())
    .await?;

    if incomplete.is_empty() {
        tracing::info!("no incomplete orders to recover");
        return Ok(0);
    }

    let orchestrator = Orchestrator::new(ctx.clone());
    let mut resumed = 0usize;

    for runtime in incomplete {
        let order_id = runtime.order_id;
        let state = runtime.current_state;

        if let Err(e) = insert_log(
            ctx.db.pool(),
            order_id,
            Some(runtime.fsm_runtime_id),
            Some(state),
            state,
            None,
            Some(ActorType::System),
            None,
            Some("recovery"),
        )
        .await
        {
            tracing::error!(order_id, error = %e, "failed to write recovery log entry");
            continue;
        }

        if !spec::is_terminal(state) {
            orchestrator.arm_timer(order_id, state, &runtime.kiosk_username);
        }
        orchestrator.dispatch_entry_handler(order_id, state, &runtime.kiosk_username);

        tracing::info!(order_id, state = %state, "resumed incomplete order");
        resumed += 1;
    }

    tracing::info!(resumed, "recovery complete");
    Ok(resumed)
}
