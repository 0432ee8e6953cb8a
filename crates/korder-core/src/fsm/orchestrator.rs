//! FSM orchestration engine
//!
//! Validates transitions against the declarative FSM spec, persists state
//! and audit log in one transaction under a row lock on the runtime row
//! (submissions for the same order serialize; distinct orders proceed in
//! parallel), arms per-state
//! timers and publishes `STATE_CHANGED` events. Entry handlers are dispatched
//! as detached tasks with a fresh database session, never inside the
//! submitting transaction.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use sqlx::{Postgres, Transaction};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::spec::{self, ContextClass, Event, State};
use crate::app::AppContext;
use crate::models::{ActorType, FsmRuntime, StepContext};
use crate::{Error, Result};

/// One FSM event with its audit metadata.
#[derive(Debug, Clone)]
pub struct EventSubmission {
    pub event: Event,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub comment: Option<String>,
    pub event_data: Option<serde_json::Value>,
}

impl EventSubmission {
    pub fn new(event: Event, actor_type: ActorType) -> Self {
        Self {
            event,
            actor_type,
            actor_id: None,
            comment: None,
            event_data: None,
        }
    }

    pub fn with_actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_event_data(mut self, event_data: serde_json::Value) -> Self {
        self.event_data = Some(event_data);
        self
    }
}

struct TimerGuard {
    handle: JoinHandle<()>,
    state: State,
}

/// One active timer per order, keyed by order id. Arming replaces and aborts
/// any previous timer for the order.
pub struct TimerTable {
    timers: DashMap<i64, TimerGuard>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self {
            timers: DashMap::new(),
        }
    }

    fn arm(&self, order_id: i64, state: State, handle: JoinHandle<()>) {
        if let Some((_, old)) = self.timers.remove(&order_id) {
            old.handle.abort();
        }
        self.timers.insert(order_id, TimerGuard { handle, state });
    }

    pub fn cancel(&self, order_id: i64) -> bool {
        if let Some((_, guard)) = self.timers.remove(&order_id) {
            guard.handle.abort();
            true
        } else {
            false
        }
    }

    /// Remove the entry without aborting the task. Used by a fired timer
    /// from inside its own task: the submit it is about to make would
    /// otherwise abort the task mid-transaction through `cancel`.
    fn discharge(&self, order_id: i64) {
        self.timers.remove(&order_id);
    }

    pub fn cancel_all(&self) -> usize {
        let order_ids: Vec<i64> = self.timers.iter().map(|entry| *entry.key()).collect();
        let mut cancelled = 0;
        for order_id in order_ids {
            if self.cancel(order_id) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// State the timer for an order was armed in, if one is active.
    pub fn armed_state(&self, order_id: i64) -> Option<State> {
        self.timers.get(&order_id).map(|guard| guard.state)
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Default for TimerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Which event a firing state timer submits.
fn timeout_event(state: State) -> Option<Event> {
    match state {
        State::AwaitingPayment => Some(Event::InactivityTimeout),
        State::AwaitingKds => Some(Event::KdsErrorOrNoResponse),
        // The printing timer is a pure safety net; the saga deadline inside
        // the handler submits PRINTING_FAILED_OR_TIMEOUT itself.
        _ => None,
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<AppContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Insert the FSM runtime row in INIT plus the initial lifecycle log
    /// entry, inside the caller's (order creation) transaction.
    pub async fn insert_runtime(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
        kiosk: &str,
        pickup_number: &str,
        pin_code: &str,
    ) -> Result<Uuid> {
        let runtime_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO order_fsm_runtime
                (fsm_runtime_id, order_id, kiosk_username, current_state, pickup_number, pin_code)
            VALUES ($1, $2, $3, 'INIT', $4, $5)
            "#,
        )
        .bind(runtime_id)
        .bind(order_id)
        .bind(kiosk)
        .bind(pickup_number)
        .bind(pin_code)
        .execute(&mut **tx)
        .await?;

        insert_log(
            &mut **tx,
            order_id,
            Some(runtime_id),
            None,
            State::Init,
            None,
            Some(ActorType::System),
            None,
            Some("FSM initialized for new order"),
        )
        .await?;

        Ok(runtime_id)
    }

    /// Submit an event for an order.
    ///
    /// Returns `Ok(true)` when the transition was applied. An event that is
    /// not valid in the current state is recorded as an invalid-transition
    /// log entry (`from == to`) and returns `Ok(false)` without publishing.
    pub async fn submit(
        &self,
        order_id: i64,
        kiosk: &str,
        submission: EventSubmission,
    ) -> Result<bool> {
        let mut tx = self.ctx.db.pool().begin().await?;

        // Row lock serializes concurrent submissions for the same order
        let runtime = sqlx::query_as::<_, FsmRuntime>(
            "SELECT * FROM order_fsm_runtime WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("FSM runtime not found for order {}", order_id)))?;

        let current = runtime.current_state;
        let event = submission.event;

        let Some(next) = spec::next_state(current, event) else {
            insert_log(
                &mut *tx,
                order_id,
                Some(runtime.fsm_runtime_id),
                Some(current),
                current,
                Some(event),
                Some(submission.actor_type),
                submission.actor_id.as_deref(),
                Some(&format!("Invalid transition: {} + {}", current, event)),
            )
            .await?;
            tx.commit().await?;

            tracing::warn!(
                order_id,
                state = %current,
                event = %event,
                "rejected invalid transition"
            );
            return Ok(false);
        };

        // Persist new state, folding event data into the matching context
        match (event.context_class(), &submission.event_data) {
            (Some(class), Some(event_data)) => {
                let (column, existing) = match class {
                    ContextClass::Fiscal => ("fiscal_context", runtime.fiscal_context.clone()),
                    ContextClass::Payment => ("payment_context", runtime.payment_context.clone()),
                    ContextClass::Printing => {
                        ("printing_context", runtime.printing_context.clone())
                    }
                };
                let mut context: StepContext = existing.map(|json| json.0).unwrap_or_default();
                context.absorb(event_data);

                let sql = format!(
                    "UPDATE order_fsm_runtime SET current_state = $1, updated_at = NOW(), {} = $2 WHERE order_id = $3",
                    column
                );
                sqlx::query(&sql)
                    .bind(next)
                    .bind(sqlx::types::Json(context))
                    .bind(order_id)
                    .execute(&mut *tx)
                    .await?;
            }
            _ => {
                sqlx::query(
                    "UPDATE order_fsm_runtime SET current_state = $1, updated_at = NOW() WHERE order_id = $2",
                )
                .bind(next)
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        insert_log(
            &mut *tx,
            order_id,
            Some(runtime.fsm_runtime_id),
            Some(current),
            next,
            Some(event),
            Some(submission.actor_type),
            submission.actor_id.as_deref(),
            submission.comment.as_deref(),
        )
        .await?;

        self.ctx.timers.cancel(order_id);
        if !spec::is_terminal(next) {
            self.arm_timer(order_id, next, kiosk);
        }

        self.publish_state_changed(
            kiosk,
            order_id,
            next,
            Some(current),
            Some(event),
            submission.event_data.as_ref(),
        );

        tx.commit().await?;

        tracing::info!(
            order_id,
            from = %current,
            to = %next,
            event = %event,
            "FSM transition applied"
        );

        self.dispatch_entry_handler(order_id, next, kiosk);

        Ok(true)
    }

    /// Current runtime row for an order.
    pub async fn get_runtime(&self, order_id: i64) -> Result<FsmRuntime> {
        sqlx::query_as::<_, FsmRuntime>("SELECT * FROM order_fsm_runtime WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(self.ctx.db.pool())
            .await?
            .ok_or_else(|| Error::not_found(format!("FSM runtime not found for order {}", order_id)))
    }

    /// Events valid in the order's current state.
    pub async fn valid_events(&self, order_id: i64) -> Result<Vec<Event>> {
        let runtime = self.get_runtime(order_id).await?;
        Ok(spec::valid_events(runtime.current_state))
    }

    /// Re-dispatch the current state's entry handler for a user retry
    /// command. Honored only when the current state's retry policy bit is
    /// set; either way the attempt lands in the lifecycle log with
    /// `from == to` and no trigger event.
    pub async fn retry_current_step(
        &self,
        order_id: i64,
        kiosk: &str,
        command: &str,
    ) -> Result<bool> {
        let runtime = self.get_runtime(order_id).await?;
        let state = runtime.current_state;

        if !spec::is_retry_allowed(state) {
            insert_log(
                self.ctx.db.pool(),
                order_id,
                Some(runtime.fsm_runtime_id),
                Some(state),
                state,
                None,
                Some(ActorType::Customer),
                None,
                Some(&format!("Command {} rejected: retry not allowed in {}", command, state)),
            )
            .await?;
            tracing::warn!(order_id, state = %state, command, "retry command rejected");
            return Ok(false);
        }

        insert_log(
            self.ctx.db.pool(),
            order_id,
            Some(runtime.fsm_runtime_id),
            Some(state),
            state,
            None,
            Some(ActorType::Customer),
            None,
            Some(&format!("Command: {}", command)),
        )
        .await?;

        tracing::info!(order_id, state = %state, command, "re-dispatching entry handler for retry");
        self.dispatch_entry_handler(order_id, state, kiosk);
        Ok(true)
    }

    /// Publish a `STATE_CHANGED` event on the kiosk's channel. The payload
    /// shape is the UI contract; keep it stable.
    pub fn publish_state_changed(
        &self,
        kiosk: &str,
        order_id: i64,
        state: State,
        previous_state: Option<State>,
        trigger_event: Option<Event>,
        event_data: Option<&serde_json::Value>,
    ) {
        let payload = json!({
            "type": "STATE_CHANGED",
            "order_id": order_id,
            "state": state,
            "previous_state": previous_state,
            "trigger_event": trigger_event,
            "is_terminal": spec::is_terminal(state),
            "event_data": event_data.cloned().unwrap_or_else(|| json!({})),
        });

        let delivered = self.ctx.bus.publish(kiosk, payload);
        tracing::debug!(order_id, kiosk, state = %state, delivered, "STATE_CHANGED published");
    }

    /// Run the entry handler for a state as a detached task with a fresh
    /// database session.
    pub fn dispatch_entry_handler(&self, order_id: i64, state: State, kiosk: &str) {
        tokio::spawn(super::handler::run_entry_handler(
            self.ctx.clone(),
            order_id,
            state,
            kiosk.to_string(),
        ));
    }

    /// Arm the state's advisory timer. When it fires it re-reads the current
    /// state first, so a fire that raced a transition is suppressed even
    /// before the invalid-transition rule would reject it.
    pub fn arm_timer(&self, order_id: i64, state: State, kiosk: &str) {
        let Some(timeout) = spec::state_timeout(state) else {
            return;
        };

        let handle = tokio::spawn(timer_future(
            self.ctx.clone(),
            order_id,
            state,
            kiosk.to_string(),
            timeout,
        ));
        self.ctx.timers.arm(order_id, state, handle);

        tracing::debug!(order_id, state = %state, seconds = timeout.as_secs(), "state timer armed");
    }
}

fn timer_future(
    ctx: Arc<AppContext>,
    order_id: i64,
    armed_state: State,
    kiosk: String,
    timeout: Duration,
) -> BoxFuture<'static, ()> {
    async move {
        tokio::time::sleep(timeout).await;

        // Guard against a fire racing the state change that cancelled us
        let current: Option<State> = match sqlx::query_scalar(
            "SELECT current_state FROM order_fsm_runtime WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(ctx.db.pool())
        .await
        {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(order_id, error = %e, "timer failed to read current state");
                return;
            }
        };

        if current != Some(armed_state) {
            tracing::debug!(
                order_id,
                armed = %armed_state,
                "late timer fire suppressed"
            );
            return;
        }

        let Some(event) = timeout_event(armed_state) else {
            ctx.timers.discharge(order_id);
            tracing::debug!(order_id, state = %armed_state, "state timer elapsed without a timeout event");
            return;
        };

        // Drop our own table entry first so the submit below cannot abort
        // this task through the timer-cancel step.
        ctx.timers.discharge(order_id);

        let comment = format!("Timeout after {}s in {}", timeout.as_secs(), armed_state);
        let orchestrator = Orchestrator::new(ctx);
        if let Err(e) = orchestrator
            .submit(
                order_id,
                &kiosk,
                EventSubmission::new(event, ActorType::System).with_comment(comment),
            )
            .await
        {
            tracing::error!(order_id, error = %e, "timer event submission failed");
        }
    }
    .boxed()
}

/// Append a lifecycle log entry. Works against the pool or an open
/// transaction.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn insert_log<'a, E>(
    executor: E,
    order_id: i64,
    fsm_runtime_id: Option<Uuid>,
    from_state: Option<State>,
    to_state: State,
    trigger_event: Option<Event>,
    actor_type: Option<ActorType>,
    actor_id: Option<&str>,
    comment: Option<&str>,
) -> Result<()>
where
    E: sqlx::Executor<'a, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO order_lifecycle_log
            (log_id, order_id, fsm_runtime_id, from_state, to_state,
             trigger_event, actor_type, actor_id, comment, event_created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(order_id)
    .bind(fsm_runtime_id)
    .bind(from_state)
    .bind(to_state)
    .bind(trigger_event)
    .bind(actor_type)
    .bind(actor_id)
    .bind(comment)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;

    /// Context backed by a lazy pool: usable for everything that does not
    /// actually execute a query.
    fn test_ctx() -> Arc<AppContext> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/korder_test")
            .expect("lazy pool");
        AppContext::with_database(Config::default(), Database::new(pool))
    }

    #[tokio::test]
    async fn test_state_changed_payload_shape() {
        let ctx = test_ctx();
        let mut sub = ctx.bus.subscribe("kiosk-1");

        let orchestrator = Orchestrator::new(ctx.clone());
        orchestrator.publish_state_changed(
            "kiosk-1",
            7,
            State::AwaitingPayment,
            Some(State::Init),
            Some(Event::FiscalizationSucceeded),
            Some(&serde_json::json!({ "result_code": "OK" })),
        );

        let event = sub.try_recv().expect("event published");
        assert_eq!(event["type"], "STATE_CHANGED");
        assert_eq!(event["order_id"], 7);
        assert_eq!(event["state"], "AWAITING_PAYMENT");
        assert_eq!(event["previous_state"], "INIT");
        assert_eq!(event["trigger_event"], "FISCALIZATION_SUCCEEDED");
        assert_eq!(event["is_terminal"], false);
        assert_eq!(event["event_data"]["result_code"], "OK");
    }

    #[tokio::test]
    async fn test_state_changed_terminal_flag() {
        let ctx = test_ctx();
        let mut sub = ctx.bus.subscribe("kiosk-1");

        let orchestrator = Orchestrator::new(ctx.clone());
        orchestrator.publish_state_changed(
            "kiosk-1",
            7,
            State::SentToKds,
            Some(State::AwaitingKds),
            Some(Event::KdsConfirmation),
            None,
        );

        let event = sub.try_recv().expect("event published");
        assert_eq!(event["is_terminal"], true);
        assert_eq!(event["event_data"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_initial_state_changed_has_null_previous() {
        let ctx = test_ctx();
        let mut sub = ctx.bus.subscribe("kiosk-1");

        Orchestrator::new(ctx.clone()).publish_state_changed(
            "kiosk-1",
            7,
            State::Init,
            None,
            None,
            None,
        );

        let event = sub.try_recv().expect("event published");
        assert_eq!(event["state"], "INIT");
        assert!(event["previous_state"].is_null());
        assert!(event["trigger_event"].is_null());
    }

    #[test]
    fn test_timeout_events() {
        assert_eq!(
            timeout_event(State::AwaitingPayment),
            Some(Event::InactivityTimeout)
        );
        assert_eq!(
            timeout_event(State::AwaitingKds),
            Some(Event::KdsErrorOrNoResponse)
        );
        assert_eq!(timeout_event(State::AwaitingPrinting), None);
        assert_eq!(timeout_event(State::Init), None);
    }

    #[tokio::test]
    async fn test_timer_table_arm_and_cancel() {
        let table = TimerTable::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        table.arm(7, State::AwaitingPayment, handle);
        assert_eq!(table.active_count(), 1);
        assert_eq!(table.armed_state(7), Some(State::AwaitingPayment));

        assert!(table.cancel(7));
        assert_eq!(table.active_count(), 0);
        assert!(!table.cancel(7));
    }

    #[tokio::test]
    async fn test_timer_table_rearm_replaces() {
        let table = TimerTable::new();
        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let second = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        table.arm(7, State::AwaitingPayment, first);
        table.arm(7, State::AwaitingKds, second);

        assert_eq!(table.active_count(), 1);
        assert_eq!(table.armed_state(7), Some(State::AwaitingKds));
        assert_eq!(table.cancel_all(), 1);
    }

    #[test]
    fn test_event_submission_builder() {
        let submission = EventSubmission::new(Event::PaymentSucceeded, ActorType::PosTerminal)
            .with_actor_id("00092240")
            .with_comment("Payment completed in 1.50s")
            .with_event_data(serde_json::json!({ "transaction_id": "TXN_1" }));

        assert_eq!(submission.event, Event::PaymentSucceeded);
        assert_eq!(submission.actor_id.as_deref(), Some("00092240"));
        assert!(submission.event_data.is_some());
    }
}
