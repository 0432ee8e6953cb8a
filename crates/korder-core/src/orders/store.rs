//! Order store
//!
//! Transactional creation of the order bundle (order, line snapshots, FSM
//! runtime) plus reads. The creation transaction commits before the first
//! gateway call; gateway outcomes never surface through the creating HTTP
//! request, only through the FSM and the event stream.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{pickup, CreateOrderRequest, CreateOrderResponse, OrderDetails, OrderStats};
use crate::app::AppContext;
use crate::fsm::orchestrator::Orchestrator;
use crate::fsm::spec::State;
use crate::models::{FsmRuntime, ItemLive, LifecycleLog, Order, OrderItem, OrderStatus};
use crate::{Error, Result};

#[derive(Clone)]
pub struct OrderStore {
    ctx: Arc<AppContext>,
}

impl OrderStore {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Create the order bundle in a single transaction and start its FSM.
    ///
    /// Validates every line against the live catalog and current stock,
    /// derives all prices from the catalog snapshot (client-sent prices are
    /// never trusted), generates pickup identifiers unique within the day,
    /// and persists order + lines + runtime atomically. The INIT entry
    /// handler is dispatched only after the transaction commits.
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        kiosk: &str,
    ) -> Result<CreateOrderResponse> {
        request.validate()?;

        let mut tx = self.ctx.db.pool().begin().await?;

        let mut total_net = Decimal::ZERO;
        let mut total_vat = Decimal::ZERO;
        let mut total_gross = Decimal::ZERO;
        let mut lines: Vec<(ItemLive, i32, Option<String>)> = Vec::with_capacity(request.items.len());

        for line in &request.items {
            let item = sqlx::query_as::<_, ItemLive>("SELECT * FROM items_live WHERE item_id = $1")
                .bind(line.item_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| Error::validation(format!("Item {} not found", line.item_id)))?;

            if !item.is_active {
                return Err(Error::validation(format!(
                    "Item {} is not active",
                    line.item_id
                )));
            }

            let stock: Option<i32> = sqlx::query_scalar(
                "SELECT stock_quantity FROM items_availability WHERE item_id = $1",
            )
            .bind(line.item_id)
            .fetch_optional(&mut *tx)
            .await?;
            let stock = stock.unwrap_or(0);

            if stock < line.quantity {
                return Err(Error::validation(format!(
                    "Insufficient stock for item {}. Available: {}, Requested: {}",
                    line.item_id, stock, line.quantity
                )));
            }

            let quantity = Decimal::from(line.quantity);
            total_net += item.price_net * quantity;
            total_vat += item.vat_amount * quantity;
            total_gross += item.price_gross * quantity;

            lines.push((item, line.quantity, line.wishes.clone()));
        }

        let order_date = Utc::now().date_naive();
        let pickup_number = pickup::generate_pickup_number(&mut tx, order_date).await?;
        let pin_code = pickup::generate_pin_code(&mut tx, order_date).await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders
                (order_date, currency, total_amount_net, total_amount_vat, total_amount_gross,
                 customer_id, session_id, pickup_number, pin_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(order_date)
        .bind(&request.currency)
        .bind(total_net)
        .bind(total_vat)
        .bind(total_gross)
        .bind(request.customer_id)
        .bind(request.session_id)
        .bind(&pickup_number)
        .bind(&pin_code)
        .fetch_one(&mut *tx)
        .await?;

        for (item, quantity, wishes) in &lines {
            let line_quantity = Decimal::from(*quantity);
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (item_in_order_id, order_id, item_id,
                     name_ru, name_eng, description_ru, description_eng,
                     unit_of_measure_ru, unit_of_measure_eng,
                     item_price_net, item_vat_rate, item_vat_amount, item_price_gross,
                     quantity, total_price_net, total_vat_amount, total_price_gross, wishes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order.order_id)
            .bind(item.item_id)
            .bind(&item.name_ru)
            .bind(&item.name_eng)
            .bind(&item.description_ru)
            .bind(&item.description_eng)
            .bind(&item.unit_name_ru)
            .bind(&item.unit_name_eng)
            .bind(item.price_net)
            .bind(item.vat_rate)
            .bind(item.vat_amount)
            .bind(item.price_gross)
            .bind(*quantity)
            .bind(item.price_net * line_quantity)
            .bind(item.vat_amount * line_quantity)
            .bind(item.price_gross * line_quantity)
            .bind(wishes)
            .execute(&mut *tx)
            .await?;
        }

        let orchestrator = Orchestrator::new(self.ctx.clone());
        orchestrator
            .insert_runtime(&mut tx, order.order_id, kiosk, &pickup_number, &pin_code)
            .await?;

        orchestrator.publish_state_changed(kiosk, order.order_id, State::Init, None, None, None);

        tx.commit().await?;

        tracing::info!(
            order_id = order.order_id,
            kiosk,
            %total_gross,
            %pickup_number,
            "order created"
        );

        // Entry handler runs outside the creation transaction
        orchestrator.dispatch_entry_handler(order.order_id, State::Init, kiosk);

        Ok(CreateOrderResponse {
            order_id: order.order_id,
            status: order.status,
            pickup_number,
            pin_code,
            total_amount_gross: total_gross,
            currency: order.currency,
        })
    }

    /// Deep read: order plus items, runtime and lifecycle chain.
    pub async fn get_order(&self, order_id: i64) -> Result<OrderDetails> {
        let order = self.get_order_row(order_id).await?;
        let items = self.get_order_items(order_id).await?;

        let runtime = sqlx::query_as::<_, FsmRuntime>(
            "SELECT * FROM order_fsm_runtime WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(self.ctx.db.pool())
        .await?;

        let lifecycle = sqlx::query_as::<_, LifecycleLog>(
            "SELECT * FROM order_lifecycle_log WHERE order_id = $1 ORDER BY event_created_at, log_id",
        )
        .bind(order_id)
        .fetch_all(self.ctx.db.pool())
        .await?;

        Ok(OrderDetails {
            order,
            items,
            runtime,
            lifecycle,
        })
    }

    pub async fn get_order_row(&self, order_id: i64) -> Result<Order> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(self.ctx.db.pool())
            .await?
            .ok_or_else(|| Error::not_found(format!("Order {} not found", order_id)))
    }

    pub async fn get_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY item_in_order_id",
        )
        .bind(order_id)
        .fetch_all(self.ctx.db.pool())
        .await?;
        Ok(items)
    }

    pub async fn list_orders_by_status(
        &self,
        status: OrderStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE status = $1 ORDER BY order_time DESC LIMIT $2 OFFSET $3",
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.db.pool())
        .await?;
        Ok(orders)
    }

    pub async fn count_by_status(&self, status: OrderStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = $1")
            .bind(status)
            .fetch_one(self.ctx.db.pool())
            .await?;
        Ok(count)
    }

    pub async fn status_stats(&self) -> Result<OrderStats> {
        let rows: Vec<(OrderStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM orders GROUP BY status")
                .fetch_all(self.ctx.db.pool())
                .await?;

        let mut stats = OrderStats::default();
        for (status, count) in rows {
            match status {
                OrderStatus::Pending => stats.pending = count,
                OrderStatus::Completed => stats.completed = count,
                OrderStatus::Failed => stats.failed = count,
                OrderStatus::Cancelled => stats.cancelled = count,
            }
        }
        Ok(stats)
    }

    /// Move a pending order to its terminal business status. Called only by
    /// the saga handler when the FSM reaches a terminal state; a second
    /// attempt on an already-frozen order is a conflict.
    pub async fn update_status(&self, order_id: i64, new_status: OrderStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET status = $2 WHERE order_id = $1 AND status = 'PENDING'",
        )
        .bind(order_id)
        .bind(new_status)
        .execute(self.ctx.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            let existing = self.get_order_row(order_id).await?;
            return Err(Error::conflict(format!(
                "Order {} status already {}",
                order_id,
                existing.status.as_str()
            )));
        }

        tracing::info!(order_id, status = new_status.as_str(), "order status updated");
        Ok(())
    }
}
