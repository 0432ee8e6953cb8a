//! Embedded schema migration
//!
//! The schema is small enough to carry as inline DDL; every statement is
//! idempotent so `auto_migrate` can run unconditionally on startup.

use super::Database;
use crate::Result;

const CREATE_ENUMS: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE order_status AS ENUM ('PENDING', 'COMPLETED', 'FAILED', 'CANCELLED');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE fsm_state AS ENUM (
            'INIT', 'AWAITING_PAYMENT', 'AWAITING_PRINTING', 'AWAITING_KDS',
            'CANCELED_BY_USER', 'CANCELED_BY_TIMEOUT', 'UNSUCCESSFUL_PAYMENT',
            'PRINTING_FAILED', 'SENT_TO_KDS', 'SENT_TO_KDS_FAILED',
            'UNSUCCESSFUL_FISCALIZATION'
        );
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE fsm_event AS ENUM (
            'FISCALIZATION_SUCCEEDED', 'FISCALIZATION_FAILED',
            'PAYMENT_SUCCEEDED', 'USER_CANCELED', 'INACTIVITY_TIMEOUT',
            'PAYMENT_FAILED', 'PRINTING_SUCCEEDED', 'PRINTING_FAILED_OR_TIMEOUT',
            'KDS_CONFIRMATION', 'KDS_ERROR_OR_NO_RESPONSE'
        );
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE actor_type AS ENUM (
            'CUSTOMER', 'POS_TERMINAL', 'FISCAL_DEVICE', 'PRINTER', 'KITCHEN', 'SYSTEM'
        );
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
];

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items_live (
        item_id BIGSERIAL PRIMARY KEY,
        name_ru VARCHAR(200) NOT NULL,
        name_eng VARCHAR(200),
        description_ru TEXT NOT NULL,
        description_eng TEXT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        unit_name_ru VARCHAR(100) NOT NULL,
        unit_name_eng VARCHAR(100),
        food_category VARCHAR(100),
        price_net NUMERIC(10,2) NOT NULL,
        vat_rate NUMERIC(5,2) NOT NULL DEFAULT 0,
        vat_amount NUMERIC(10,2) NOT NULL,
        price_gross NUMERIC(10,2) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS items_availability (
        item_id BIGINT PRIMARY KEY REFERENCES items_live(item_id) ON DELETE CASCADE,
        stock_quantity INTEGER NOT NULL DEFAULT 0 CHECK (stock_quantity >= 0),
        reserved_quantity INTEGER NOT NULL DEFAULT 0,
        unit_name_ru VARCHAR(100) NOT NULL,
        unit_name_eng VARCHAR(100)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_adjustments (
        operation_id BIGSERIAL PRIMARY KEY,
        item_id BIGINT NOT NULL REFERENCES items_live(item_id) ON DELETE CASCADE,
        name_ru VARCHAR(200) NOT NULL,
        unit_name_ru VARCHAR(100) NOT NULL,
        unit_name_eng VARCHAR(100),
        change_quantity INTEGER NOT NULL,
        applied_quantity INTEGER NOT NULL,
        changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        changed_by VARCHAR(100) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        order_id BIGSERIAL PRIMARY KEY,
        order_date DATE NOT NULL,
        status order_status NOT NULL DEFAULT 'PENDING',
        order_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        currency VARCHAR(3) NOT NULL DEFAULT '643',
        total_amount_net NUMERIC(10,2) NOT NULL,
        total_amount_vat NUMERIC(10,2) NOT NULL,
        total_amount_gross NUMERIC(10,2) NOT NULL,
        customer_id BIGINT,
        session_id UUID,
        pickup_number VARCHAR(20) NOT NULL,
        pin_code VARCHAR(10) NOT NULL,
        UNIQUE (order_date, pickup_number),
        UNIQUE (order_date, pin_code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_items (
        item_in_order_id UUID PRIMARY KEY,
        order_id BIGINT NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
        item_id BIGINT NOT NULL,
        name_ru VARCHAR(200) NOT NULL,
        name_eng VARCHAR(200),
        description_ru TEXT NOT NULL,
        description_eng TEXT,
        unit_of_measure_ru VARCHAR(100) NOT NULL,
        unit_of_measure_eng VARCHAR(100),
        item_price_net NUMERIC(10,2) NOT NULL,
        item_vat_rate NUMERIC(5,2) NOT NULL,
        item_vat_amount NUMERIC(10,2) NOT NULL,
        item_price_gross NUMERIC(10,2) NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        total_price_net NUMERIC(10,2) NOT NULL,
        total_vat_amount NUMERIC(10,2) NOT NULL,
        total_price_gross NUMERIC(10,2) NOT NULL,
        wishes VARCHAR(500)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_fsm_runtime (
        fsm_runtime_id UUID PRIMARY KEY,
        order_id BIGINT NOT NULL UNIQUE REFERENCES orders(order_id) ON DELETE CASCADE,
        kiosk_username VARCHAR(100) NOT NULL,
        current_state fsm_state NOT NULL DEFAULT 'INIT',
        payment_context JSONB,
        fiscal_context JSONB,
        printing_context JSONB,
        pickup_number VARCHAR(20),
        pin_code VARCHAR(10),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_lifecycle_log (
        log_id UUID PRIMARY KEY,
        order_id BIGINT NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
        fsm_runtime_id UUID REFERENCES order_fsm_runtime(fsm_runtime_id),
        from_state fsm_state,
        to_state fsm_state NOT NULL,
        trigger_event fsm_event,
        actor_type actor_type,
        actor_id VARCHAR(100),
        comment TEXT,
        event_created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS slip_receipts (
        slip_receipt_id UUID PRIMARY KEY,
        order_id BIGINT NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
        terminal_receipt_id VARCHAR(100),
        receipt_body JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        created_by VARCHAR(100)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fiscal_receipts (
        fiscal_receipt_id UUID PRIMARY KEY,
        order_id BIGINT NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
        fiscal_machine_receipt_id VARCHAR(100),
        receipt_body JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        created_by VARCHAR(100)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS summary_receipts (
        summary_receipt_id UUID PRIMARY KEY,
        order_id BIGINT NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
        slip_receipt_id UUID REFERENCES slip_receipts(slip_receipt_id),
        fiscal_receipt_id UUID REFERENCES fiscal_receipts(fiscal_receipt_id),
        pickup_number VARCHAR(20),
        pin_code VARCHAR(10),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        created_by VARCHAR(100)
    )
    "#,
];

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
    "CREATE INDEX IF NOT EXISTS idx_orders_order_date ON orders(order_date)",
    "CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_lifecycle_log_order_id ON order_lifecycle_log(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_stock_adjustments_item_id ON stock_adjustments(item_id)",
    "CREATE INDEX IF NOT EXISTS idx_slip_receipts_order_id ON slip_receipts(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_fiscal_receipts_order_id ON fiscal_receipts(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_summary_receipts_order_id ON summary_receipts(order_id)",
];

/// Create all enum types, tables and indexes that do not exist yet.
pub async fn auto_migrate(db: &Database) -> Result<()> {
    tracing::info!("Running schema migration...");

    for statement in CREATE_ENUMS.iter().chain(CREATE_TABLES).chain(CREATE_INDEXES) {
        sqlx::query(statement).execute(db.pool()).await?;
    }

    tracing::info!("Schema migration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_sets_are_non_empty() {
        assert_eq!(CREATE_ENUMS.len(), 4);
        assert_eq!(CREATE_TABLES.len(), 10);
        assert!(!CREATE_INDEXES.is_empty());
    }

    #[test]
    fn test_tables_are_idempotent() {
        for statement in CREATE_TABLES {
            assert!(statement.contains("IF NOT EXISTS"));
        }
        for statement in CREATE_INDEXES {
            assert!(statement.contains("IF NOT EXISTS"));
        }
    }
}
