//! Database access
//!
//! Thin handle over the PostgreSQL pool plus the embedded-DDL migrator.

pub mod migrate;

use sqlx::{Pool, Postgres};

use crate::config::DatabaseConfig;

/// PostgreSQL database handle
#[derive(Clone)]
pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub async fn health_check(&self) -> crate::Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

/// Create a PostgreSQL connection pool from configuration
pub async fn create_pool(config: &DatabaseConfig) -> crate::Result<Pool<Postgres>> {
    use sqlx::postgres::PgPoolOptions;

    let database_url = format!(
        "postgres://{}:{}@{}:{}/{}",
        config.username, config.password, config.host, config.port, config.database
    );

    tracing::info!(
        "Connecting to PostgreSQL at {}:{}/{}...",
        config.host,
        config.port,
        config.database
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .connect(&database_url)
        .await
        .map_err(crate::Error::Database)?;

    tracing::info!("PostgreSQL connected successfully");
    Ok(pool)
}
