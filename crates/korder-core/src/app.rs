//! Application container
//!
//! Everything that exists exactly once per process: the database handle, the
//! event bus, the gateway clients and the per-order timer table. Constructed
//! at startup and passed by `Arc` to handlers; nothing here is a module-level
//! singleton.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::config::Config;
use crate::db::{self, Database};
use crate::fsm::orchestrator::TimerTable;
use crate::gateways::Gateways;
use crate::Result;

pub struct AppContext {
    pub config: Config,
    pub db: Database,
    pub bus: EventBus,
    pub gateways: Gateways,
    pub timers: TimerTable,
}

impl AppContext {
    /// Validate configuration and the FSM spec, connect the pool and build
    /// the gateway clients.
    pub async fn initialize(config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        crate::fsm::spec::validate_spec()?;

        let pool = db::create_pool(&config.database).await?;
        let gateways = Gateways::from_config(&config.gateways);

        Ok(Arc::new(Self {
            config,
            db: Database::new(pool),
            bus: EventBus::new(),
            gateways,
            timers: TimerTable::new(),
        }))
    }

    /// Build a context around an existing pool. Used by tests and by callers
    /// that manage the pool themselves.
    pub fn with_database(config: Config, db: Database) -> Arc<Self> {
        let gateways = Gateways::from_config(&config.gateways);
        Arc::new(Self {
            config,
            db,
            bus: EventBus::new(),
            gateways,
            timers: TimerTable::new(),
        })
    }

    /// Cancel all active timers. In-flight gateway calls are dropped with the
    /// runtime; committed FSM state is recovered on next start.
    pub fn shutdown(&self) {
        let cancelled = self.timers.cancel_all();
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelled active order timers on shutdown");
        }
    }
}
