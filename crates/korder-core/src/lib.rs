pub mod app;
pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod fsm;
pub mod gateways;
pub mod inventory;
pub mod models;
pub mod orders;

// Re-export commonly used types
pub use app::AppContext;
pub use bus::{EventBus, Subscription};
pub use config::{Config, GatewayConfig, GatewaysConfig};
pub use db::{create_pool, migrate::auto_migrate, Database};
pub use error::{Error, GatewayFailure, Result};
pub use fsm::{recover_incomplete_orders, Event, EventSubmission, Orchestrator, State};
pub use gateways::Gateways;
pub use inventory::InventoryLedger;
pub use models::{ActorType, OrderStatus};
pub use orders::{CreateOrderRequest, CreateOrderResponse, OrderStore, ReceiptStore};

/// Current version of korder
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }
}
