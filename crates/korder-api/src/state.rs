use std::sync::Arc;

use korder_core::{AppContext, InventoryLedger, Orchestrator, OrderStore, ReceiptStore};

/// Shared handler state: the application container plus the services built
/// over it.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
}

impl AppState {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn orders(&self) -> OrderStore {
        OrderStore::new(self.ctx.clone())
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.ctx.clone())
    }

    pub fn receipts(&self) -> ReceiptStore {
        ReceiptStore::new(self.ctx.db.clone())
    }

    pub fn ledger(&self) -> InventoryLedger {
        InventoryLedger::new(self.ctx.db.clone())
    }
}
