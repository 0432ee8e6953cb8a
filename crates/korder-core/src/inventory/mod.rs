//! Inventory ledger

pub mod ledger;

pub use ledger::{AdjustmentOutcome, InventoryLedger, KIOSK_AUTO_DEDUCTION, SYSTEM_IDENTITY};
