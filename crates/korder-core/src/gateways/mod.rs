//! External gateway adapters
//!
//! One capability per device: fiscal machine, POS payment terminal, receipt
//! printer, kitchen display system. Adapters are pure clients: a single call
//! operation, no retries, no state beyond a request counter. Retry and
//! deadline policy belongs to the saga handler. Monetary amounts on the wire
//! are integer kopecks; decimal money never crosses a gateway boundary.
//!
//! Every adapter has a `mockup` variant driven by a success-probability and a
//! synthetic processing delay, sharing the wire contract of the real client.

pub mod fiscal;
pub mod kds;
pub mod payment;
pub mod printer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::GatewaysConfig;

pub use fiscal::{
    FiscalGateway, FiscalItem, FiscalReceiptData, FiscalReceiptItem, FiscalRequest,
    FiscalResponse, HttpFiscalGateway, MockFiscalGateway,
};
pub use kds::{HttpKdsGateway, KdsGateway, KdsOrderItem, KdsRequest, KdsResponse, MockKdsGateway};
pub use payment::{
    HttpPaymentGateway, MockPaymentGateway, PaymentGateway, PaymentOutcome, PaymentRequest,
    PaymentResponse,
};
pub use printer::{
    FilePrinterGateway, HttpPrinterGateway, PrinterGateway, PrinterOutcome, PrinterRequest,
    PrinterResponse, ReceiptType,
};

/// Binary gateway status shared by the fiscal and KDS wire contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOT_OK")]
    NotOk,
}

impl WireStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, WireStatus::Ok)
    }
}

/// The four gateway clients, constructed once and shared through the
/// application container.
#[derive(Clone)]
pub struct Gateways {
    pub fiscal: Arc<dyn FiscalGateway>,
    pub payment: Arc<dyn PaymentGateway>,
    pub printer: Arc<dyn PrinterGateway>,
    pub kds: Arc<dyn KdsGateway>,
}

impl Gateways {
    /// Build each adapter from configuration, picking the mock variant when
    /// `mockup_mode` is set.
    pub fn from_config(config: &GatewaysConfig) -> Self {
        let fiscal: Arc<dyn FiscalGateway> = if config.fiscal.mockup_mode {
            Arc::new(MockFiscalGateway::new(config.fiscal.clone()))
        } else {
            Arc::new(HttpFiscalGateway::new(config.fiscal.clone()))
        };

        let payment: Arc<dyn PaymentGateway> = if config.payment.mockup_mode {
            Arc::new(MockPaymentGateway::new(config.payment.clone()))
        } else {
            Arc::new(HttpPaymentGateway::new(config.payment.clone()))
        };

        let printer: Arc<dyn PrinterGateway> = if config.printer.mockup_mode {
            Arc::new(FilePrinterGateway::new(config.printer.clone()))
        } else {
            Arc::new(HttpPrinterGateway::new(config.printer.clone()))
        };

        let kds: Arc<dyn KdsGateway> = if config.kds.mockup_mode {
            Arc::new(MockKdsGateway::new(config.kds.clone()))
        } else {
            Arc::new(HttpKdsGateway::new(config.kds.clone()))
        };

        Self {
            fiscal,
            payment,
            printer,
            kds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_status_serialization() {
        assert_eq!(serde_json::to_string(&WireStatus::Ok).unwrap(), "\"OK\"");
        assert_eq!(
            serde_json::to_string(&WireStatus::NotOk).unwrap(),
            "\"NOT_OK\""
        );
        let status: WireStatus = serde_json::from_str("\"NOT_OK\"").unwrap();
        assert!(!status.is_ok());
    }

    #[test]
    fn test_gateways_from_default_config_are_mocks() {
        let gateways = Gateways::from_config(&GatewaysConfig::default());
        // Mock variants identify themselves
        assert_eq!(gateways.fiscal.name(), "mock-fiscal");
        assert_eq!(gateways.payment.name(), "mock-payment");
        assert_eq!(gateways.printer.name(), "file-printer");
        assert_eq!(gateways.kds.name(), "mock-kds");
    }
}
