//! Fiscal machine (KKT) gateway
//!
//! Fiscalization produces the legally required fiscal receipt before payment.
//! The wire contract mirrors the KKT web emulator: amounts in kopecks,
//! `status` either `OK` with a receipt body or `NOT_OK` with an error code.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::WireStatus;
use crate::config::GatewayConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalItem {
    pub item_id: i64,
    pub item_description: String,
    /// Kopecks
    pub item_price_net: i64,
    /// Kopecks
    pub item_price_gross: i64,
    /// Kopecks
    pub item_vat_value: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalRequest {
    pub order_id: i64,
    pub kiosk_id: String,
    pub items: Vec<FiscalItem>,
    pub total_net: i64,
    pub total_vat: i64,
    pub total_gross: i64,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalReceiptItem {
    pub item_id: i64,
    pub description: String,
    pub quantity: i32,
    pub price_net: i64,
    pub vat: i64,
    pub price_gross: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalReceiptData {
    pub ofd_reg_number: String,
    pub fiscal_document_number: String,
    pub fn_number: String,
    pub order_id: i64,
    /// ISO-8601
    pub issued_at: String,
    pub items: Vec<FiscalReceiptItem>,
    pub total_net: i64,
    pub total_vat: i64,
    pub total_gross: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalResponse {
    pub status: WireStatus,
    pub fiscal_receipt: Option<FiscalReceiptData>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl FiscalResponse {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Synthetic response for a saga deadline that elapsed before the device
    /// answered.
    pub fn timeout(seconds: u64) -> Self {
        Self {
            status: WireStatus::NotOk,
            fiscal_receipt: None,
            error_code: Some("TIMEOUT".to_string()),
            error_message: Some(format!("KKT timeout after {}s", seconds)),
        }
    }
}

/// Fiscal device capability: one call, tagged response, no retries.
#[async_trait]
pub trait FiscalGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fiscalize(&self, request: &FiscalRequest) -> Result<FiscalResponse>;
}

/// HTTP client for the real fiscal machine / web emulator.
pub struct HttpFiscalGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpFiscalGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl FiscalGateway for HttpFiscalGateway {
    fn name(&self) -> &'static str {
        "http-fiscal"
    }

    async fn fiscalize(&self, request: &FiscalRequest) -> Result<FiscalResponse> {
        let url = format!("{}/fiscal", self.config.base_url.trim_end_matches('/'));

        let mut http_request = self.client.post(&url).json(request);
        if let Some(api_key) = &self.config.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Gateway(crate::error::GatewayFailure::Timeout {
                    gateway: "fiscal".to_string(),
                    seconds: self.config.timeout_seconds,
                })
            } else {
                Error::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(order_id = request.order_id, %status, "fiscal gateway returned HTTP error");
            return Ok(FiscalResponse {
                status: WireStatus::NotOk,
                fiscal_receipt: None,
                error_code: Some(status.as_u16().to_string()),
                error_message: Some(format!("HTTP {}", status)),
            });
        }

        let parsed: FiscalResponse = response.json().await?;
        Ok(parsed)
    }
}

/// Mock fiscal machine driven by a success probability and a synthetic delay.
pub struct MockFiscalGateway {
    config: GatewayConfig,
    document_counter: AtomicU64,
}

// Failure table of the emulated KKT
const MOCK_FAILURES: &[(&str, &str)] = &[
    ("01", "Fiscal storage error"),
    ("02", "OFD connection failed"),
    ("03", "Invalid fiscal data"),
    ("TIMEOUT", "KKT timeout"),
];

impl MockFiscalGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            document_counter: AtomicU64::new(1000),
        }
    }
}

#[async_trait]
impl FiscalGateway for MockFiscalGateway {
    fn name(&self) -> &'static str {
        "mock-fiscal"
    }

    async fn fiscalize(&self, request: &FiscalRequest) -> Result<FiscalResponse> {
        if self.config.mock_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.mock_delay_ms)).await;
        }

        let counter = self.document_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let is_success = rand::thread_rng().gen_bool(self.config.mock_success_rate);

        if is_success {
            let items = request
                .items
                .iter()
                .map(|item| FiscalReceiptItem {
                    item_id: item.item_id,
                    description: item.item_description.clone(),
                    quantity: item.quantity,
                    price_net: item.item_price_net,
                    vat: item.item_vat_value,
                    price_gross: item.item_price_gross,
                })
                .collect();

            Ok(FiscalResponse {
                status: WireStatus::Ok,
                fiscal_receipt: Some(FiscalReceiptData {
                    ofd_reg_number: "1234567890123456".to_string(),
                    fiscal_document_number: format!("FD{:06}", counter),
                    fn_number: "9999078900004312".to_string(),
                    order_id: request.order_id,
                    issued_at: chrono::Utc::now().to_rfc3339(),
                    items,
                    total_net: request.total_net,
                    total_vat: request.total_vat,
                    total_gross: request.total_gross,
                    message: "Fiscal document created successfully".to_string(),
                }),
                error_code: None,
                error_message: None,
            })
        } else {
            let (code, message) =
                MOCK_FAILURES[rand::thread_rng().gen_range(0..MOCK_FAILURES.len())];
            Ok(FiscalResponse {
                status: WireStatus::NotOk,
                fiscal_receipt: None,
                error_code: Some(code.to_string()),
                error_message: Some(message.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FiscalRequest {
        FiscalRequest {
            order_id: 7,
            kiosk_id: "kiosk-1".to_string(),
            items: vec![FiscalItem {
                item_id: 10,
                item_description: "Борщ".to_string(),
                item_price_net: 250,
                item_price_gross: 300,
                item_vat_value: 50,
                quantity: 2,
            }],
            total_net: 500,
            total_vat: 100,
            total_gross: 600,
            payment_method: "CARD".to_string(),
        }
    }

    fn mock(success_rate: f64) -> MockFiscalGateway {
        MockFiscalGateway::new(GatewayConfig {
            mock_success_rate: success_rate,
            mock_delay_ms: 0,
            ..GatewayConfig::default()
        })
    }

    #[tokio::test]
    async fn test_mock_success_echoes_request() {
        let gateway = mock(1.0);
        let response = gateway.fiscalize(&request()).await.unwrap();

        assert!(response.is_ok());
        let receipt = response.fiscal_receipt.unwrap();
        assert_eq!(receipt.order_id, 7);
        assert_eq!(receipt.total_gross, 600);
        assert_eq!(receipt.items.len(), 1);
        assert_eq!(receipt.items[0].price_gross, 300);
        assert!(receipt.fiscal_document_number.starts_with("FD"));
    }

    #[tokio::test]
    async fn test_mock_failure_carries_error_code() {
        let gateway = mock(0.0);
        let response = gateway.fiscalize(&request()).await.unwrap();

        assert!(!response.is_ok());
        assert!(response.fiscal_receipt.is_none());
        assert!(response.error_code.is_some());
        assert!(response.error_message.is_some());
    }

    #[tokio::test]
    async fn test_mock_document_numbers_advance() {
        let gateway = mock(1.0);
        let first = gateway.fiscalize(&request()).await.unwrap();
        let second = gateway.fiscalize(&request()).await.unwrap();
        assert_ne!(
            first.fiscal_receipt.unwrap().fiscal_document_number,
            second.fiscal_receipt.unwrap().fiscal_document_number
        );
    }

    #[test]
    fn test_timeout_response_shape() {
        let response = FiscalResponse::timeout(30);
        assert!(!response.is_ok());
        assert_eq!(response.error_code.as_deref(), Some("TIMEOUT"));
    }
}
