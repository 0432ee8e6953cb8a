//! POS payment terminal gateway
//!
//! The terminal drives the whole card interaction; one request covers the
//! session from amount display to authorization. Amounts are kopecks.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub kiosk_id: String,
    pub order_id: i64,
    /// Amount in kopecks
    pub sum: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentOutcome {
    Success,
    Declined,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment_id: i64,
    pub order_id: i64,
    pub session_id: String,
    pub status: PaymentOutcome,
    pub auth_code: Option<String>,
    pub rrn: Option<String>,
    pub transaction_id: String,
    pub terminal_id: String,
    pub merchant_id: String,
    pub response_code: String,
    pub response_message: String,
    /// Amount in kopecks
    pub amount: i64,
    pub currency_code: String,
    pub payment_date: String,
    pub completed_at: String,
    pub receipt_available: bool,
    /// Raw terminal response, when the acquirer passes it through
    pub field_90_raw: Option<String>,
    pub customer_receipt: Option<String>,
    pub merchant_receipt: Option<String>,
}

impl PaymentResponse {
    pub fn is_success(&self) -> bool {
        self.status == PaymentOutcome::Success
    }

    fn failed(order_id: i64, sum: i64, status: PaymentOutcome, code: &str, message: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            payment_id: 0,
            order_id,
            session_id: format!("SES_{}_FAILED", order_id),
            status,
            auth_code: None,
            rrn: None,
            transaction_id: "0".to_string(),
            terminal_id: String::new(),
            merchant_id: String::new(),
            response_code: code.to_string(),
            response_message: message.to_string(),
            amount: sum,
            currency_code: "643".to_string(),
            payment_date: now.clone(),
            completed_at: now,
            receipt_available: false,
            field_90_raw: None,
            customer_receipt: None,
            merchant_receipt: None,
        }
    }

    /// Synthetic response for an elapsed saga deadline.
    pub fn timeout(order_id: i64, sum: i64, seconds: u64) -> Self {
        Self::failed(
            order_id,
            sum,
            PaymentOutcome::Timeout,
            "TIMEOUT",
            &format!("Payment terminal timeout after {}s", seconds),
        )
    }
}

/// Payment terminal capability.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentResponse>;
}

/// HTTP client for the real terminal bridge / web emulator.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    fn name(&self) -> &'static str {
        "http-payment"
    }

    async fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentResponse> {
        let url = format!("{}/payment", self.config.base_url.trim_end_matches('/'));

        let mut http_request = self.client.post(&url).json(request);
        if let Some(api_key) = &self.config.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(PaymentResponse::timeout(
                    request.order_id,
                    request.sum,
                    self.config.timeout_seconds,
                ));
            }
            Err(e) => return Err(Error::Network(e.to_string())),
        };

        match response.status().as_u16() {
            200 => Ok(response.json().await?),
            503 => Ok(PaymentResponse::failed(
                request.order_id,
                request.sum,
                PaymentOutcome::Error,
                "503",
                "Service Unavailable",
            )),
            status => {
                let body = response.text().await.unwrap_or_default();
                Ok(PaymentResponse::failed(
                    request.order_id,
                    request.sum,
                    PaymentOutcome::Error,
                    &status.to_string(),
                    &format!("HTTP {}: {}", status, body),
                ))
            }
        }
    }
}

/// Mock terminal with configurable success rate and delay.
pub struct MockPaymentGateway {
    config: GatewayConfig,
    request_counter: AtomicU64,
}

// Failure table of the emulated acquirer
const MOCK_FAILURES: &[(&str, &str, PaymentOutcome)] = &[
    ("05", "Do not honor", PaymentOutcome::Declined),
    ("51", "Insufficient funds", PaymentOutcome::Declined),
    ("91", "Issuer or switch inoperative", PaymentOutcome::Error),
    ("96", "System malfunction", PaymentOutcome::Error),
    ("TIMEOUT", "Request timeout", PaymentOutcome::Timeout),
];

impl MockPaymentGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            request_counter: AtomicU64::new(0),
        }
    }

    fn customer_receipt(&self, request: &PaymentRequest) -> String {
        format!(
            "CUSTOMER RECEIPT\n================\nOrder: {}\nAmount: {:.2} RUB\nKiosk: {}\n================\nThank you for your purchase!",
            request.order_id,
            request.sum as f64 / 100.0,
            request.kiosk_id,
        )
    }

    fn merchant_receipt(&self, request: &PaymentRequest) -> String {
        format!(
            "MERCHANT RECEIPT\n================\nOrder: {}\nAmount: {:.2} RUB\nTerminal: {}\nKiosk: {}\n================",
            request.order_id,
            request.sum as f64 / 100.0,
            self.terminal_id(),
            request.kiosk_id,
        )
    }

    fn terminal_id(&self) -> String {
        self.config
            .terminal_id
            .clone()
            .unwrap_or_else(|| "00092240".to_string())
    }

    fn merchant_id(&self) -> String {
        self.config
            .merchant_id
            .clone()
            .unwrap_or_else(|| "KORDER_MERCHANT".to_string())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn name(&self) -> &'static str {
        "mock-payment"
    }

    async fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentResponse> {
        if self.config.mock_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.mock_delay_ms)).await;
        }

        let counter = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let is_success = rand::thread_rng().gen_bool(self.config.mock_success_rate);

        if is_success {
            let now = chrono::Utc::now().to_rfc3339();
            Ok(PaymentResponse {
                payment_id: counter as i64,
                order_id: request.order_id,
                session_id: format!("SES_{}_{}", request.order_id, counter),
                status: PaymentOutcome::Success,
                auth_code: Some(format!("{:06}", counter)),
                rrn: Some(format!("000010{:06}", counter)),
                transaction_id: format!("TXN_{}", uuid::Uuid::new_v4().simple()),
                terminal_id: self.terminal_id(),
                merchant_id: self.merchant_id(),
                response_code: "00".to_string(),
                response_message: "Approved".to_string(),
                amount: request.sum,
                currency_code: "643".to_string(),
                payment_date: now.clone(),
                completed_at: now,
                receipt_available: true,
                field_90_raw: None,
                customer_receipt: Some(self.customer_receipt(request)),
                merchant_receipt: Some(self.merchant_receipt(request)),
            })
        } else {
            let (code, message, outcome) =
                MOCK_FAILURES[rand::thread_rng().gen_range(0..MOCK_FAILURES.len())];
            Ok(PaymentResponse::failed(
                request.order_id,
                request.sum,
                outcome,
                code,
                message,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            kiosk_id: "kiosk-1".to_string(),
            order_id: 7,
            sum: 600,
        }
    }

    fn mock(success_rate: f64) -> MockPaymentGateway {
        MockPaymentGateway::new(GatewayConfig {
            mock_success_rate: success_rate,
            mock_delay_ms: 0,
            ..GatewayConfig::default()
        })
    }

    #[tokio::test]
    async fn test_mock_approval() {
        let gateway = mock(1.0);
        let response = gateway.process_payment(&request()).await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.amount, 600);
        assert_eq!(response.response_code, "00");
        assert!(response.transaction_id.starts_with("TXN_"));
        assert!(response.auth_code.is_some());
        assert!(response.rrn.is_some());
        assert!(response.customer_receipt.unwrap().contains("Order: 7"));
    }

    #[tokio::test]
    async fn test_mock_failure_has_no_auth_code() {
        let gateway = mock(0.0);
        let response = gateway.process_payment(&request()).await.unwrap();

        assert!(!response.is_success());
        assert!(response.auth_code.is_none());
        assert_eq!(response.payment_id, 0);
        assert_eq!(response.amount, 600);
    }

    #[tokio::test]
    async fn test_mock_sessions_are_unique() {
        let gateway = mock(1.0);
        let first = gateway.process_payment(&request()).await.unwrap();
        let second = gateway.process_payment(&request()).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert_ne!(first.transaction_id, second.transaction_id);
    }

    #[test]
    fn test_timeout_response_shape() {
        let response = PaymentResponse::timeout(7, 600, 180);
        assert_eq!(response.status, PaymentOutcome::Timeout);
        assert_eq!(response.response_code, "TIMEOUT");
        assert_eq!(response.amount, 600);
    }

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(
            serde_json::to_string(&PaymentOutcome::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentOutcome::Declined).unwrap(),
            "\"DECLINED\""
        );
    }
}
