//! Kitchen display system gateway
//!
//! Dispatches an accepted order to the kitchen. Fail-fast contract: either
//! the kitchen confirms with a ticket id or the order counts as not sent.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::WireStatus;
use crate::config::GatewayConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdsOrderItem {
    pub item_id: i64,
    pub description: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdsRequest {
    pub order_id: i64,
    pub kiosk_id: String,
    pub items: Vec<KdsOrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdsResponse {
    pub status: WireStatus,
    pub kds_ticket_id: Option<String>,
    /// ISO-8601
    pub received_at: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl KdsResponse {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Synthetic response for an elapsed saga deadline.
    pub fn timeout(seconds: u64) -> Self {
        Self {
            status: WireStatus::NotOk,
            kds_ticket_id: None,
            received_at: None,
            error_code: Some("TIMEOUT".to_string()),
            error_message: Some(format!("Kitchen system timeout after {}s", seconds)),
        }
    }
}

/// Kitchen display system capability.
#[async_trait]
pub trait KdsGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_order(&self, request: &KdsRequest) -> Result<KdsResponse>;
}

/// HTTP client for the real KDS / web emulator.
pub struct HttpKdsGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpKdsGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl KdsGateway for HttpKdsGateway {
    fn name(&self) -> &'static str {
        "http-kds"
    }

    async fn send_order(&self, request: &KdsRequest) -> Result<KdsResponse> {
        let url = format!("{}/kds", self.config.base_url.trim_end_matches('/'));

        let mut http_request = self.client.post(&url).json(request);
        if let Some(api_key) = &self.config.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(KdsResponse::timeout(self.config.timeout_seconds));
            }
            Err(e) => return Err(Error::Network(e.to_string())),
        };

        if !response.status().is_success() {
            let status = response.status();
            return Ok(KdsResponse {
                status: WireStatus::NotOk,
                kds_ticket_id: None,
                received_at: None,
                error_code: Some(status.as_u16().to_string()),
                error_message: Some(format!("HTTP {}", status)),
            });
        }

        Ok(response.json().await?)
    }
}

/// Mock kitchen with configurable success rate and delay.
pub struct MockKdsGateway {
    config: GatewayConfig,
    ticket_counter: AtomicU64,
}

// Failure table of the emulated kitchen
const MOCK_FAILURES: &[(&str, &str)] = &[
    ("01", "Kitchen system offline"),
    ("02", "Invalid order data"),
    ("TIMEOUT", "Kitchen system timeout"),
    ("NO_RESP", "No response from kitchen"),
];

impl MockKdsGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            ticket_counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl KdsGateway for MockKdsGateway {
    fn name(&self) -> &'static str {
        "mock-kds"
    }

    async fn send_order(&self, request: &KdsRequest) -> Result<KdsResponse> {
        if self.config.mock_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.mock_delay_ms)).await;
        }

        if request.items.is_empty() {
            return Ok(KdsResponse {
                status: WireStatus::NotOk,
                kds_ticket_id: None,
                received_at: None,
                error_code: Some("02".to_string()),
                error_message: Some("Invalid order data".to_string()),
            });
        }

        let counter = self.ticket_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let is_success = rand::thread_rng().gen_bool(self.config.mock_success_rate);

        if is_success {
            Ok(KdsResponse {
                status: WireStatus::Ok,
                kds_ticket_id: Some(format!("KDS{:04}", counter)),
                received_at: Some(chrono::Utc::now().to_rfc3339()),
                error_code: None,
                error_message: None,
            })
        } else {
            let (code, message) =
                MOCK_FAILURES[rand::thread_rng().gen_range(0..MOCK_FAILURES.len())];
            Ok(KdsResponse {
                status: WireStatus::NotOk,
                kds_ticket_id: None,
                received_at: None,
                error_code: Some(code.to_string()),
                error_message: Some(message.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> KdsRequest {
        KdsRequest {
            order_id: 7,
            kiosk_id: "kiosk-1".to_string(),
            items: vec![KdsOrderItem {
                item_id: 10,
                description: "Борщ".to_string(),
                quantity: 2,
            }],
        }
    }

    fn mock(success_rate: f64) -> MockKdsGateway {
        MockKdsGateway::new(GatewayConfig {
            mock_success_rate: success_rate,
            mock_delay_ms: 0,
            ..GatewayConfig::default()
        })
    }

    #[tokio::test]
    async fn test_mock_confirmation() {
        let gateway = mock(1.0);
        let response = gateway.send_order(&request()).await.unwrap();

        assert!(response.is_ok());
        assert!(response.kds_ticket_id.unwrap().starts_with("KDS"));
        assert!(response.received_at.is_some());
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let gateway = mock(0.0);
        let response = gateway.send_order(&request()).await.unwrap();

        assert!(!response.is_ok());
        assert!(response.kds_ticket_id.is_none());
        assert!(response.error_code.is_some());
    }

    #[tokio::test]
    async fn test_empty_order_rejected() {
        let gateway = mock(1.0);
        let response = gateway
            .send_order(&KdsRequest {
                order_id: 7,
                kiosk_id: "kiosk-1".to_string(),
                items: vec![],
            })
            .await
            .unwrap();

        assert!(!response.is_ok());
        assert_eq!(response.error_code.as_deref(), Some("02"));
    }
}
