//! Receipt printer gateway
//!
//! The default variant is file-based: it renders a POS slip into the
//! configured receipts folder, which is what the kiosk deployments run with
//! when no physical printer is attached.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReceiptType {
    Customer,
    Merchant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterRequest {
    pub order_id: i64,
    pub kiosk_id: String,
    /// Payment response data rendered onto the slip
    pub payment_data: serde_json::Value,
    pub receipt_type: ReceiptType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrinterOutcome {
    Success,
    Failed,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterResponse {
    pub status: PrinterOutcome,
    pub receipt_file_path: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl PrinterResponse {
    pub fn is_success(&self) -> bool {
        self.status == PrinterOutcome::Success
    }

    /// Synthetic response for an elapsed saga deadline.
    pub fn timeout(seconds: u64) -> Self {
        Self {
            status: PrinterOutcome::Timeout,
            receipt_file_path: None,
            error_code: Some("TIMEOUT".to_string()),
            error_message: Some(format!("Printer timeout after {}s", seconds)),
        }
    }
}

/// Receipt printer capability.
#[async_trait]
pub trait PrinterGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn print_receipt(&self, request: &PrinterRequest) -> Result<PrinterResponse>;
}

/// HTTP client for a networked printer bridge.
pub struct HttpPrinterGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpPrinterGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl PrinterGateway for HttpPrinterGateway {
    fn name(&self) -> &'static str {
        "http-printer"
    }

    async fn print_receipt(&self, request: &PrinterRequest) -> Result<PrinterResponse> {
        let url = format!("{}/print", self.config.base_url.trim_end_matches('/'));

        let response = match self.client.post(&url).json(request).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(PrinterResponse::timeout(self.config.timeout_seconds));
            }
            Err(e) => return Err(Error::Network(e.to_string())),
        };

        if !response.status().is_success() {
            let status = response.status();
            return Ok(PrinterResponse {
                status: PrinterOutcome::Error,
                receipt_file_path: None,
                error_code: Some(status.as_u16().to_string()),
                error_message: Some(format!("HTTP {}", status)),
            });
        }

        Ok(response.json().await?)
    }
}

/// File-based printer: renders a POS slip into the receipts folder.
pub struct FilePrinterGateway {
    config: GatewayConfig,
    receipt_counter: AtomicU64,
}

// Failure table of the emulated printer
const MOCK_FAILURES: &[(&str, &str, PrinterOutcome)] = &[
    ("PAPER_JAM", "Printer paper jam", PrinterOutcome::Failed),
    ("OUT_OF_PAPER", "Printer out of paper", PrinterOutcome::Failed),
    ("PRINTER_OFFLINE", "Printer offline", PrinterOutcome::Error),
    ("TIMEOUT", "Printer timeout", PrinterOutcome::Timeout),
];

impl FilePrinterGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            receipt_counter: AtomicU64::new(0),
        }
    }

    fn render_slip(&self, request: &PrinterRequest, check_number: u64) -> String {
        let payment = &request.payment_data;
        let transaction_id = payment
            .get("transaction_id")
            .and_then(|v| v.as_str())
            .unwrap_or("TXN_UNKNOWN");
        let auth_code = payment
            .get("auth_code")
            .and_then(|v| v.as_str())
            .unwrap_or("------");
        let rrn = payment.get("rrn").and_then(|v| v.as_str()).unwrap_or("------------");
        let terminal_id = payment
            .get("terminal_id")
            .and_then(|v| v.as_str())
            .unwrap_or("00000000");
        let amount = payment.get("amount").and_then(|v| v.as_i64()).unwrap_or(0);
        let now = chrono::Utc::now();

        format!(
            "================================\n\
             POS-Universal\n\
             ТЕРМИНАЛ №:             {terminal}\n\
             ДАТА {date}     ВРЕМЯ {time}\n\
             ОПЛАТА ПОКУПКИ\n\
             ПАКЕТ:0000            ЧЕК:{check:04}\n\
             RRN:{rrn} КОД АВТ.:{auth}\n\
             ИТОГО                 {total:.2} RUB\n\
             КОД ОТВЕТА                    00\n\
             ОДОБРЕНО\n\
             ================================\n\
             Order ID: {order}\n\
             Kiosk: {kiosk}\n\
             Transaction: {txn}\n",
            terminal = terminal_id,
            date = now.format("%d/%m/%y"),
            time = now.format("%H:%M:%S"),
            check = check_number,
            rrn = rrn,
            auth = auth_code,
            total = amount as f64 / 100.0,
            order = request.order_id,
            kiosk = request.kiosk_id,
            txn = transaction_id,
        )
    }
}

#[async_trait]
impl PrinterGateway for FilePrinterGateway {
    fn name(&self) -> &'static str {
        "file-printer"
    }

    async fn print_receipt(&self, request: &PrinterRequest) -> Result<PrinterResponse> {
        if self.config.mock_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.mock_delay_ms)).await;
        }

        let counter = self.receipt_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let is_success = rand::thread_rng().gen_bool(self.config.mock_success_rate);

        if !is_success {
            let (code, message, outcome) =
                MOCK_FAILURES[rand::thread_rng().gen_range(0..MOCK_FAILURES.len())];
            return Ok(PrinterResponse {
                status: outcome,
                receipt_file_path: None,
                error_code: Some(code.to_string()),
                error_message: Some(message.to_string()),
            });
        }

        let folder = PathBuf::from(&self.config.receipts_folder);
        tokio::fs::create_dir_all(&folder).await?;

        let filename = format!(
            "receipt_order_{}_{}.txt",
            request.order_id,
            chrono::Utc::now().format("%Y%m%d_%H%M%S%3f")
        );
        let path = folder.join(filename);
        let slip = self.render_slip(request, counter);

        match tokio::fs::write(&path, slip).await {
            Ok(()) => Ok(PrinterResponse {
                status: PrinterOutcome::Success,
                receipt_file_path: Some(path.to_string_lossy().into_owned()),
                error_code: None,
                error_message: None,
            }),
            Err(e) => Ok(PrinterResponse {
                status: PrinterOutcome::Error,
                receipt_file_path: None,
                error_code: Some("FILE_WRITE_ERROR".to_string()),
                error_message: Some(format!("Failed to write receipt file: {}", e)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> PrinterRequest {
        PrinterRequest {
            order_id: 7,
            kiosk_id: "kiosk-1".to_string(),
            payment_data: json!({
                "transaction_id": "TXN_AB12CD34",
                "auth_code": "000001",
                "rrn": "000010000001",
                "terminal_id": "00092240",
                "amount": 600,
            }),
            receipt_type: ReceiptType::Customer,
        }
    }

    #[tokio::test]
    async fn test_file_printer_writes_slip() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FilePrinterGateway::new(GatewayConfig {
            receipts_folder: dir.path().to_string_lossy().into_owned(),
            mock_success_rate: 1.0,
            mock_delay_ms: 0,
            ..GatewayConfig::default()
        });

        let response = gateway.print_receipt(&request()).await.unwrap();
        assert!(response.is_success());

        let path = response.receipt_file_path.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Order ID: 7"));
        assert!(contents.contains("TXN_AB12CD34"));
        assert!(contents.contains("6.00 RUB"));
    }

    #[tokio::test]
    async fn test_file_printer_failure() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FilePrinterGateway::new(GatewayConfig {
            receipts_folder: dir.path().to_string_lossy().into_owned(),
            mock_success_rate: 0.0,
            mock_delay_ms: 0,
            ..GatewayConfig::default()
        });

        let response = gateway.print_receipt(&request()).await.unwrap();
        assert!(!response.is_success());
        assert!(response.receipt_file_path.is_none());
        assert!(response.error_code.is_some());
        // Nothing was written
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_receipt_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReceiptType::Customer).unwrap(),
            "\"CUSTOMER\""
        );
        assert_eq!(
            serde_json::to_string(&ReceiptType::Merchant).unwrap(),
            "\"MERCHANT\""
        );
    }
}
