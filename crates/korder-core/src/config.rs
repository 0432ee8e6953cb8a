use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for korder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub gateways: GatewaysConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from the environment: `KORDER_CONFIG` first, then
    /// default locations, then built-in defaults (all gateways mocked).
    pub fn from_env() -> Result<Self, crate::Error> {
        if let Ok(config_path) = std::env::var("KORDER_CONFIG") {
            return Self::load(&config_path);
        }

        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/korder/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.database.pool_size == 0 {
            return Err(Error::Config("Database pool size must be > 0".to_string()));
        }

        for (name, gateway) in [
            ("fiscal", &self.gateways.fiscal),
            ("payment", &self.gateways.payment),
            ("printer", &self.gateways.printer),
            ("kds", &self.gateways.kds),
        ] {
            if gateway.timeout_seconds == 0 {
                return Err(Error::Config(format!(
                    "Gateway {} timeout must be > 0",
                    name
                )));
            }
            if !(0.0..=1.0).contains(&gateway.mock_success_rate) {
                return Err(Error::Config(format!(
                    "Gateway {} mock success rate must be within [0, 1]",
                    name
                )));
            }
            if !gateway.mockup_mode && gateway.base_url.is_empty() {
                return Err(Error::Config(format!(
                    "Gateway {} base_url required when mockup_mode is off",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_name")]
    pub database: String,

    #[serde(default = "default_db_user")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            username: default_db_user(),
            password: String::new(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "korder".to_string()
}

fn default_db_user() -> String {
    "korder".to_string()
}

fn default_pool_size() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// HS256 secret used to verify kiosk and admin bearer tokens. Token
    /// issuance lives in the auth service, not here.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

/// Configuration for the four external gateways
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaysConfig {
    #[serde(default)]
    pub fiscal: GatewayConfig,

    #[serde(default)]
    pub payment: GatewayConfig,

    #[serde(default)]
    pub printer: GatewayConfig,

    #[serde(default)]
    pub kds: GatewayConfig,
}

/// Per-gateway connection settings. With `mockup_mode` on (the default), the
/// in-process mock variant is used and `base_url` is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub mockup_mode: bool,

    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub use_ssl: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Payment: acquiring identifiers sent with each request
    #[serde(default)]
    pub merchant_id: Option<String>,

    #[serde(default)]
    pub terminal_id: Option<String>,

    /// Printer: folder the file-based variant writes receipts into
    #[serde(default = "default_receipts_folder")]
    pub receipts_folder: String,

    /// Mock variant: probability of a successful response
    #[serde(default = "default_mock_success_rate")]
    pub mock_success_rate: f64,

    /// Mock variant: synthetic processing delay
    #[serde(default = "default_mock_delay_ms")]
    pub mock_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mockup_mode: true,
            base_url: String::new(),
            timeout_seconds: default_gateway_timeout(),
            use_ssl: false,
            max_retries: default_max_retries(),
            api_key: None,
            merchant_id: None,
            terminal_id: None,
            receipts_folder: default_receipts_folder(),
            mock_success_rate: default_mock_success_rate(),
            mock_delay_ms: default_mock_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_gateway_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    0
}

fn default_receipts_folder() -> String {
    "receipts".to_string()
}

fn default_mock_success_rate() -> f64 {
    1.0
}

fn default_mock_delay_ms() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.gateways.fiscal.mockup_mode);
        assert_eq!(config.gateways.payment.timeout_seconds, 30);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [gateways.payment]
            mockup_mode = false
            base_url = "http://terminal.local:8090"
            terminal_id = "00092240"
            merchant_id = "MERCHANT_1"
            timeout_seconds = 180
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(!config.gateways.payment.mockup_mode);
        assert_eq!(config.gateways.payment.timeout_seconds, 180);
        assert_eq!(
            config.gateways.payment.terminal_id.as_deref(),
            Some("00092240")
        );
        // Untouched sections fall back to defaults
        assert!(config.gateways.kds.mockup_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_live_gateway_without_url() {
        let config: Config = toml::from_str(
            r#"
            [gateways.fiscal]
            mockup_mode = false
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_success_rate() {
        let config: Config = toml::from_str(
            r#"
            [gateways.kds]
            mock_success_rate = 1.5
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
