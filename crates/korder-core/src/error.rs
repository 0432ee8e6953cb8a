use std::fmt;

/// Main error type for korder
#[derive(Debug)]
pub enum Error {
    /// Configuration errors
    Config(String),

    /// Database errors (SQLx wrapped)
    Database(sqlx::Error),

    /// HTTP/Network errors
    Network(String),

    /// Authentication/Authorization errors
    Unauthorized(String),

    /// Permission errors for an authenticated principal
    Forbidden(String),

    /// Validation errors (unknown item, insufficient stock, bad status string)
    Validation(String),

    /// Not found errors (missing order, item, FSM runtime)
    NotFound(String),

    /// Conflicting state (duplicate resource, status already applied)
    Conflict(String),

    /// External gateway failures, discriminated by kind
    Gateway(GatewayFailure),

    /// FSM event not valid in the current state
    InvalidTransition {
        state: String,
        event: String,
    },

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),

    /// IO errors
    Io(std::io::Error),

    /// Generic errors with description
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// How an external gateway call failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayFailure {
    #[error("declined ({code}): {message}")]
    Declined { code: String, message: String },

    #[error("error ({code}): {message}")]
    Error { code: String, message: String },

    #[error("{gateway} timed out after {seconds}s")]
    Timeout { gateway: String, seconds: u64 },

    #[error("{gateway} unavailable")]
    Unavailable { gateway: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Network(msg) => write!(f, "Network error: {}", msg),
            Error::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Error::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::Gateway(failure) => write!(f, "Gateway failure: {}", failure),
            Error::InvalidTransition { state, event } => {
                write!(f, "Invalid transition: {} + {}", state, event)
            }
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Internal(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

// Common error constructors
impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new conflict error
    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a new unauthorized error
    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        Error::Unauthorized(msg.into())
    }

    /// Create a new internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Error::Internal(msg.into())
    }

    /// Create a new network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        Error::Network(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::Validation(_) => 400,
            Error::InvalidTransition { .. } => 409,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Gateway(_) => 502,
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Network(_) => 503,
            Error::Internal(_) => 500,
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Unauthorized(_) => "auth",
            Error::Forbidden(_) => "auth",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Gateway(_) => "gateway",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Network(_) => "network",
            Error::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::validation("insufficient stock");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_gateway_failure_display() {
        let err = Error::Gateway(GatewayFailure::Timeout {
            gateway: "payment".to_string(),
            seconds: 180,
        });
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("payment timed out after 180s"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidTransition {
            state: "AWAITING_KDS".to_string(),
            event: "PAYMENT_SUCCEEDED".to_string(),
        };
        assert_eq!(err.category(), "invalid_transition");
        assert!(err.to_string().contains("AWAITING_KDS + PAYMENT_SUCCEEDED"));
    }
}
