//! Unified error handling for the modqtt gateway
//!
//! Every crate in the workspace either returns [`ModqttError`] directly or keeps a
//! domain-specific error type that implements [`ModqttErrorTrait`] and converts into
//! it at the binary boundary.

use thiserror::Error;

// ============================================================================
// ModqttError - Main error type
// ============================================================================

/// Main error type for the gateway
#[derive(Debug, Error)]
pub enum ModqttError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Modbus error: {0}")]
    Modbus(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    // ======================================
    // Validation Errors
    // ======================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {file}: {error}")]
    ParseError { file: String, error: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ModqttError
pub type ModqttResult<T> = Result<T, ModqttError>;

impl ModqttError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::ConnectionFailed { .. }
                | Self::Communication(_)
                | Self::Modbus(_)
                | Self::Mqtt(_)
        )
    }

    /// Whether this error must stop the process before any connection is attempted
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self.category(), ErrorCategory::Configuration)
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for ModqttError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for ModqttError {
    fn from(err: csv::Error) -> Self {
        Self::ParseError {
            file: "csv".to_string(),
            error: err.to_string(),
        }
    }
}

impl From<figment::Error> for ModqttError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<std::num::ParseIntError> for ModqttError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::Validation(format!("Invalid integer: {}", err))
    }
}

impl From<std::num::ParseFloatError> for ModqttError {
    fn from(err: std::num::ParseFloatError) -> Self {
        Self::Validation(format!("Invalid float: {}", err))
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::ModqttError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ModqttError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::ModqttError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ModqttError::Validation(format!($fmt, $($arg)*))
    };
}

// ============================================================================
// ModqttError implements ModqttErrorTrait
// ============================================================================

impl ModqttErrorTrait for ModqttError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",

            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Modbus(_) => "MODBUS_ERROR",
            Self::Mqtt(_) => "MQTT_ERROR",

            Self::Validation(_) => "VALIDATION_ERROR",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",

            Self::Io(_) => "IO_ERROR",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::ParseError { .. } => "PARSE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",

            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::ShutdownError(_) => "SHUTDOWN_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                ErrorCategory::Configuration
            },

            Self::Protocol { .. } | Self::Modbus(_) | Self::Mqtt(_) => ErrorCategory::Protocol,

            Self::ConnectionFailed { .. } => ErrorCategory::Connection,

            Self::Communication(_) => ErrorCategory::Network,

            Self::Timeout(_) => ErrorCategory::Timeout,

            Self::Validation(_) | Self::OutOfRange { .. } => ErrorCategory::Validation,

            Self::FileNotFound(_) => ErrorCategory::NotFound,

            Self::Io(_)
            | Self::ParseError { .. }
            | Self::Serialization(_)
            | Self::StartupFailed(_)
            | Self::ShutdownError(_)
            | Self::Internal(_) => ErrorCategory::Internal,

            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Timeout,
    Validation,
    NotFound,
    Protocol,
    Connection,
    Decode,
    Internal,
    Unknown,
}

/// Unified error capability trait
///
/// Domain error types (codec, gateway) keep their own variants and expose a
/// common interface through this trait.
pub trait ModqttErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Whether the failed operation may succeed if attempted again
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Connection
                | ErrorCategory::Protocol
        )
    }
}
