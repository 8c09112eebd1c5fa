//! Error handling for the gateway service
//!
//! `GatewayError` covers everything from configuration loading to broker delivery and
//! converts into `ModqttError` at the binary boundary.

use errors::{ErrorCategory, ModqttError, ModqttErrorTrait};
use modqtt_comlink::CodecError;
use thiserror::Error;

/// Gateway Service Error Type
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Site configuration or credential errors (fatal at startup)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Template file could not be read at all
    #[error("Template error: {0}")]
    TemplateError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Modbus request failed (exception response, malformed reply)
    #[error("Modbus error: {0}")]
    ModbusError(String),

    /// Broker session or publish errors
    #[error("MQTT error: {0}")]
    MqttError(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Register words could not be decoded into a value
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the gateway service
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::ConfigError(msg.into())
    }

    pub fn template(msg: impl Into<String>) -> Self {
        GatewayError::TemplateError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        GatewayError::IoError(msg.into())
    }

    pub fn modbus(msg: impl Into<String>) -> Self {
        GatewayError::ModbusError(msg.into())
    }

    pub fn mqtt(msg: impl Into<String>) -> Self {
        GatewayError::MqttError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        GatewayError::ConnectionError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        GatewayError::TimeoutError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        GatewayError::DecodeError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::InternalError(msg.into())
    }

    pub fn not_connected() -> Self {
        GatewayError::ConnectionError("Not connected".to_string())
    }

    /// Whether the device/broker link should be torn down and re-established
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectionError(_)
                | GatewayError::IoError(_)
                | GatewayError::TimeoutError(_)
        )
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<csv::Error> for GatewayError {
    fn from(err: csv::Error) -> Self {
        GatewayError::TemplateError(format!("CSV: {err}"))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::InternalError(format!("JSON: {err}"))
    }
}

impl From<CodecError> for GatewayError {
    fn from(err: CodecError) -> Self {
        GatewayError::DecodeError(err.to_string())
    }
}

impl From<ModqttError> for GatewayError {
    fn from(err: ModqttError) -> Self {
        match err {
            ModqttError::FileNotFound(path) => {
                GatewayError::ConfigError(format!("File not found: {path}"))
            },
            other if other.is_fatal_at_startup() => GatewayError::ConfigError(other.to_string()),
            ModqttError::ParseError { file, error } => {
                GatewayError::ConfigError(format!("{file}: {error}"))
            },
            other => GatewayError::InternalError(other.to_string()),
        }
    }
}

impl From<rumqttc::ClientError> for GatewayError {
    fn from(err: rumqttc::ClientError) -> Self {
        GatewayError::MqttError(err.to_string())
    }
}

// ============================================================================
// Conversion from GatewayError to ModqttError for the binary boundary
// ============================================================================

impl From<GatewayError> for ModqttError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ConfigError(msg) => ModqttError::Configuration(msg),
            GatewayError::TemplateError(msg) => ModqttError::ParseError {
                file: "template".to_string(),
                error: msg,
            },
            GatewayError::IoError(msg) => ModqttError::Io(std::io::Error::other(msg)),
            GatewayError::ModbusError(msg) => ModqttError::Modbus(msg),
            GatewayError::MqttError(msg) => ModqttError::Mqtt(msg),
            GatewayError::ConnectionError(msg) => ModqttError::Communication(msg),
            GatewayError::TimeoutError(msg) => ModqttError::Timeout(msg),
            GatewayError::DecodeError(msg) => ModqttError::Protocol {
                protocol: "modbus".to_string(),
                message: msg,
            },
            GatewayError::InternalError(msg) => ModqttError::Internal(msg),
        }
    }
}

// ============================================================================
// GatewayError implements ModqttErrorTrait
// ============================================================================

impl ModqttErrorTrait for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "GATEWAY_CONFIG_ERROR",
            Self::TemplateError(_) => "GATEWAY_TEMPLATE_ERROR",
            Self::IoError(_) => "GATEWAY_IO_ERROR",
            Self::ModbusError(_) => "GATEWAY_MODBUS_ERROR",
            Self::MqttError(_) => "GATEWAY_MQTT_ERROR",
            Self::ConnectionError(_) => "GATEWAY_CONNECTION_ERROR",
            Self::TimeoutError(_) => "GATEWAY_TIMEOUT",
            Self::DecodeError(_) => "GATEWAY_DECODE_ERROR",
            Self::InternalError(_) => "GATEWAY_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::TemplateError(_) => ErrorCategory::Validation,
            Self::IoError(_) => ErrorCategory::Network,
            Self::ModbusError(_) | Self::MqttError(_) => ErrorCategory::Protocol,
            Self::ConnectionError(_) => ErrorCategory::Connection,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::DecodeError(_) => ErrorCategory::Decode,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }
}
