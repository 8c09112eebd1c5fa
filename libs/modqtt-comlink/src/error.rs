//! Codec Error Types

use errors::{ErrorCategory, ModqttErrorTrait};
use thiserror::Error;

/// Result type for modqtt-comlink operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Register codec errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Integer input outside the accepted range
    #[error("Value {value} out of range [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },

    /// Bit string that is not exactly 16 characters of '0'/'1'
    #[error("Invalid bit string: {0:?}")]
    InvalidBitString(String),

    /// Fewer registers than the value width
    #[error("Insufficient registers: expected {expected}, got {actual}")]
    InsufficientRegisters { expected: usize, actual: usize },
}

impl CodecError {
    pub fn out_of_range(value: i64, min: i64, max: i64) -> Self {
        CodecError::OutOfRange { value, min, max }
    }

    pub fn invalid_bit_string(input: impl Into<String>) -> Self {
        CodecError::InvalidBitString(input.into())
    }

    pub fn insufficient_registers(expected: usize, actual: usize) -> Self {
        CodecError::InsufficientRegisters { expected, actual }
    }
}

impl ModqttErrorTrait for CodecError {
    fn error_code(&self) -> &'static str {
        match self {
            CodecError::OutOfRange { .. } => "CODEC_OUT_OF_RANGE",
            CodecError::InvalidBitString(_) => "CODEC_INVALID_BIT_STRING",
            CodecError::InsufficientRegisters { .. } => "CODEC_INSUFFICIENT_REGISTERS",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            CodecError::OutOfRange { .. } | CodecError::InvalidBitString(_) => {
                ErrorCategory::Validation
            },
            CodecError::InsufficientRegisters { .. } => ErrorCategory::Decode,
        }
    }
}

impl From<CodecError> for errors::ModqttError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::OutOfRange { value, min, max } => errors::ModqttError::OutOfRange {
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            },
            other => errors::ModqttError::Validation(other.to_string()),
        }
    }
}
