//! Modqtt Communication Link Library
//!
//! Pure register codec used by the gateway poll engine.
//!
//! # Architecture
//!
//! - **Bytes Utilities**: word/byte order transforms, bit operations, integer and
//!   IEEE-754 conversions between Modbus registers and native values
//! - **Errors**: `CodecError` for rejected inputs
//!
//! Nothing in this crate performs I/O or holds state.

pub mod bytes;
pub mod error;

// Re-export core types
pub use bytes::ByteOrder;
pub use error::{CodecError, Result};
