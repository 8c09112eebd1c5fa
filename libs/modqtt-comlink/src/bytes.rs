//! Binary data processing utilities
//!
//! Word order handling, bit extraction, and numeric conversions between
//! Modbus registers and native values.
//!
//! # Design Principles
//!
//! - **Stateless**: every function is a pure transform
//! - **Type-safe**: `ByteOrder` enum selects the wire layout of 32-bit values
//! - **Checked**: integer inputs outside the register range are rejected, not wrapped

pub mod bit_ops;
pub mod byte_order;
pub mod conversions;

pub use bit_ops::*;
pub use byte_order::ByteOrder;
pub use conversions::*;
