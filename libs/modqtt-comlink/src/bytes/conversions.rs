//! Numeric type conversions between registers and native values
//!
//! Provides functions for converting between:
//! - u16 ↔ 16-character bit strings
//! - unsigned ↔ signed 16-bit two's complement
//! - Register arrays (u16[]) ↔ f32 / f64
//!
//! Integer inputs are taken as `i64` so that out-of-range values coming from
//! templates or tests are rejected instead of silently wrapped.

use super::byte_order::swap_register_bytes;
use super::ByteOrder;
use crate::error::{CodecError, Result};

// ============================================================================
// Range Checks
// ============================================================================

fn check_u16(value: i64) -> Result<u16> {
    u16::try_from(value).map_err(|_| CodecError::out_of_range(value, 0, i64::from(u16::MAX)))
}

fn check_i16(value: i64) -> Result<i16> {
    i16::try_from(value).map_err(|_| {
        CodecError::out_of_range(value, i64::from(i16::MIN), i64::from(i16::MAX))
    })
}

// ============================================================================
// Bit String Conversions
// ============================================================================

/// Format an unsigned 16-bit value as exactly 16 characters of '0'/'1', MSB first
pub fn u16_to_bit_string(value: i64) -> Result<String> {
    let value = check_u16(value)?;
    Ok(format!("{:016b}", value))
}

/// Parse a 16-character '0'/'1' string (MSB first) into a u16
pub fn bit_string_to_u16(bits: &str) -> Result<u16> {
    if bits.len() != 16 || !bits.bytes().all(|b| b == b'0' || b == b'1') {
        return Err(CodecError::invalid_bit_string(bits));
    }
    u16::from_str_radix(bits, 2).map_err(|_| CodecError::invalid_bit_string(bits))
}

// ============================================================================
// Signed / Unsigned 16-bit Conversions
// ============================================================================

/// Reinterpret an unsigned register value as two's complement
pub fn u16_to_i16(value: i64) -> Result<i16> {
    Ok(check_u16(value)? as i16)
}

/// Encode a signed value as its two's complement register value
pub fn i16_to_u16(value: i64) -> Result<u16> {
    Ok(check_i16(value)? as u16)
}

/// Decode a register as two's complement, after an optional byte swap
#[inline]
pub fn reg_to_i16(reg: u16, byte_swapped: bool) -> i16 {
    reg_to_u16(reg, byte_swapped) as i16
}

/// Decode a register as unsigned, after an optional byte swap
#[inline]
pub fn reg_to_u16(reg: u16, byte_swapped: bool) -> u16 {
    if byte_swapped {
        swap_register_bytes(reg)
    } else {
        reg
    }
}

// ============================================================================
// Register to Float Conversions
// ============================================================================

/// Convert 2 registers laid out in `order` to f32
pub fn regs_to_f32(regs: [u16; 2], order: ByteOrder) -> f32 {
    let [hi, lo] = order.to_canonical(regs);
    f32::from_bits((u32::from(hi) << 16) | u32::from(lo))
}

/// Convert 4 big-endian registers to f64
pub fn regs_to_f64(regs: [u16; 4]) -> f64 {
    let bits = regs
        .iter()
        .fold(0u64, |acc, reg| (acc << 16) | u64::from(*reg));
    f64::from_bits(bits)
}

/// Convert f32 to 2 registers in ABCD order
pub fn f32_to_regs(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

/// Convert f64 to 4 registers, most significant word first
pub fn f64_to_regs(value: f64) -> [u16; 4] {
    let bits = value.to_bits();
    [
        (bits >> 48) as u16,
        (bits >> 32) as u16,
        (bits >> 16) as u16,
        bits as u16,
    ]
}

/// Take the first `N` registers of a response slice
///
/// Fails when the slice is shorter than the value width.
pub fn regs_array<const N: usize>(words: &[u16]) -> Result<[u16; N]> {
    words
        .get(..N)
        .and_then(|head| head.try_into().ok())
        .ok_or_else(|| CodecError::insufficient_registers(N, words.len()))
}
