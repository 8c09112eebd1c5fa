//! Bit-level operations on register values
//!
//! Bit index 0 is the least significant bit of the register.

/// Extract single bit from u16 value
#[inline]
pub fn extract_bit_u16(value: u16, bit_index: u8) -> bool {
    debug_assert!(bit_index < 16, "Bit index out of range: {}", bit_index);
    (value & (1 << bit_index)) != 0
}

/// Split a register into its 16 bits, index 0 = LSB
pub fn unpack_bits(value: u16) -> [bool; 16] {
    let mut bits = [false; 16];
    for (index, bit) in bits.iter_mut().enumerate() {
        *bit = extract_bit_u16(value, index as u8);
    }
    bits
}
