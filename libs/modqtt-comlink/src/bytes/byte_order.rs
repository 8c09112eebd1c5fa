//! Word and byte order of 32-bit values spread over two Modbus registers
//!
//! Devices disagree on how a 32-bit value `ABCD` (A = most significant byte) is
//! laid out across a register pair. `ByteOrder` names the wire layout and knows how
//! to restore canonical `[AB][CD]` order from it.

/// Wire layout of a 32-bit value across two registers
///
/// # Naming Convention
/// Uses ABCD notation where:
/// - A = Most significant byte (MSB)
/// - D = Least significant byte (LSB)
///
/// For the value `0x12345678`:
/// - `BigEndian (ABCD)`: registers `[0x1234, 0x5678]`
/// - `LittleEndianSwap (BADC)`: registers `[0x3412, 0x7856]`
/// - `BigEndianSwap (CDAB)`: registers `[0x5678, 0x1234]`
/// - `LittleEndian (DCBA)`: registers `[0x7856, 0x3412]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// `[AB][CD]`, plain IEEE-754 register order
    #[default]
    BigEndian,

    /// `[DC][BA]`, bytes swapped inside each register and registers swapped
    LittleEndian,

    /// `[CD][AB]`, registers swapped
    BigEndianSwap,

    /// `[BA][DC]`, bytes swapped inside each register
    LittleEndianSwap,
}

impl ByteOrder {
    /// Rearrange a register pair between this layout and canonical `[AB][CD]`
    ///
    /// Every transform is its own inverse, so the same call converts in both directions.
    pub fn to_canonical(&self, regs: [u16; 2]) -> [u16; 2] {
        match self {
            Self::BigEndian => regs,
            Self::LittleEndian => byte_word_swap_pair(regs),
            Self::BigEndianSwap => word_swap_pair(regs),
            Self::LittleEndianSwap => byte_swap_pair(regs),
        }
    }
}

/// Swap the two bytes of a single register: `[AB]` ↔ `[BA]`
#[inline]
pub fn swap_register_bytes(reg: u16) -> u16 {
    reg.swap_bytes()
}

/// Swap bytes inside each register of a pair: `[AB][CD]` ↔ `[BA][DC]`
#[inline]
pub fn byte_swap_pair(regs: [u16; 2]) -> [u16; 2] {
    [regs[0].swap_bytes(), regs[1].swap_bytes()]
}

/// Swap the registers of a pair: `[AB][CD]` ↔ `[CD][AB]`
#[inline]
pub fn word_swap_pair(regs: [u16; 2]) -> [u16; 2] {
    [regs[1], regs[0]]
}

/// Byte swap and word swap combined: `[AB][CD]` ↔ `[DC][BA]`
#[inline]
pub fn byte_word_swap_pair(regs: [u16; 2]) -> [u16; 2] {
    word_swap_pair(byte_swap_pair(regs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: [u16; 2] = [0x1234, 0x5678];

    #[test]
    fn test_swap_layouts() {
        assert_eq!(byte_swap_pair(CANONICAL), [0x3412, 0x7856]);
        assert_eq!(word_swap_pair(CANONICAL), [0x5678, 0x1234]);
        assert_eq!(byte_word_swap_pair(CANONICAL), [0x7856, 0x3412]);
        assert_eq!(swap_register_bytes(0x1234), 0x3412);
    }

    #[test]
    fn test_swaps_are_involutions() {
        let samples = [
            [0x0000, 0x0000],
            [0xFFFF, 0x0001],
            [0x1234, 0x5678],
            [0xDEAD, 0xBEEF],
            [0x00FF, 0xFF00],
        ];
        for regs in samples {
            assert_eq!(byte_swap_pair(byte_swap_pair(regs)), regs);
            assert_eq!(word_swap_pair(word_swap_pair(regs)), regs);
            assert_eq!(byte_word_swap_pair(byte_word_swap_pair(regs)), regs);
        }
        for reg in 0..=u16::MAX {
            assert_eq!(swap_register_bytes(swap_register_bytes(reg)), reg);
        }
    }

    #[test]
    fn test_to_canonical_restores_abcd() {
        assert_eq!(ByteOrder::BigEndian.to_canonical(CANONICAL), CANONICAL);
        assert_eq!(
            ByteOrder::LittleEndianSwap.to_canonical([0x3412, 0x7856]),
            CANONICAL
        );
        assert_eq!(
            ByteOrder::BigEndianSwap.to_canonical([0x5678, 0x1234]),
            CANONICAL
        );
        assert_eq!(
            ByteOrder::LittleEndian.to_canonical([0x7856, 0x3412]),
            CANONICAL
        );
    }

    #[test]
    fn test_default_is_plain_register_order() {
        assert_eq!(ByteOrder::default(), ByteOrder::BigEndian);
    }
}
