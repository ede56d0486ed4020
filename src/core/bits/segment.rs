//! Bit range decomposition
//!
//! An inclusive bit range `[msb:lsb]` of a packet overlaps one or more
//! packet bytes. Each overlapped byte is described by a [`BitSegment`] that
//! says which of its 7 payload bits are in range and where they land in the
//! extracted value.

use super::BITS_PER_BYTE;

/// The part of a bit range that lives in a single packet byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSegment {
    /// Byte index within the packet buffer
    pub byte: usize,
    /// Right shift moving the in-range bits to the bottom of the byte
    pub shift_in_byte: u32,
    /// Mask applied after `shift_in_byte`
    pub mask: u8,
    /// Left shift positioning the masked bits in the result value
    pub shift_in_result: u32,
}

impl BitSegment {
    /// Bits of the packet byte covered by this segment
    pub fn byte_mask(&self) -> u8 {
        self.mask << self.shift_in_byte
    }

    /// Number of bits covered by this segment
    pub fn bit_count(&self) -> u32 {
        self.mask.count_ones()
    }
}

/// Enumerate the byte segments of the inclusive range `[msb:lsb]`, least
/// significant byte first.
///
/// The caller is responsible for `lsb <= msb`.
pub fn bit_segments(msb: usize, lsb: usize) -> impl Iterator<Item = BitSegment> {
    let first = lsb / BITS_PER_BYTE;
    let last = msb / BITS_PER_BYTE;
    let mut shift_in_result = 0u32;

    (first..=last).map(move |byte| {
        let start = if byte == first { lsb % BITS_PER_BYTE } else { 0 };
        let end = if byte == last {
            msb % BITS_PER_BYTE
        } else {
            BITS_PER_BYTE - 1
        };
        let bits = end - start + 1;

        let segment = BitSegment {
            byte,
            shift_in_byte: start as u32,
            mask: (1u8 << bits) - 1,
            shift_in_result,
        };
        shift_in_result += bits as u32;
        segment
    })
}
