//! Fixed-width bit packets
//!
//! A [`BitModel`] holds a register image exactly as it travels over the
//! serial link:
//!
//! - byte 0 has the high bit set (frame-start marker) and carries bits 6..0
//! - every following byte has the high bit clear and carries the next 7 bits
//! - bits above the declared width are zero
//!
//! So byte 0 is `data[6:0]`, byte 1 is `data[13:7]` and so on.

mod segment;

pub use segment::{bit_segments, BitSegment};

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Frame-start marker carried by the first byte of every packet
pub const START_MARKER: u8 = 0x80;

/// Payload bits of a packet byte
pub const PAYLOAD_MASK: u8 = 0x7F;

/// Payload bits per packet byte
pub const BITS_PER_BYTE: usize = 7;

/// Widest range that can be read or written as an integer
pub const MAX_VALUE_BITS: usize = 64;

/// Bit model errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitModelError {
    /// Range outside the packet, inverted, or too wide for an integer value
    #[error("Invalid bit range [{msb}:{lsb}] for {width} bit packet")]
    Range {
        /// Most significant bit
        msb: usize,
        /// Least significant bit
        lsb: usize,
        /// Packet width
        width: usize,
    },

    /// Bit string or byte buffer of the wrong length
    #[error("Bit count mismatch (expected {expected}, not {actual})")]
    Length {
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Bit string contains something other than `0` or `1`
    #[error("Invalid bit character '{0}'")]
    InvalidDigit(char),
}

/// Number of packet bytes needed to carry `width` bits
pub fn byte_count(width: usize) -> usize {
    width.div_ceil(BITS_PER_BYTE)
}

/// A fixed-width bit vector in wire format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitModel {
    width: usize,
    buffer: Vec<u8>,
}

impl BitModel {
    /// Create an all-zero packet of `width` bits
    pub fn new(width: usize) -> Self {
        let mut buffer = vec![0u8; byte_count(width)];
        if let Some(first) = buffer.first_mut() {
            *first = START_MARKER;
        }
        Self { width, buffer }
    }

    /// Packet width in bits
    pub fn width(&self) -> usize {
        self.width
    }

    /// Packet length in bytes
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Replace the packet contents with wire bytes of the same length.
    ///
    /// Framing bits are normalised: the start marker is forced on byte 0,
    /// cleared everywhere else, and bits above the width are dropped.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), BitModelError> {
        if bytes.len() != self.buffer.len() {
            return Err(BitModelError::Length {
                expected: self.buffer.len(),
                actual: bytes.len(),
            });
        }
        self.buffer.copy_from_slice(bytes);
        self.normalize();
        Ok(())
    }

    /// Exchange the backing buffer with `other` without copying.
    ///
    /// `other` must hold a complete packet of the same length.
    pub(crate) fn swap_buffer(&mut self, other: &mut Vec<u8>) {
        debug_assert_eq!(other.len(), self.buffer.len());
        std::mem::swap(&mut self.buffer, other);
        self.normalize();
    }

    fn normalize(&mut self) {
        let Some((first, rest)) = self.buffer.split_first_mut() else {
            return;
        };
        *first |= START_MARKER;
        for byte in rest.iter_mut() {
            *byte &= PAYLOAD_MASK;
        }

        let used = self.width % BITS_PER_BYTE;
        let single = self.buffer.len() == 1;
        if used != 0 {
            if let Some(top) = self.buffer.last_mut() {
                let keep = (1u8 << used) - 1;
                *top &= keep | if single { START_MARKER } else { 0 };
            }
        }
    }

    fn check_range(&self, msb: usize, lsb: usize) -> Result<(), BitModelError> {
        if lsb > msb || msb >= self.width {
            return Err(BitModelError::Range {
                msb,
                lsb,
                width: self.width,
            });
        }
        Ok(())
    }

    fn check_value_range(&self, msb: usize, lsb: usize) -> Result<(), BitModelError> {
        self.check_range(msb, lsb)?;
        if msb - lsb + 1 > MAX_VALUE_BITS {
            return Err(BitModelError::Range {
                msb,
                lsb,
                width: self.width,
            });
        }
        Ok(())
    }

    /// Read the inclusive range `[msb:lsb]` as an unsigned value
    pub fn get(&self, msb: usize, lsb: usize) -> Result<u64, BitModelError> {
        self.check_value_range(msb, lsb)?;
        let segments: Vec<BitSegment> = bit_segments(msb, lsb).collect();
        Ok(self.extract(&segments))
    }

    /// Write `value` into the inclusive range `[msb:lsb]`.
    ///
    /// Bits of `value` above the range width are ignored.
    pub fn set(&mut self, msb: usize, lsb: usize, value: u64) -> Result<(), BitModelError> {
        self.check_value_range(msb, lsb)?;
        let segments: Vec<BitSegment> = bit_segments(msb, lsb).collect();
        self.insert(&segments, value);
        Ok(())
    }

    /// Extract a value using precomputed segments
    pub fn extract(&self, segments: &[BitSegment]) -> u64 {
        segments.iter().fold(0u64, |acc, seg| {
            let bits = (self.buffer[seg.byte] >> seg.shift_in_byte) & seg.mask;
            acc | (u64::from(bits) << seg.shift_in_result)
        })
    }

    /// Insert a value using precomputed segments
    pub fn insert(&mut self, segments: &[BitSegment], value: u64) {
        for seg in segments {
            let bits = ((value >> seg.shift_in_result) as u8 & seg.mask) << seg.shift_in_byte;
            let old = self.buffer[seg.byte] & !seg.byte_mask();
            self.buffer[seg.byte] = old | bits;
        }
        if let Some(first) = self.buffer.first_mut() {
            *first |= START_MARKER;
        }
    }

    fn bit(&self, index: usize) -> bool {
        (self.buffer[index / BITS_PER_BYTE] >> (index % BITS_PER_BYTE)) & 1 != 0
    }

    fn set_bit(&mut self, index: usize, on: bool) {
        let byte = &mut self.buffer[index / BITS_PER_BYTE];
        let mask = 1u8 << (index % BITS_PER_BYTE);
        if on {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }

    /// Read `[msb:lsb]` as an MSB-first bit string of any width
    pub fn get_bits(&self, msb: usize, lsb: usize) -> Result<String, BitModelError> {
        self.check_range(msb, lsb)?;
        Ok((lsb..=msb)
            .rev()
            .map(|i| if self.bit(i) { '1' } else { '0' })
            .collect())
    }

    /// Write an MSB-first bit string into `[msb:lsb]`
    pub fn set_bits(&mut self, msb: usize, lsb: usize, bits: &str) -> Result<(), BitModelError> {
        self.check_range(msb, lsb)?;
        let expected = msb - lsb + 1;
        let digits = parse_bits(bits)?;
        if digits.len() != expected {
            return Err(BitModelError::Length {
                expected,
                actual: digits.len(),
            });
        }
        for (offset, on) in digits.into_iter().rev().enumerate() {
            self.set_bit(lsb + offset, on);
        }
        Ok(())
    }

    /// Replace the whole packet from its canonical bit string
    pub fn set_string(&mut self, bits: &str) -> Result<(), BitModelError> {
        let actual = bits.chars().count();
        if actual != self.width {
            return Err(BitModelError::Length {
                expected: self.width,
                actual,
            });
        }
        if self.width == 0 {
            return Ok(());
        }
        self.set_bits(self.width - 1, 0, bits)
    }
}

fn parse_bits(bits: &str) -> Result<Vec<bool>, BitModelError> {
    bits.chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(BitModelError::InvalidDigit(other)),
        })
        .collect()
}

impl fmt::Display for BitModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.width).rev() {
            f.write_str(if self.bit(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for BitModel {
    type Err = BitModelError;

    /// Build a packet whose width is the length of the bit string
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut model = Self::new(s.chars().count());
        model.set_string(s)?;
        Ok(model)
    }
}
