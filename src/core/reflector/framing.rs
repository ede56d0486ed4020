//! Inbound packet reassembly
//!
//! Bytes arrive as an unframed stream. A byte with the high bit set always
//! starts a new packet, dropping whatever partial packet was in progress.
//! Bytes without it are payload continuation, or noise if no start has been
//! seen yet.

use crate::core::bits::{BitModel, START_MARKER};

/// Reassembly state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Waiting for a start-marked byte
    AwaitingStart,
    /// Collecting a packet; holds the next write offset
    Accumulating(usize),
}

/// Reassembles packets into a scratch buffer
#[derive(Debug)]
pub struct FrameAssembler {
    scratch: Vec<u8>,
    state: FrameState,
    frames: u64,
    discarded: u64,
}

impl FrameAssembler {
    /// Assembler for packets of `byte_len` bytes
    pub fn new(byte_len: usize) -> Self {
        Self {
            scratch: vec![0u8; byte_len],
            state: FrameState::AwaitingStart,
            frames: 0,
            discarded: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Completed packets so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes dropped while waiting for a start marker
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Feed one byte; returns true when the scratch buffer holds a
    /// complete packet.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.scratch.is_empty() {
            return false;
        }

        let offset = if byte & START_MARKER != 0 {
            0
        } else {
            match self.state {
                FrameState::AwaitingStart => {
                    self.discarded += 1;
                    return false;
                }
                FrameState::Accumulating(offset) => offset,
            }
        };

        self.scratch[offset] = byte;
        if offset + 1 == self.scratch.len() {
            self.state = FrameState::AwaitingStart;
            self.frames += 1;
            true
        } else {
            self.state = FrameState::Accumulating(offset + 1);
            false
        }
    }

    /// Hand the completed packet to `model` by swapping buffers; the
    /// model's previous buffer becomes the next scratch buffer.
    pub fn swap_into(&mut self, model: &mut BitModel) {
        model.swap_buffer(&mut self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(asm: &mut FrameAssembler, model: &mut BitModel, bytes: &[u8]) -> usize {
        let mut complete = 0;
        for &b in bytes {
            if asm.push(b) {
                asm.swap_into(model);
                complete += 1;
            }
        }
        complete
    }

    #[test]
    fn test_complete_packet() {
        let mut model = BitModel::new(16);
        let mut asm = FrameAssembler::new(model.byte_len());

        assert_eq!(feed(&mut asm, &mut model, &[0x81, 0x02, 0x03]), 1);
        assert_eq!(model.as_bytes(), &[0x81, 0x02, 0x03]);
        assert_eq!(model.get(15, 0).unwrap(), 1 | (2 << 7) | (3 << 14));
        assert_eq!(asm.state(), FrameState::AwaitingStart);
    }

    #[test]
    fn test_noise_before_start_is_discarded() {
        let mut model = BitModel::new(14);
        let mut asm = FrameAssembler::new(model.byte_len());

        assert_eq!(feed(&mut asm, &mut model, &[0x11, 0x22, 0x7F, 0x85, 0x0A]), 1);
        assert_eq!(asm.discarded(), 3);
        assert_eq!(model.get(13, 0).unwrap(), 5 | (0x0A << 7));
    }

    #[test]
    fn test_new_start_abandons_partial_packet() {
        let mut model = BitModel::new(21);
        let mut asm = FrameAssembler::new(model.byte_len());

        assert_eq!(feed(&mut asm, &mut model, &[0x81, 0x01, 0x82, 0x02, 0x03]), 1);
        assert_eq!(model.as_bytes(), &[0x82, 0x02, 0x03]);
        assert_eq!(asm.frames(), 1);
    }

    #[test]
    fn test_split_across_reads_and_back_to_back() {
        let mut model = BitModel::new(8);
        let mut asm = FrameAssembler::new(model.byte_len());

        assert_eq!(feed(&mut asm, &mut model, &[0x81]), 0);
        assert_eq!(asm.state(), FrameState::Accumulating(1));
        assert_eq!(feed(&mut asm, &mut model, &[0x01, 0x80, 0x00]), 2);
        assert_eq!(model.get(7, 0).unwrap(), 0);
    }

    #[test]
    fn test_single_byte_packets() {
        let mut model = BitModel::new(4);
        let mut asm = FrameAssembler::new(model.byte_len());

        assert_eq!(feed(&mut asm, &mut model, &[0x03, 0x85, 0x8A]), 2);
        assert_eq!(asm.discarded(), 1);
        assert_eq!(model.get(3, 0).unwrap(), 0x0A);
    }

    #[test]
    fn test_zero_width_ignores_everything() {
        let mut asm = FrameAssembler::new(0);
        assert!(!asm.push(0x80));
        assert!(!asm.push(0x01));
    }
}
