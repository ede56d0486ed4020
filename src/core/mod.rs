//! Core module containing the reflector machinery
//!
//! This module provides:
//! - Bit models with the 7-bit-per-byte wire framing
//! - Named bit-field accessors
//! - Transport layer (serial port, null link)
//! - The link reflector with packet reassembly and per-cycle coalescing
//! - Buffered capture log writer
//! - Capture log codec and VCD trace generation

pub mod accessor;
pub mod bits;
pub mod capture;
pub mod error;
pub mod reflector;
pub mod transport;
pub mod vcd;
pub mod writer;
