//! Error types shared by the reflector core

use super::accessor::Direction;
use super::bits::BitModelError;
use super::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid field layout or configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Field declared with msb below lsb
    #[error("Bit range incorrect for '{name}', msb must be greater than lsb ({msb} < {lsb})")]
    InvalidRange {
        /// Field name
        name: String,
        /// Declared msb
        msb: usize,
        /// Declared lsb
        lsb: usize,
    },

    /// Field wider than an integer value can carry
    #[error("Field '{name}' is {width} bits wide, at most {max} are supported")]
    FieldTooWide {
        /// Field name
        name: String,
        /// Declared width
        width: usize,
        /// Supported maximum
        max: usize,
    },

    /// More fields than a trace can name
    #[error("{count} fields declared, a trace holds at most {max}")]
    TooManyFields {
        /// Declared fields
        count: usize,
        /// Trace signal limit
        max: usize,
    },

    /// Same field name declared twice
    #[error("Field '{0}' declared more than once")]
    DuplicateField(String),

    /// No field with this name
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    /// Fields reference bits beyond the configured packet width
    #[error("One or more {direction} fields reference out of range bits ({required} > {configured})")]
    WidthExceeded {
        /// Packet direction
        direction: Direction,
        /// Bits needed by the declared fields
        required: usize,
        /// Configured packet width
        configured: usize,
    },

    /// Configuration file could not be read
    #[error("Failed to read configuration {path}: {source}")]
    Load {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Capture log and trace file errors
#[derive(Error, Debug)]
pub enum TraceError {
    /// Generic I/O failure
    #[error("Trace I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Asynchronous write of a capture buffer failed
    #[error("Write to {path} failed: {source}")]
    Write {
        /// File being written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File handle lost or already closed
    #[error("Capture file {0} is closed")]
    Closed(PathBuf),

    /// Background task failed
    #[error("Background task failed: {0}")]
    Task(String),

    /// More signals than printable symbols
    #[error("Too many trace signals (at most {0})")]
    TooManySignals(usize),

    /// Record does not fit the packet layout
    #[error("Capture record mismatch: {0}")]
    Record(#[from] BitModelError),
}

/// Top-level reflector error
#[derive(Error, Debug)]
pub enum ReflectorError {
    /// Layout or configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Direct bit access problem
    #[error(transparent)]
    Bits(#[from] BitModelError),

    /// Link problem
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Capture or trace problem
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Reflector has not been opened
    #[error("Reflector is not open")]
    NotOpen,
}
