//! Byte transports carrying reflector packets
//!
//! Supports:
//! - Serial ports (USB-serial bridges to the FPGA)
//! - A null link for running without an attached device

mod null;
mod serial;

pub use null::NullLink;
pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialLink, SerialParity};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Packets sent
    pub packets_sent: u64,
    /// Reads that returned data
    pub reads: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// A byte stream to the device
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Open the link
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Close the link
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if open
    fn is_open(&self) -> bool;

    /// Send a complete packet
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive available bytes, empty when nothing arrived within the poll window
    async fn receive(&mut self) -> Result<Bytes, TransportError>;

    /// Connection info string
    fn describe(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}

/// Pick the transport for an optional serial configuration
pub fn create_link(serial: Option<&SerialConfig>) -> Box<dyn LinkTransport> {
    match serial {
        Some(cfg) => Box::new(SerialLink::new(cfg.clone())),
        None => Box::new(NullLink::new()),
    }
}
