//! Device-less link
//!
//! Accepts and drops every packet and never delivers inbound bytes, so a
//! reflector can run (and trace its own outputs) with no FPGA attached.

use super::{LinkTransport, TransportError, TransportStats};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};

const IDLE_POLL: Duration = Duration::from_millis(20);

/// Link that goes nowhere
#[derive(Debug, Default)]
pub struct NullLink {
    stats: TransportStats,
    opened_at: Option<Instant>,
}

impl NullLink {
    /// Create a closed null link
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkTransport for NullLink {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.opened_at = Some(Instant::now());
        self.stats = TransportStats::default();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.opened_at = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.opened_at.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.stats.bytes_sent += data.len() as u64;
        self.stats.packets_sent += 1;
        Ok(data.len())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        if self.opened_at.is_none() {
            return Err(TransportError::NotConnected);
        }
        tokio::time::sleep(IDLE_POLL).await;
        Ok(Bytes::new())
    }

    fn describe(&self) -> String {
        "no device".to_string()
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        if let Some(opened_at) = self.opened_at {
            stats.uptime_secs = opened_at.elapsed().as_secs();
        }
        stats
    }
}
