//! Serial port link implementation

use super::{LinkTransport, TransportError, TransportStats};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// How long a single read waits for bytes before reporting "nothing yet"
const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM4, /dev/ttyACM1)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl SerialConfig {
    /// Create a new serial configuration with default line settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("COM4", 115200)
    }
}

/// Serial port link
pub struct SerialLink {
    config: SerialConfig,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    stats: TransportStats,
    connected_at: Option<Instant>,
}

impl SerialLink {
    /// Create a new, closed serial link
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: Mutex::new(None),
            stats: TransportStats::default(),
            connected_at: None,
        }
    }
}

#[async_trait]
impl LinkTransport for SerialLink {
    async fn open(&mut self) -> Result<(), TransportError> {
        let data_bits = match self.config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match self.config.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(self.config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        tracing::info!("Opened {}", self.describe());
        *self.port.lock() = Some(port);
        self.connected_at = Some(Instant::now());
        self.stats = TransportStats::default();

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        *self.port.lock() = None;
        self.connected_at = None;
        tracing::info!("Closed {}", self.config.port);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut port_guard = self.port.lock();
        let port = port_guard.as_mut().ok_or(TransportError::Disconnected)?;

        port.write_all(data)?;
        port.flush()?;

        self.stats.bytes_sent += data.len() as u64;
        self.stats.packets_sent += 1;

        Ok(data.len())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        let mut port_guard = self.port.lock();
        let port = port_guard.as_mut().ok_or(TransportError::Disconnected)?;

        let mut buffer = vec![0u8; 4096];

        match port.read(&mut buffer) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                buffer.truncate(n);
                drop(port_guard);

                self.stats.bytes_received += n as u64;
                self.stats.reads += 1;

                Ok(Bytes::from(buffer))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Bytes::new()),
            Err(e) => Err(TransportError::IoError(e)),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            match self.config.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.config.stop_bits,
        )
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml_uses_defaults() {
        let cfg: SerialConfig = toml::from_str("port = \"/dev/ttyACM1\"\nparity = \"even\"").unwrap();
        assert_eq!(cfg.port, "/dev/ttyACM1");
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.parity, SerialParity::Even);
        assert_eq!(cfg.flow_control, SerialFlowControl::None);
    }

    #[test]
    fn test_describe() {
        let link = SerialLink::new(SerialConfig::new("/dev/ttyUSB0", 9600).parity(SerialParity::Odd));
        assert_eq!(link.describe(), "/dev/ttyUSB0 @ 9600 baud (8O1)");
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_send_requires_open_port() {
        let mut link = SerialLink::new(SerialConfig::default());
        assert!(matches!(link.send(&[0x80]).await, Err(TransportError::Disconnected)));
    }
}
