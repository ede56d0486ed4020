//! Reflector configuration file

use crate::core::accessor::{AccessorRegistry, Direction, FieldDecl};
use crate::core::error::ConfigError;
use crate::core::transport::SerialConfig;
use crate::core::vcd::MAX_SIGNALS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Suffix of the intermediate binary capture log
pub const CAPTURE_SUFFIX: &str = ".tmp";

/// Everything needed to build a reflector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectorConfig {
    /// Serial link; no device is attached when absent
    pub serial: Option<SerialConfig>,
    /// Send packet width, computed from the send fields when absent
    pub send_bit_count: Option<usize>,
    /// Receive packet width, computed from the receive fields when absent
    pub receive_bit_count: Option<usize>,
    /// VCD output; enables capture when set
    pub trace_file: Option<PathBuf>,
    /// Keep the binary capture log after conversion
    pub keep_capture_log: bool,
    /// `$version` string in the trace
    pub creator: String,
    /// `$timescale` of the trace
    pub timescale: String,
    /// Fields sent to the device
    pub send: Vec<FieldDecl>,
    /// Fields received from the device
    pub receive: Vec<FieldDecl>,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            serial: None,
            send_bit_count: None,
            receive_bit_count: None,
            trace_file: None,
            keep_capture_log: false,
            creator: "Reflector v1.0".to_string(),
            timescale: "1 ms".to_string(),
            send: Vec::new(),
            receive: Vec::new(),
        }
    }
}

impl ReflectorConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Declare a send field
    #[must_use]
    pub fn send_field(mut self, name: &str, msb: usize, lsb: usize) -> Self {
        self.send.push(FieldDecl::new(name, msb, lsb));
        self
    }

    /// Declare a receive field
    #[must_use]
    pub fn receive_field(mut self, name: &str, msb: usize, lsb: usize) -> Self {
        self.receive.push(FieldDecl::new(name, msb, lsb));
        self
    }

    /// Enable tracing into `path`
    #[must_use]
    pub fn trace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_file = Some(path.into());
        self
    }

    /// Attach a serial link
    #[must_use]
    pub fn serial(mut self, serial: SerialConfig) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Resolve the field table and packet widths.
    ///
    /// Missing widths default to what the declared fields need; configured
    /// widths smaller than that are rejected, as is a traced field table
    /// with more fields than trace symbols.
    pub fn layout(&self) -> Result<FieldLayout, ConfigError> {
        let registry = AccessorRegistry::new(&self.send, &self.receive)?;
        if self.trace_file.is_some() && registry.len() > MAX_SIGNALS {
            return Err(ConfigError::TooManyFields {
                count: registry.len(),
                max: MAX_SIGNALS,
            });
        }
        let send_bits = self
            .send_bit_count
            .unwrap_or_else(|| registry.required_width(Direction::Send));
        let receive_bits = self
            .receive_bit_count
            .unwrap_or_else(|| registry.required_width(Direction::Receive));
        registry.validate_widths(send_bits, receive_bits)?;

        Ok(FieldLayout {
            registry,
            send_bits,
            receive_bits,
        })
    }

    /// Binary capture log path that goes with the trace file
    pub fn capture_path(&self) -> Option<PathBuf> {
        self.trace_file.as_ref().map(|trace| capture_path_for(trace))
    }
}

/// Resolved field table and packet widths
#[derive(Debug, Clone)]
pub struct FieldLayout {
    /// Declared fields
    pub registry: AccessorRegistry,
    /// Send packet width in bits
    pub send_bits: usize,
    /// Receive packet width in bits
    pub receive_bits: usize,
}

/// `<trace>.tmp`
pub fn capture_path_for(trace: &Path) -> PathBuf {
    let mut name = trace.as_os_str().to_os_string();
    name.push(CAPTURE_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::SerialParity;

    const SANDBOX: &str = r#"
receive_bit_count = 16
send_bit_count = 21
trace_file = "sandbox.vcd"

[serial]
port = "COM4"
baud_rate = 115200
parity = "none"

[[receive]]
name = "i_buttons"
msb = 15
lsb = 12

[[receive]]
name = "i_counter"
msb = 7
lsb = 0

[[send]]
name = "o_leds"
msb = 7
lsb = 0

[[send]]
name = "o_counter"
msb = 19
lsb = 8
"#;

    #[test]
    fn test_parse_sandbox_config() {
        let config = ReflectorConfig::from_toml(SANDBOX).unwrap();
        assert_eq!(config.send_bit_count, Some(21));
        assert_eq!(config.receive_bit_count, Some(16));
        assert_eq!(config.send[1], FieldDecl::new("o_counter", 19, 8));
        assert_eq!(config.receive[0].name, "i_buttons");

        let serial = config.serial.as_ref().unwrap();
        assert_eq!(serial.port, "COM4");
        assert_eq!(serial.parity, SerialParity::None);

        assert_eq!(config.creator, "Reflector v1.0");
        assert_eq!(config.capture_path(), Some(PathBuf::from("sandbox.vcd.tmp")));
    }

    #[test]
    fn test_defaults_without_device() {
        let config = ReflectorConfig::from_toml("").unwrap();
        assert_eq!(config, ReflectorConfig::default());
        assert!(config.serial.is_none());
        assert!(config.capture_path().is_none());
    }

    #[test]
    fn test_builder() {
        let config = ReflectorConfig::default()
            .send_field("a", 7, 4)
            .receive_field("b", 0, 0)
            .trace_file("out.vcd");
        assert_eq!(config.send, vec![FieldDecl::new("a", 7, 4)]);
        assert_eq!(config.receive, vec![FieldDecl::new("b", 0, 0)]);
        assert_eq!(config.capture_path(), Some(PathBuf::from("out.vcd.tmp")));
    }

    #[test]
    fn test_layout_widths() {
        let config = ReflectorConfig::from_toml(SANDBOX).unwrap();
        let layout = config.layout().unwrap();
        assert_eq!(layout.send_bits, 21);
        assert_eq!(layout.receive_bits, 16);
        assert_eq!(layout.registry.len(), 4);

        let auto = ReflectorConfig::default().send_field("a", 11, 4).layout().unwrap();
        assert_eq!(auto.send_bits, 12);
        assert_eq!(auto.receive_bits, 0);

        let mut narrow = config;
        narrow.send_bit_count = Some(19);
        assert!(matches!(
            narrow.layout(),
            Err(ConfigError::WidthExceeded {
                direction: Direction::Send,
                required: 20,
                configured: 19
            })
        ));
    }

    #[test]
    fn test_traced_field_count_limited_by_symbols() {
        let mut config = ReflectorConfig::default();
        for bit in 0..=MAX_SIGNALS {
            config = config.send_field(&format!("s{}", bit), bit, bit);
        }
        assert_eq!(config.layout().unwrap().registry.len(), MAX_SIGNALS + 1);

        let traced = config.clone().trace_file("wide.vcd");
        assert!(matches!(
            traced.layout(),
            Err(ConfigError::TooManyFields { count: 95, max: 94 })
        ));

        config.send.pop();
        assert!(config.trace_file("wide.vcd").layout().is_ok());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = ReflectorConfig::from_toml("send = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = ReflectorConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }
}
