//! # Reflector Core Library
//!
//! Mirrors a bank of named bit fields between a host and an FPGA over a
//! serial link:
//! - Send fields are packed into a send packet and transmitted
//! - Receive fields are unpacked from packets the device streams back
//! - Every change can be captured and converted into a VCD trace
//!
//! ## Example
//!
//! ```rust,no_run
//! use reflector_core::{Reflector, ReflectorConfig, ReflectorEvent, SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ReflectorConfig::default()
//!         .serial(SerialConfig::new("/dev/ttyACM1", 115200))
//!         .send_field("o_leds", 7, 0)
//!         .receive_field("i_buttons", 3, 0)
//!         .trace_file("sandbox.vcd");
//!
//!     let mut reflector = Reflector::from_config(&config)?;
//!     let mut events = reflector.subscribe();
//!     reflector.open().await?;
//!
//!     reflector.set("o_leds", 0xA5)?;
//!     reflector.cycle().await?;
//!
//!     while let Some(Ok(bytes)) = reflector.next_inbound().await {
//!         reflector.feed(&bytes);
//!         reflector.cycle().await?;
//!         if let Ok(ReflectorEvent::Changed { .. }) = events.try_recv() {
//!             println!("buttons: {}", reflector.format_leds("i_buttons")?);
//!         }
//!     }
//!
//!     reflector.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::ReflectorConfig;
pub use crate::core::accessor::{Accessor, AccessorRegistry, Direction, FieldDecl};
pub use crate::core::bits::{BitModel, BitModelError};
pub use crate::core::capture::{CaptureHeader, CaptureReader, CaptureRecord, TraceReplay};
pub use crate::core::error::{ConfigError, ReflectorError, TraceError};
pub use crate::core::reflector::{CycleReport, Reflector, ReflectorEvent};
pub use crate::core::transport::{
    list_ports, LinkTransport, NullLink, SerialConfig, SerialFlowControl, SerialLink, SerialParity, TransportError,
    TransportStats,
};
pub use crate::core::vcd::VcdWriter;
pub use crate::core::writer::BufferedWriter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
