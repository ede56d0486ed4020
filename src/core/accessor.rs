//! Named bit-field accessors
//!
//! Fields are declared once as `name -> [msb, lsb]` per direction. The
//! registry validates the declarations, precomputes the byte segments of
//! every field and hands out [`Accessor`]s that read and write a
//! [`BitModel`] through a single generic extract/insert routine.

use super::bits::{bit_segments, BitModel, BitSegment, MAX_VALUE_BITS};
use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Glyph for a set bit in LED renderings
pub const LED_ON: char = '●';

/// Glyph for a clear bit in LED renderings
pub const LED_OFF: char = '-';

/// Which packet a field lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host to device
    Send,
    /// Device to host
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// A field declaration as written in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Field name
    pub name: String,
    /// Most significant bit (inclusive)
    pub msb: usize,
    /// Least significant bit (inclusive)
    pub lsb: usize,
}

impl FieldDecl {
    /// Declare a field
    pub fn new(name: &str, msb: usize, lsb: usize) -> Self {
        Self {
            name: name.to_string(),
            msb,
            lsb,
        }
    }
}

/// Resolved bit-field descriptor
#[derive(Debug, Clone)]
pub struct Accessor {
    name: String,
    msb: usize,
    lsb: usize,
    width: usize,
    direction: Direction,
    segments: Vec<BitSegment>,
}

impl Accessor {
    fn from_decl(decl: &FieldDecl, direction: Direction) -> Result<Self, ConfigError> {
        if decl.msb < decl.lsb {
            return Err(ConfigError::InvalidRange {
                name: decl.name.clone(),
                msb: decl.msb,
                lsb: decl.lsb,
            });
        }
        let width = decl.msb - decl.lsb + 1;
        if width > MAX_VALUE_BITS {
            return Err(ConfigError::FieldTooWide {
                name: decl.name.clone(),
                width,
                max: MAX_VALUE_BITS,
            });
        }

        Ok(Self {
            name: decl.name.clone(),
            msb: decl.msb,
            lsb: decl.lsb,
            width,
            direction,
            segments: bit_segments(decl.msb, decl.lsb).collect(),
        })
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Most significant bit
    pub fn msb(&self) -> usize {
        self.msb
    }

    /// Least significant bit
    pub fn lsb(&self) -> usize {
        self.lsb
    }

    /// Field width in bits
    pub fn width(&self) -> usize {
        self.width
    }

    /// Packet the field belongs to
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Precomputed byte segments
    pub fn segments(&self) -> &[BitSegment] {
        &self.segments
    }

    /// Mask of valid value bits
    pub fn value_mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Read the field from a packet
    pub fn read(&self, model: &BitModel) -> u64 {
        model.extract(&self.segments)
    }

    /// Write the field into a packet, truncating `value` to the field width
    pub fn write(&self, model: &mut BitModel, value: u64) {
        model.insert(&self.segments, value & self.value_mask());
    }

    /// Hex digits, zero padded to `ceil(width / 4)`
    pub fn format_hex(&self, value: u64) -> String {
        format!("{:0width$x}", value, width = self.width.div_ceil(4))
    }

    /// Binary digits, zero padded to the field width
    pub fn format_binary(&self, value: u64) -> String {
        format!("{:0width$b}", value, width = self.width)
    }

    /// Binary rendering with LED glyphs
    pub fn format_leds(&self, value: u64) -> String {
        self.format_binary(value)
            .chars()
            .map(|c| if c == '1' { LED_ON } else { LED_OFF })
            .collect()
    }
}

/// Table of all declared fields
#[derive(Debug, Clone, Default)]
pub struct AccessorRegistry {
    accessors: Vec<Accessor>,
    index: HashMap<String, usize>,
    send_width: usize,
    receive_width: usize,
}

impl AccessorRegistry {
    /// Build the registry from send and receive declarations.
    ///
    /// Accessors keep declaration order, send fields first.
    pub fn new(send: &[FieldDecl], receive: &[FieldDecl]) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        registry.send_width = registry.define(send, Direction::Send)?;
        registry.receive_width = registry.define(receive, Direction::Receive)?;

        tracing::debug!(
            "Registered {} fields ({} send bits, {} receive bits)",
            registry.accessors.len(),
            registry.send_width,
            registry.receive_width
        );
        Ok(registry)
    }

    fn define(&mut self, decls: &[FieldDecl], direction: Direction) -> Result<usize, ConfigError> {
        let mut width = 0;
        for decl in decls {
            let accessor = Accessor::from_decl(decl, direction)?;
            if self.index.contains_key(accessor.name()) {
                return Err(ConfigError::DuplicateField(decl.name.clone()));
            }
            width = width.max(accessor.msb + 1);
            self.index.insert(accessor.name.clone(), self.accessors.len());
            self.accessors.push(accessor);
        }
        Ok(width)
    }

    /// Minimum packet width covering every field of a direction
    pub fn required_width(&self, direction: Direction) -> usize {
        match direction {
            Direction::Send => self.send_width,
            Direction::Receive => self.receive_width,
        }
    }

    /// Check the declared fields fit in packets of the configured widths
    pub fn validate_widths(&self, send_bits: usize, receive_bits: usize) -> Result<(), ConfigError> {
        for (direction, configured) in [(Direction::Send, send_bits), (Direction::Receive, receive_bits)] {
            let required = self.required_width(direction);
            if required > configured {
                return Err(ConfigError::WidthExceeded {
                    direction,
                    required,
                    configured,
                });
            }
        }
        Ok(())
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Result<&Accessor, ConfigError> {
        self.index
            .get(name)
            .map(|&i| &self.accessors[i])
            .ok_or_else(|| ConfigError::UnknownField(name.to_string()))
    }

    /// All fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Accessor> {
        self.accessors.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    /// No fields declared
    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}
