//! Value change dump (VCD) writer
//!
//! Writes the header, an initial all-unknown dump, then `#<time>` blocks
//! holding only the signals whose value differs from what was last written
//! for them.

use super::error::TraceError;
use chrono::{DateTime, Utc};
use std::io::Write;

/// First printable, non-space ASCII symbol
const FIRST_SYMBOL: u8 = b'!';

/// Last printable ASCII symbol
const LAST_SYMBOL: u8 = b'~';

/// Signals one trace can hold, one per printable symbol
pub const MAX_SIGNALS: usize = (LAST_SYMBOL - FIRST_SYMBOL) as usize + 1;

/// Handle to a declared signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalId(usize);

#[derive(Debug)]
struct Signal {
    symbol: char,
    width: usize,
    value: String,
    emitted: Option<String>,
}

impl Signal {
    fn value_line(&self) -> String {
        if self.width == 1 {
            format!("{}{}", self.value, self.symbol)
        } else {
            format!("b{} {}", self.value, self.symbol)
        }
    }
}

/// Streaming VCD writer
#[derive(Debug)]
pub struct VcdWriter<W: Write> {
    out: W,
    signals: Vec<Signal>,
    next_symbol: u8,
    time: i64,
}

impl<W: Write> VcdWriter<W> {
    /// Wrap an output stream
    pub fn new(out: W) -> Self {
        Self {
            out,
            signals: Vec::new(),
            next_symbol: FIRST_SYMBOL,
            time: 0,
        }
    }

    /// `$date` section
    pub fn write_date(&mut self, date: DateTime<Utc>) -> Result<(), TraceError> {
        writeln!(self.out, "$date")?;
        writeln!(self.out, "  {}", date.format("%a %b %-d %H:%M:%S %Y"))?;
        writeln!(self.out, "$end")?;
        Ok(())
    }

    /// `$version` section naming the producing tool
    pub fn set_creator(&mut self, name: &str) -> Result<(), TraceError> {
        writeln!(self.out, "$version")?;
        writeln!(self.out, "  {}", name)?;
        writeln!(self.out, "$end")?;
        Ok(())
    }

    /// `$timescale` section, e.g. `1 ms`
    pub fn set_timescale(&mut self, value: &str) -> Result<(), TraceError> {
        writeln!(self.out, "$timescale")?;
        writeln!(self.out, "  {}", value)?;
        writeln!(self.out, "$end")?;
        Ok(())
    }

    /// Open a module scope
    pub fn begin_scope(&mut self, name: &str) -> Result<(), TraceError> {
        writeln!(self.out, "$scope module {} $end", name)?;
        Ok(())
    }

    /// Declare a signal, allocating the next printable symbol
    pub fn add_signal(&mut self, name: &str, width: usize) -> Result<SignalId, TraceError> {
        if self.next_symbol > LAST_SYMBOL {
            return Err(TraceError::TooManySignals(MAX_SIGNALS));
        }
        let symbol = char::from(self.next_symbol);
        self.next_symbol += 1;

        writeln!(self.out, "$var reg {} {} {} $end", width, symbol, name)?;
        self.signals.push(Signal {
            symbol,
            width,
            value: "x".repeat(width),
            emitted: None,
        });
        Ok(SignalId(self.signals.len() - 1))
    }

    /// Close the scope and definitions and dump the initial values
    pub fn close_headers(&mut self) -> Result<(), TraceError> {
        writeln!(self.out, "$upscope $end")?;
        writeln!(self.out, "$enddefinitions $end")?;
        writeln!(self.out, "#{}", self.time)?;
        writeln!(self.out, "$dumpvars")?;
        for signal in &mut self.signals {
            writeln!(self.out, "{}", signal.value_line())?;
            signal.emitted = Some(signal.value.clone());
        }
        writeln!(self.out, "$end")?;
        Ok(())
    }

    /// Move to time `t`, first writing anything that changed at the old time
    pub fn set_time(&mut self, t: i64) -> Result<(), TraceError> {
        if t == self.time {
            return Ok(());
        }
        self.write_changes()?;
        self.time = t;
        Ok(())
    }

    /// Set a signal's value as MSB-first binary digits
    pub fn set_value(&mut self, id: SignalId, bits: &str) {
        let signal = &mut self.signals[id.0];
        signal.value.clear();
        signal.value.push_str(bits);
    }

    fn write_changes(&mut self) -> Result<(), TraceError> {
        let mut time_written = false;
        for signal in &mut self.signals {
            if signal.emitted.as_deref() == Some(signal.value.as_str()) {
                continue;
            }
            if !time_written {
                writeln!(self.out, "#{}", self.time)?;
                time_written = true;
            }
            writeln!(self.out, "{}", signal.value_line())?;
            signal.emitted = Some(signal.value.clone());
        }
        Ok(())
    }

    /// Write pending changes and hand back the output stream
    pub fn finish(mut self) -> Result<W, TraceError> {
        self.write_changes()?;
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_with(signals: &[(&str, usize)]) -> (VcdWriter<Vec<u8>>, Vec<SignalId>) {
        let mut vcd = VcdWriter::new(Vec::new());
        vcd.begin_scope("signals").unwrap();
        let ids = signals
            .iter()
            .map(|(name, width)| vcd.add_signal(name, *width).unwrap())
            .collect();
        vcd.close_headers().unwrap();
        (vcd, ids)
    }

    fn body(out: Vec<u8>) -> String {
        let text = String::from_utf8(out).unwrap();
        let start = text.find("$dumpvars").unwrap();
        text[start..].to_string()
    }

    #[test]
    fn test_header_layout() {
        let mut vcd = VcdWriter::new(Vec::new());
        let date = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z").unwrap().with_timezone(&Utc);
        vcd.write_date(date).unwrap();
        vcd.set_creator("Reflector v1.0").unwrap();
        vcd.set_timescale("1 ms").unwrap();
        vcd.begin_scope("signals").unwrap();
        vcd.add_signal("clk", 1).unwrap();
        vcd.add_signal("bus", 4).unwrap();
        vcd.close_headers().unwrap();

        let text = String::from_utf8(vcd.finish().unwrap()).unwrap();
        let expected = "\
$date
  Tue Mar 5 07:08:09 2024
$end
$version
  Reflector v1.0
$end
$timescale
  1 ms
$end
$scope module signals $end
$var reg 1 ! clk $end
$var reg 4 \" bus $end
$upscope $end
$enddefinitions $end
#0
$dumpvars
x!
bxxxx \"
$end
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_symbols_are_sequential() {
        let mut vcd = VcdWriter::new(Vec::new());
        for i in 0..94 {
            vcd.add_signal(&format!("s{}", i), 1).unwrap();
        }
        assert!(matches!(vcd.add_signal("overflow", 1), Err(TraceError::TooManySignals(94))));
        let text = String::from_utf8(vcd.finish().unwrap()).unwrap();
        assert!(text.contains("$var reg 1 ! s0 $end"));
        assert!(text.contains("$var reg 1 ~ s93 $end"));
    }

    #[test]
    fn test_only_changes_are_written() {
        let (mut vcd, ids) = writer_with(&[("a", 4), ("b", 1)]);

        vcd.set_time(5).unwrap();
        vcd.set_value(ids[0], "1010");
        vcd.set_value(ids[1], "0");
        vcd.set_time(9).unwrap();
        vcd.set_value(ids[0], "1010");
        vcd.set_value(ids[1], "0");
        vcd.set_time(12).unwrap();
        vcd.set_value(ids[0], "0101");
        vcd.set_value(ids[1], "0");

        let text = body(vcd.finish().unwrap());
        let expected = "\
$dumpvars
bxxxx !
x\"
$end
#5
b1010 !
0\"
#12
b0101 !
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_same_time_keeps_last_value() {
        let (mut vcd, ids) = writer_with(&[("a", 1)]);
        vcd.set_time(3).unwrap();
        vcd.set_value(ids[0], "1");
        vcd.set_time(3).unwrap();
        vcd.set_value(ids[0], "0");

        let text = body(vcd.finish().unwrap());
        assert!(text.ends_with("#3\n0!\n"));
        assert!(!text.contains("1!"));
    }

    #[test]
    fn test_no_time_marker_without_changes() {
        let (mut vcd, ids) = writer_with(&[("a", 1)]);
        vcd.set_time(1).unwrap();
        vcd.set_value(ids[0], "x");
        vcd.set_time(2).unwrap();

        let text = body(vcd.finish().unwrap());
        assert!(!text.contains("#1"));
        assert!(!text.contains("#2"));
    }
}
