//! Binary capture log and its conversion to VCD
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! header:  i32 send bit width, i32 receive bit width
//! record:  i32 timestamp (ms), send packet bytes, receive packet bytes
//! ```
//!
//! Records repeat until end of file. A short read anywhere in a record ends
//! the trace; it is not an error.

use super::accessor::{AccessorRegistry, Direction};
use super::bits::{byte_count, BitModel};
use super::error::TraceError;
use super::vcd::{SignalId, VcdWriter, MAX_SIGNALS};
use chrono::Utc;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Header length in bytes
pub const HEADER_LEN: usize = 8;

/// Header of a capture log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    /// Declared send packet width
    pub send_bits: i32,
    /// Declared receive packet width
    pub receive_bits: i32,
}

impl CaptureHeader {
    /// Encode to bytes
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.send_bits.to_le_bytes());
        out[4..].copy_from_slice(&self.receive_bits.to_le_bytes());
        out
    }
}

/// One recorded snapshot of both packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    /// Milliseconds since the reflector opened
    pub timestamp_ms: i32,
    /// Send packet wire bytes
    pub send: Vec<u8>,
    /// Receive packet wire bytes
    pub receive: Vec<u8>,
}

/// Encode one record
pub fn encode_record(timestamp_ms: i32, send: &[u8], receive: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + send.len() + receive.len());
    out.extend_from_slice(&timestamp_ms.to_le_bytes());
    out.extend_from_slice(send);
    out.extend_from_slice(receive);
    out
}

/// Read until `buf` is full or the stream ends; returns bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sequential reader over a capture log
#[derive(Debug)]
pub struct CaptureReader<R: Read> {
    reader: R,
    header: Option<CaptureHeader>,
    send_len: usize,
    receive_len: usize,
}

impl<R: Read> CaptureReader<R> {
    /// Read the header. Record sizes come from the packet layout, the
    /// header widths are informational.
    pub fn new(mut reader: R, send_bits: usize, receive_bits: usize) -> Result<Self, TraceError> {
        let mut raw = [0u8; HEADER_LEN];
        let header = (read_full(&mut reader, &mut raw)? == HEADER_LEN).then(|| CaptureHeader {
            send_bits: i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            receive_bits: i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        });

        Ok(Self {
            reader,
            header,
            send_len: byte_count(send_bits),
            receive_len: byte_count(receive_bits),
        })
    }

    /// Header, if the log had a complete one
    pub fn header(&self) -> Option<CaptureHeader> {
        self.header
    }

    /// Next record, `None` at end of trace
    pub fn next_record(&mut self) -> Result<Option<CaptureRecord>, TraceError> {
        if self.header.is_none() {
            return Ok(None);
        }

        let mut stamp = [0u8; 4];
        if read_full(&mut self.reader, &mut stamp)? < stamp.len() {
            return Ok(None);
        }

        let mut send = vec![0u8; self.send_len];
        let mut receive = vec![0u8; self.receive_len];
        if read_full(&mut self.reader, &mut send)? < send.len()
            || read_full(&mut self.reader, &mut receive)? < receive.len()
        {
            tracing::warn!("Capture log ends in a truncated record");
            return Ok(None);
        }

        Ok(Some(CaptureRecord {
            timestamp_ms: i32::from_le_bytes(stamp),
            send,
            receive,
        }))
    }
}

/// Counts from a finished replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records read from the capture log
    pub records: usize,
    /// Signals declared in the trace
    pub signals: usize,
}

/// Transcodes a capture log into a VCD trace
#[derive(Debug, Clone)]
pub struct TraceReplay {
    registry: Arc<AccessorRegistry>,
    send_bits: usize,
    receive_bits: usize,
    creator: String,
    timescale: String,
}

impl TraceReplay {
    /// Replay using the layout the log was captured with
    pub fn new(registry: Arc<AccessorRegistry>, send_bits: usize, receive_bits: usize) -> Self {
        Self {
            registry,
            send_bits,
            receive_bits,
            creator: "Reflector v1.0".to_string(),
            timescale: "1 ms".to_string(),
        }
    }

    /// Set the `$version` creator string
    #[must_use]
    pub fn creator(mut self, creator: &str) -> Self {
        self.creator = creator.to_string();
        self
    }

    /// Set the `$timescale` value
    #[must_use]
    pub fn timescale(mut self, timescale: &str) -> Self {
        self.timescale = timescale.to_string();
        self
    }

    /// Convert the capture log at `capture` into a VCD file at `trace`
    pub fn convert(&self, capture: &Path, trace: &Path) -> Result<ReplaySummary, TraceError> {
        if self.registry.len() > MAX_SIGNALS {
            return Err(TraceError::TooManySignals(MAX_SIGNALS));
        }
        let input = BufReader::new(File::open(capture)?);
        let output = BufWriter::new(File::create(trace)?);
        let summary = self.replay(input, output)?;
        tracing::info!(
            "Trace written to {} ({} samples, {} signals)",
            trace.display(),
            summary.records,
            summary.signals
        );
        Ok(summary)
    }

    /// Replay from any reader into any writer
    pub fn replay<R: Read, W: Write>(&self, input: R, output: W) -> Result<ReplaySummary, TraceError> {
        let mut vcd = VcdWriter::new(output);
        vcd.write_date(Utc::now())?;
        vcd.set_creator(&self.creator)?;
        vcd.set_timescale(&self.timescale)?;
        vcd.begin_scope("signals")?;

        let signals: Vec<SignalId> = self
            .registry
            .iter()
            .map(|acc| vcd.add_signal(acc.name(), acc.width()))
            .collect::<Result<_, _>>()?;
        vcd.close_headers()?;

        let mut reader = CaptureReader::new(input, self.send_bits, self.receive_bits)?;
        if let Some(header) = reader.header() {
            tracing::debug!(
                "Capture log declares {} send / {} receive bits",
                header.send_bits,
                header.receive_bits
            );
        }

        let mut send = BitModel::new(self.send_bits);
        let mut receive = BitModel::new(self.receive_bits);
        let mut records = 0;

        while let Some(record) = reader.next_record()? {
            vcd.set_time(i64::from(record.timestamp_ms))?;
            send.load_bytes(&record.send)?;
            receive.load_bytes(&record.receive)?;

            for (acc, &signal) in self.registry.iter().zip(&signals) {
                let model = match acc.direction() {
                    Direction::Send => &send,
                    Direction::Receive => &receive,
                };
                vcd.set_value(signal, &acc.format_binary(acc.read(model)));
            }
            records += 1;
        }

        vcd.finish()?;
        Ok(ReplaySummary {
            records,
            signals: signals.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::accessor::FieldDecl;

    fn registry() -> Arc<AccessorRegistry> {
        Arc::new(
            AccessorRegistry::new(
                &[FieldDecl::new("led", 0, 0), FieldDecl::new("count", 9, 1)],
                &[FieldDecl::new("button", 2, 2)],
            )
            .unwrap(),
        )
    }

    fn log(records: &[(i32, u64, u64)]) -> Vec<u8> {
        let mut out = CaptureHeader {
            send_bits: 10,
            receive_bits: 3,
        }
        .encode()
        .to_vec();

        for &(t, s, r) in records {
            let mut send = BitModel::new(10);
            send.set(9, 0, s).unwrap();
            let mut receive = BitModel::new(3);
            receive.set(2, 0, r).unwrap();
            out.extend(encode_record(t, send.as_bytes(), receive.as_bytes()));
        }
        out
    }

    #[test]
    fn test_reader_stops_at_end_and_truncation() {
        let mut data = log(&[(1, 3, 0), (7, 5, 4)]);
        data.extend_from_slice(&[9, 0]);

        let mut reader = CaptureReader::new(data.as_slice(), 10, 3).unwrap();
        assert_eq!(
            reader.header(),
            Some(CaptureHeader {
                send_bits: 10,
                receive_bits: 3
            })
        );
        assert_eq!(reader.next_record().unwrap().unwrap().timestamp_ms, 1);
        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.timestamp_ms, 7);
        assert_eq!(second.send.len(), 2);
        assert_eq!(second.receive.len(), 1);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_ends_trace() {
        let mut data = log(&[(1, 3, 0)]);
        data.extend_from_slice(&5i32.to_le_bytes());
        data.push(0x80);

        let mut reader = CaptureReader::new(data.as_slice(), 10, 3).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_empty_log_replays_to_header_only() {
        let replay = TraceReplay::new(registry(), 10, 3);
        let mut out = Vec::new();
        let summary = replay.replay(std::io::empty(), &mut out).unwrap();
        assert_eq!(summary, ReplaySummary { records: 0, signals: 3 });

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("$var reg 1 ! led $end"));
        assert!(text.contains("$var reg 9 \" count $end"));
        assert!(text.contains("$var reg 1 # button $end"));
        assert!(text.trim_end().ends_with("$end"));
    }

    #[test]
    fn test_replay_writes_field_changes() {
        // send = count << 1 | led
        let data = log(&[(2, 0b0000_0000_11, 0b000), (4, 0b0000_0000_11, 0b100), (9, 0b0000_0001_10, 0b100)]);
        let replay = TraceReplay::new(registry(), 10, 3).creator("Test v1").timescale("1 us");
        let mut out = Vec::new();
        let summary = replay.replay(data.as_slice(), &mut out).unwrap();
        assert_eq!(summary.records, 3);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  Test v1\n"));
        assert!(text.contains("  1 us\n"));

        let tail = &text[text.find("#2").unwrap()..];
        let expected = "\
#2
1!
b000000001 \"
0#
#4
1#
#9
0!
b000000011 \"
";
        assert_eq!(tail, expected);
    }

    #[test]
    fn test_convert_rejects_untraceable_layout_before_writing() {
        let fields: Vec<FieldDecl> = (0..=MAX_SIGNALS).map(|bit| FieldDecl::new(&format!("s{}", bit), bit, bit)).collect();
        let registry = Arc::new(AccessorRegistry::new(&fields, &[]).unwrap());

        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("wide.vcd.tmp");
        let trace = dir.path().join("wide.vcd");
        std::fs::write(&capture, CaptureHeader { send_bits: 95, receive_bits: 0 }.encode()).unwrap();

        let err = TraceReplay::new(registry, MAX_SIGNALS + 1, 0).convert(&capture, &trace).unwrap_err();
        assert!(matches!(err, TraceError::TooManySignals(94)));
        assert!(!trace.exists());
    }
}
