//! Link reflector
//!
//! Mirrors a local send packet out to the device and the device's receive
//! packet back in. Field writes and inbound packets only raise flags; the
//! owner drives [`Reflector::cycle`], which runs at most one change check
//! and at most one transmission no matter how much happened since the
//! previous cycle.

mod framing;
mod schedule;

pub use framing::{FrameAssembler, FrameState};
pub use schedule::Schedule;

use crate::config::{capture_path_for, FieldLayout, ReflectorConfig};
use crate::core::accessor::{Accessor, AccessorRegistry, Direction};
use crate::core::bits::BitModel;
use crate::core::capture::{encode_record, CaptureHeader, TraceReplay};
use crate::core::error::{ConfigError, ReflectorError, TraceError};
use crate::core::transport::{create_link, LinkTransport, TransportError, TransportStats};
use crate::core::writer::BufferedWriter;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Reader back-off when the link had nothing to deliver
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const EVENT_CAPACITY: usize = 256;
const INBOUND_CAPACITY: usize = 64;

/// Reflector notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectorEvent {
    /// Send or receive packet differs from the last recorded one
    Changed {
        /// Milliseconds since open
        timestamp_ms: i32,
    },
    /// A capture write failed; its bytes are lost
    TraceWriteFailed(String),
    /// Transmission or reception failed
    LinkError(String),
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// A change was detected and notified
    pub changed: bool,
    /// The send packet went out
    pub transmitted: bool,
}

#[derive(Debug, Clone)]
struct TraceSettings {
    trace_file: PathBuf,
    keep_capture_log: bool,
    creator: String,
    timescale: String,
}

type SharedLink = Arc<Mutex<Box<dyn LinkTransport>>>;
type Inbound = Result<Bytes, TransportError>;

/// Link peer holding the send and receive models
pub struct Reflector {
    registry: Arc<AccessorRegistry>,
    trace: Option<TraceSettings>,
    send: BitModel,
    receive: BitModel,
    assembler: FrameAssembler,
    send_snapshot: Vec<u8>,
    receive_snapshot: Vec<u8>,
    schedule: Schedule,
    transport: SharedLink,
    reader: Option<JoinHandle<()>>,
    inbound: Option<mpsc::Receiver<Inbound>>,
    writer: Option<BufferedWriter>,
    started: Option<Instant>,
    event_tx: broadcast::Sender<ReflectorEvent>,
}

impl Reflector {
    /// Build a reflector over `transport`.
    ///
    /// Packet widths default to what the declared fields need; configured
    /// widths smaller than that are rejected.
    pub fn new(config: &ReflectorConfig, transport: Box<dyn LinkTransport>) -> Result<Self, ConfigError> {
        let FieldLayout {
            registry,
            send_bits,
            receive_bits,
        } = config.layout()?;

        let send = BitModel::new(send_bits);
        let receive = BitModel::new(receive_bits);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let trace = config.trace_file.as_ref().map(|trace_file| TraceSettings {
            trace_file: trace_file.clone(),
            keep_capture_log: config.keep_capture_log,
            creator: config.creator.clone(),
            timescale: config.timescale.clone(),
        });

        Ok(Self {
            registry: Arc::new(registry),
            trace,
            assembler: FrameAssembler::new(receive.byte_len()),
            send_snapshot: vec![0; send.byte_len()],
            receive_snapshot: vec![0; receive.byte_len()],
            send,
            receive,
            schedule: Schedule::default(),
            transport: Arc::new(Mutex::new(transport)),
            reader: None,
            inbound: None,
            writer: None,
            started: None,
            event_tx,
        })
    }

    /// Build a reflector with the link named in the configuration
    pub fn from_config(config: &ReflectorConfig) -> Result<Self, ConfigError> {
        Self::new(config, create_link(config.serial.as_ref()))
    }

    /// Field layout
    pub fn registry(&self) -> &Arc<AccessorRegistry> {
        &self.registry
    }

    /// Send packet model
    pub fn send_model(&self) -> &BitModel {
        &self.send
    }

    /// Receive packet model
    pub fn receive_model(&self) -> &BitModel {
        &self.receive
    }

    /// Subscribe to notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ReflectorEvent> {
        self.event_tx.subscribe()
    }

    /// Open and not yet closed
    pub fn is_open(&self) -> bool {
        self.started.is_some()
    }

    /// Complete packets received so far
    pub fn packets_received(&self) -> u64 {
        self.assembler.frames()
    }

    /// Link statistics
    pub async fn transport_stats(&self) -> TransportStats {
        self.transport.lock().await.stats()
    }

    /// Link description
    pub async fn describe_link(&self) -> String {
        self.transport.lock().await.describe()
    }

    fn model(&self, direction: Direction) -> &BitModel {
        match direction {
            Direction::Send => &self.send,
            Direction::Receive => &self.receive,
        }
    }

    fn accessor(&self, name: &str) -> Result<&Accessor, ReflectorError> {
        Ok(self.registry.get(name)?)
    }

    /// Current value of a field
    pub fn get(&self, name: &str) -> Result<u64, ReflectorError> {
        let acc = self.accessor(name)?;
        Ok(acc.read(self.model(acc.direction())))
    }

    /// Write a field, truncating `value` to the field width.
    ///
    /// Send fields are scheduled for transmission. Receive fields are only
    /// changed locally.
    pub fn set(&mut self, name: &str, value: u64) -> Result<(), ReflectorError> {
        let acc = self.registry.get(name)?;
        match acc.direction() {
            Direction::Send => {
                acc.write(&mut self.send, value);
                self.schedule.mark_send_dirty();
            }
            Direction::Receive => acc.write(&mut self.receive, value),
        }
        Ok(())
    }

    /// Field value as MSB-first binary digits
    pub fn get_bits(&self, name: &str) -> Result<String, ReflectorError> {
        let acc = self.accessor(name)?;
        Ok(acc.format_binary(acc.read(self.model(acc.direction()))))
    }

    /// Write a field from MSB-first binary digits of exactly its width
    pub fn set_bits(&mut self, name: &str, bits: &str) -> Result<(), ReflectorError> {
        let acc = self.registry.get(name)?;
        match acc.direction() {
            Direction::Send => {
                self.send.set_bits(acc.msb(), acc.lsb(), bits)?;
                self.schedule.mark_send_dirty();
            }
            Direction::Receive => self.receive.set_bits(acc.msb(), acc.lsb(), bits)?,
        }
        Ok(())
    }

    /// Field value as zero-padded hex
    pub fn format_hex(&self, name: &str) -> Result<String, ReflectorError> {
        let acc = self.accessor(name)?;
        Ok(acc.format_hex(acc.read(self.model(acc.direction()))))
    }

    /// Field value as zero-padded binary
    pub fn format_binary(&self, name: &str) -> Result<String, ReflectorError> {
        self.get_bits(name)
    }

    /// Field value as LED glyphs
    pub fn format_leds(&self, name: &str) -> Result<String, ReflectorError> {
        let acc = self.accessor(name)?;
        Ok(acc.format_leds(acc.read(self.model(acc.direction()))))
    }

    /// Open the link and, when tracing, the capture log
    pub async fn open(&mut self) -> Result<(), ReflectorError> {
        if self.is_open() {
            return Ok(());
        }

        self.transport.lock().await.open().await?;

        match self.create_capture().await {
            Ok(writer) => self.writer = writer,
            Err(e) => {
                if let Err(close_err) = self.transport.lock().await.close().await {
                    tracing::warn!("Failed to close link after capture error: {}", close_err);
                }
                return Err(e.into());
            }
        }

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.reader = Some(spawn_reader(Arc::clone(&self.transport), tx));
        self.inbound = Some(rx);
        self.started = Some(Instant::now());
        self.schedule.request_change();

        tracing::info!(
            "Reflector open on {} ({} send bits, {} receive bits)",
            self.describe_link().await,
            self.send.width(),
            self.receive.width()
        );
        Ok(())
    }

    async fn create_capture(&self) -> Result<Option<BufferedWriter>, TraceError> {
        let Some(trace) = &self.trace else {
            return Ok(None);
        };

        let mut writer = BufferedWriter::create(capture_path_for(&trace.trace_file)).await?;
        let header = CaptureHeader {
            send_bits: i32::try_from(self.send.width()).unwrap_or(i32::MAX),
            receive_bits: i32::try_from(self.receive.width()).unwrap_or(i32::MAX),
        };
        writer.write(&header.encode());
        Ok(Some(writer))
    }

    /// Wait for the next chunk of bytes from the link.
    ///
    /// Returns `None` when the reflector is not open or the reader stopped.
    pub async fn next_inbound(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.inbound.as_mut()?.recv().await
    }

    /// Feed bytes already read from the link, in arrival order.
    ///
    /// Every completed packet replaces the receive model and requests a
    /// change check. Returns the number of packets completed.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let mut completed = 0;
        for &byte in bytes {
            if self.assembler.push(byte) {
                self.assembler.swap_into(&mut self.receive);
                self.schedule.request_change();
                completed += 1;
            }
        }
        if completed > 0 {
            tracing::debug!("Received {} packet(s): {}", completed, self.receive);
        }
        completed
    }

    /// Feed everything the reader has delivered so far without waiting
    pub fn drain_inbound(&mut self) -> Result<usize, ReflectorError> {
        let mut chunks = Vec::new();
        if let Some(rx) = self.inbound.as_mut() {
            while let Ok(item) = rx.try_recv() {
                chunks.push(item);
            }
        }

        let mut completed = 0;
        for chunk in chunks {
            match chunk {
                Ok(bytes) => completed += self.feed(&bytes),
                Err(e) => {
                    let _ = self.event_tx.send(ReflectorEvent::LinkError(e.to_string()));
                    return Err(e.into());
                }
            }
        }
        Ok(completed)
    }

    /// Run one scheduling cycle: change check, then transmission, then a
    /// non-blocking step of the capture writer.
    pub async fn cycle(&mut self) -> Result<CycleReport, ReflectorError> {
        if !self.is_open() {
            return Err(ReflectorError::NotOpen);
        }

        let mut report = CycleReport::default();
        if self.schedule.take_change() {
            report.changed = self.check_changes();
        }
        if self.schedule.take_send() {
            self.transmit().await?;
            report.transmitted = true;
        }
        self.poll_writer();
        Ok(report)
    }

    fn elapsed_ms(&self) -> i32 {
        self.started
            .map_or(0, |started| i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX))
    }

    fn check_changes(&mut self) -> bool {
        if self.send.as_bytes() == self.send_snapshot.as_slice()
            && self.receive.as_bytes() == self.receive_snapshot.as_slice()
        {
            return false;
        }

        let timestamp_ms = self.elapsed_ms();
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&encode_record(timestamp_ms, self.send.as_bytes(), self.receive.as_bytes()));
        }
        self.send_snapshot.copy_from_slice(self.send.as_bytes());
        self.receive_snapshot.copy_from_slice(self.receive.as_bytes());

        let _ = self.event_tx.send(ReflectorEvent::Changed { timestamp_ms });
        true
    }

    async fn transmit(&mut self) -> Result<(), ReflectorError> {
        let result = {
            let mut link = self.transport.lock().await;
            link.send(self.send.as_bytes()).await
        };

        match result {
            Ok(n) => {
                tracing::debug!("Sent {} bytes: {}", n, hex::encode(self.send.as_bytes()));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Transmission failed: {}", e);
                let _ = self.event_tx.send(ReflectorEvent::LinkError(e.to_string()));
                Err(e.into())
            }
        }
    }

    fn poll_writer(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.poll_flush() {
                self.report_trace_failure(&e);
            }
        }
    }

    fn report_trace_failure(&self, error: &TraceError) {
        tracing::warn!("Capture write failed: {}", error);
        let _ = self.event_tx.send(ReflectorEvent::TraceWriteFailed(error.to_string()));
    }

    /// Close the reflector.
    ///
    /// Stops the reader, processes what it already delivered, runs a final
    /// cycle, closes the link, drains the capture log and converts it into
    /// the trace file. Every step runs; the first failure is returned.
    pub async fn close(&mut self) -> Result<(), ReflectorError> {
        if !self.is_open() {
            return Ok(());
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let mut result = self.drain_inbound().map(|_| ());
        self.inbound = None;

        if self.schedule.is_pending() {
            if let Err(e) = self.cycle().await {
                result = result.and(Err(e));
            }
        }

        if let Err(e) = self.transport.lock().await.close().await {
            tracing::warn!("Failed to close link: {}", e);
            result = result.and(Err(e.into()));
        }
        self.started = None;

        if let Some(writer) = self.writer.take() {
            let capture = writer.path().to_path_buf();
            if let Err(e) = writer.close().await {
                self.report_trace_failure(&e);
                result = result.and(Err(e.into()));
            }
            if let Err(e) = self.convert_trace().await {
                tracing::warn!("Trace conversion of {} failed: {}", capture.display(), e);
                result = result.and(Err(e));
            }
        }

        tracing::info!("Reflector closed ({} packets received)", self.assembler.frames());
        result
    }

    async fn convert_trace(&self) -> Result<(), ReflectorError> {
        let Some(trace) = self.trace.clone() else {
            return Ok(());
        };

        let capture = capture_path_for(&trace.trace_file);
        let replay = TraceReplay::new(Arc::clone(&self.registry), self.send.width(), self.receive.width())
            .creator(&trace.creator)
            .timescale(&trace.timescale);

        let source = capture.clone();
        let target = trace.trace_file.clone();
        tokio::task::spawn_blocking(move || replay.convert(&source, &target))
            .await
            .map_err(|e| TraceError::Task(e.to_string()))??;

        if !trace.keep_capture_log {
            tokio::fs::remove_file(&capture).await.map_err(TraceError::from)?;
        }
        Ok(())
    }
}

impl Drop for Reflector {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for Reflector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reflector")
            .field("send", &self.send)
            .field("receive", &self.receive)
            .field("schedule", &self.schedule)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn spawn_reader(transport: SharedLink, tx: mpsc::Sender<Inbound>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let data = {
                let mut link = transport.lock().await;
                link.receive().await
            };

            match data {
                Ok(bytes) if !bytes.is_empty() => {
                    if tx.send(Ok(bytes)).await.is_err() {
                        break;
                    }
                }
                Ok(_) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => {
                    tracing::warn!("Link reader stopped: {}", e);
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    })
}
