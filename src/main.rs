//! Reflector CLI
//!
//! Runs a reflector against a serial-attached FPGA, prints field status on
//! every change and converts capture logs into VCD traces.

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use reflector_core::cli::{CliResult, ExitCodes};
use reflector_core::config::{default_config_path, FieldLayout};
use reflector_core::{
    list_ports, ConfigError, Reflector, ReflectorConfig, ReflectorError, ReflectorEvent, TraceReplay, TransportError,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// Reflector CLI
#[derive(Parser, Debug)]
#[command(
    name = "reflector",
    version,
    about = "Mirror FPGA bit fields over a serial link and trace them",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Run the reflector until Ctrl+C
    Run {
        /// Configuration file (defaults to the user config directory)
        #[arg(short, long, env = "REFLECTOR_CONFIG")]
        config: Option<PathBuf>,

        /// Serial port, overriding the configuration
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate, overriding the configuration
        #[arg(short, long)]
        baud: Option<u32>,

        /// Trace file, overriding the configuration
        #[arg(short, long)]
        trace: Option<PathBuf>,

        /// Cycle interval in milliseconds
        #[arg(long, default_value = "10")]
        tick_ms: u64,
    },

    /// Convert a capture log into a VCD trace
    Convert {
        /// Configuration the log was captured with
        #[arg(short, long, env = "REFLECTOR_CONFIG")]
        config: Option<PathBuf>,

        /// Capture log
        #[arg(long)]
        capture: PathBuf,

        /// Trace output
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::ListPorts => show_ports(cli.format),
        Commands::Run {
            config,
            port,
            baud,
            trace,
            tick_ms,
        } => match load_config(config.as_deref()) {
            Ok(mut cfg) => {
                apply_overrides(&mut cfg, port.as_deref(), *baud, trace.as_deref());
                run(&cfg, Duration::from_millis((*tick_ms).max(1)), cli.format).await
            }
            Err(e) => Err(e),
        },
        Commands::Convert {
            config,
            capture,
            output,
        } => match load_config(config.as_deref()) {
            Ok(cfg) => convert(&cfg, capture, output).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let outcome = exit_result(err);
            if let Some(msg) = outcome.message() {
                eprintln!("Error: {}", msg);
            }
            outcome.to_exit_code()
        }
    }
}

fn exit_result(err: anyhow::Error) -> CliResult {
    let err = match err.downcast::<ReflectorError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<ConfigError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    match err.downcast::<TransportError>() {
        Ok(e) => ReflectorError::from(e).into(),
        Err(err) => CliResult::error(ExitCodes::ERROR, format!("{:#}", err)),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ReflectorConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path().context("No configuration directory on this platform")?,
    };
    tracing::debug!("Loading configuration from {}", path.display());
    Ok(ReflectorConfig::load(&path)?)
}

fn apply_overrides(config: &mut ReflectorConfig, port: Option<&str>, baud: Option<u32>, trace: Option<&Path>) {
    if port.is_some() || baud.is_some() {
        let mut serial = config.serial.take().unwrap_or_default();
        if let Some(port) = port {
            serial.port = port.to_string();
        }
        if let Some(baud) = baud {
            serial.baud_rate = baud;
        }
        config.serial = Some(serial);
    }
    if let Some(trace) = trace {
        config.trace_file = Some(trace.to_path_buf());
    }
}

fn show_ports(format: OutputFormat) -> anyhow::Result<()> {
    let ports = list_ports()?;

    match format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for port in &ports {
                println!("{:<20} {:?}", port.port_name, port.port_type);
            }
        }
    }
    Ok(())
}

enum Wake {
    Inbound(Option<Result<Bytes, TransportError>>),
    Tick,
    Interrupted,
}

async fn run(config: &ReflectorConfig, tick: Duration, format: OutputFormat) -> anyhow::Result<()> {
    let mut reflector = Reflector::from_config(config)?;
    let mut events = reflector.subscribe();
    reflector.open().await?;

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome: Result<(), ReflectorError> = loop {
        let wake = tokio::select! {
            inbound = reflector.next_inbound() => Wake::Inbound(inbound),
            _ = ticker.tick() => Wake::Tick,
            _ = tokio::signal::ctrl_c() => Wake::Interrupted,
        };

        match wake {
            Wake::Inbound(Some(Ok(bytes))) => {
                reflector.feed(&bytes);
            }
            Wake::Inbound(Some(Err(e))) => break Err(e.into()),
            Wake::Inbound(None) => break Ok(()),
            Wake::Tick => {}
            Wake::Interrupted => {
                tracing::info!("Interrupted");
                break Ok(());
            }
        }

        if let Err(e) = reflector.cycle().await {
            break Err(e);
        }
        while let Ok(event) = events.try_recv() {
            if let Err(e) = report(&reflector, &event, format) {
                tracing::warn!("Status output failed: {:#}", e);
            }
        }
    };

    let closed = reflector.close().await;
    let stats = reflector.transport_stats().await;
    tracing::info!(
        "Link: {} bytes sent in {} packets, {} bytes received",
        stats.bytes_sent,
        stats.packets_sent,
        stats.bytes_received
    );

    outcome?;
    closed?;
    Ok(())
}

fn report(reflector: &Reflector, event: &ReflectorEvent, format: OutputFormat) -> anyhow::Result<()> {
    let ReflectorEvent::Changed { timestamp_ms } = event else {
        return Ok(());
    };

    match format {
        OutputFormat::Json => {
            let mut fields = serde_json::Map::new();
            for acc in reflector.registry().iter() {
                fields.insert(acc.name().to_string(), reflector.get(acc.name())?.into());
            }
            println!("{}", serde_json::json!({ "time_ms": timestamp_ms, "fields": fields }));
        }
        OutputFormat::Text => {
            let mut line = format!("{:>8} ms", timestamp_ms);
            for acc in reflector.registry().iter() {
                line.push_str(&format!(
                    "  {}={} {}",
                    acc.name(),
                    reflector.format_hex(acc.name())?,
                    reflector.format_leds(acc.name())?
                ));
            }
            println!("{}", line);
        }
    }
    Ok(())
}

async fn convert(config: &ReflectorConfig, capture: &Path, output: &Path) -> anyhow::Result<()> {
    let FieldLayout {
        registry,
        send_bits,
        receive_bits,
    } = config.layout()?;

    let replay = TraceReplay::new(Arc::new(registry), send_bits, receive_bits)
        .creator(&config.creator)
        .timescale(&config.timescale);
    let source = capture.to_path_buf();
    let target = output.to_path_buf();
    let summary = tokio::task::spawn_blocking(move || replay.convert(&source, &target))
        .await
        .context("Conversion task failed")?
        .map_err(ReflectorError::from)?;

    println!(
        "{} samples of {} signals written to {}",
        summary.records,
        summary.signals,
        output.display()
    );
    Ok(())
}
