//! CLI entry point for rust-la.
//!
//! Provides command-line access to the session engine:
//! - Querying a device's capability descriptor
//! - Running a one-shot capture and printing a summary
//! - Inspecting the live session status snapshot
//!
//! # Usage
//!
//! Identify a device on a serial port:
//! ```bash
//! rust_la --target serial:/dev/ttyUSB0:115200 identify
//! ```
//!
//! Capture 1024 post-trigger samples from the built-in mock analyzer:
//! ```bash
//! rust_la --target mock capture --rate 1000000 --channels 0,1,2 --post 1024
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use rust_la::capture::{CaptureChannel, CaptureOutcome, CaptureSession, TriggerConfig};
use rust_la::config::{DeviceSettings, Settings, TimeoutSettings, TransportConfig};
use rust_la::mock_device::{MockAnalyzer, MockAnalyzerConfig};
use rust_la::session::DeviceSession;
use rust_la::transport;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "rust-la")]
#[command(about = "Logic analyzer control and capture engine", long_about = None)]
struct Cli {
    /// Device target: serial:/dev/ttyUSB0:115200, tcp:host:port,
    /// udp:host:port, or mock
    #[arg(long, default_value = "mock")]
    target: String,

    /// Protocol family: text, json, or binary
    #[arg(long, default_value = "text")]
    protocol: String,

    /// TOML settings file (overrides --target/--protocol)
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print the negotiated device descriptor
    Identify,

    /// Connect and print the session status snapshot
    Status,

    /// Run one capture and print a per-channel summary
    Capture {
        /// Sample rate in Hz
        #[arg(long, default_value_t = 1_000_000)]
        rate: u32,

        /// Comma-separated channel indices
        #[arg(long, default_value = "0,1")]
        channels: String,

        /// Pre-trigger sample count
        #[arg(long, default_value_t = 0)]
        pre: u32,

        /// Post-trigger sample count
        #[arg(long, default_value_t = 1024)]
        post: u32,

        /// Trigger channel (defaults to the first captured channel)
        #[arg(long)]
        trigger_channel: Option<u8>,

        /// Trigger on the falling edge instead of the rising one
        #[arg(long)]
        inverted: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (device, timeouts) = match &cli.config {
        Some(path) => {
            let settings = Settings::new(Some(path))?;
            env_logger::Builder::new()
                .parse_filters(&settings.log_level)
                .init();
            (settings.device, settings.timeouts)
        }
        None => {
            env_logger::init();
            let device = DeviceSettings {
                transport: TransportConfig::parse(&cli.target)?,
                protocol: cli.protocol.parse()?,
            };
            (device, TimeoutSettings::default())
        }
    };

    let session = connect(&device, timeouts).await?;
    println!(
        "🔌 Connected: {} (firmware {})",
        session.descriptor().name,
        session.descriptor().firmware_version
    );

    let result = match cli.command {
        Commands::Identify => identify(&session),
        Commands::Status => status(&session).await,
        Commands::Capture {
            rate,
            channels,
            pre,
            post,
            trigger_channel,
            inverted,
        } => run_capture(&session, rate, &channels, pre, post, trigger_channel, inverted).await,
    };

    session.disconnect().await;
    result
}

async fn connect(device: &DeviceSettings, timeouts: TimeoutSettings) -> Result<DeviceSession> {
    if device.transport == TransportConfig::Mock {
        let (mock, remote) = transport::mock::pair();
        MockAnalyzer::spawn(
            MockAnalyzerConfig {
                family: device.protocol,
                ..MockAnalyzerConfig::default()
            },
            remote,
        );
        Ok(DeviceSession::connect_with_transport(Box::new(mock), device.protocol, timeouts).await?)
    } else {
        Ok(DeviceSession::connect(device, timeouts).await?)
    }
}

fn identify(session: &DeviceSession) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(session.descriptor())?);
    Ok(())
}

async fn status(session: &DeviceSession) -> Result<()> {
    let snapshot = session.status().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn run_capture(
    session: &DeviceSession,
    rate: u32,
    channels: &str,
    pre: u32,
    post: u32,
    trigger_channel: Option<u8>,
    inverted: bool,
) -> Result<()> {
    let indices = channels
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| anyhow!("Invalid channel list '{channels}'"))?;

    let first = indices.first().copied().unwrap_or(0);
    let mut trigger = TriggerConfig::edge(trigger_channel.unwrap_or(first));
    trigger.inverted = inverted;

    let plan = CaptureSession {
        sample_rate_hz: rate,
        pre_trigger_samples: pre,
        post_trigger_samples: post,
        trigger,
        channels: indices
            .iter()
            .map(|&i| CaptureChannel::new(i, format!("CH{i}")))
            .collect(),
        burst_count: 1,
    };

    println!(
        "📡 Capturing {} samples on {} channels at {} Hz...",
        plan.total_samples(),
        plan.channels.len(),
        rate
    );

    let handle = session.start_capture(plan).await?;
    let outcome = handle
        .await
        .map_err(|_| anyhow!("Capture runner dropped without an outcome"))?;

    print_outcome(&outcome);
    match outcome.error {
        None => Ok(()),
        Some(e) => Err(e.into()),
    }
}

fn print_outcome(outcome: &CaptureOutcome) {
    match &outcome.error {
        None => {
            println!("✅ Capture complete");
            for channel in &outcome.session.channels {
                let samples = channel.samples.as_deref().unwrap_or(&[]);
                let head: String = samples
                    .iter()
                    .take(32)
                    .map(|&s| if s == 0 { '0' } else { '1' })
                    .collect();
                println!(
                    "   {:>6}: {} samples  [{head}...]",
                    channel.label,
                    samples.len()
                );
            }
        }
        Some(e) => {
            eprintln!("❌ Capture failed: {e}");
        }
    }
}
