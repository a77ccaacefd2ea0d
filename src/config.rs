//! Configuration management.
//!
//! Settings are loaded from TOML via the `config` crate and cover the three
//! things a session needs before it can talk to hardware: which transport to
//! open, which protocol family the device speaks, and the timeout budget for
//! connect / command / capture / polling. Duration fields use human-readable
//! strings ("10s", "100ms") through `humantime-serde`.

use crate::descriptor::TransportKind;
use crate::error::{LaError, LaResult};
use config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log_level: String,
    pub device: DeviceSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSettings {
    pub transport: TransportConfig,
    pub protocol: ProtocolFamily,
}

/// How to reach the device.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Serial { port: String, baud_rate: u32 },
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    /// In-memory transport, paired with a scripted mock analyzer.
    Mock,
}

impl TransportConfig {
    /// Parse a CLI target string.
    ///
    /// Accepted forms: `serial:/dev/ttyUSB0:115200`, `tcp:host:port`,
    /// `udp:host:port`, `mock`.
    pub fn parse(target: &str) -> LaResult<Self> {
        if target == "mock" {
            return Ok(TransportConfig::Mock);
        }

        let (scheme, rest) = target
            .split_once(':')
            .ok_or_else(|| LaError::Config(format!("Invalid target '{target}'")))?;

        match scheme {
            "serial" => {
                // The port path may itself contain ':' on some platforms, so
                // split the baud rate off the end.
                let (port, baud) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| LaError::Config(format!("Invalid serial target '{target}'")))?;
                let baud_rate = baud
                    .parse::<u32>()
                    .map_err(|_| LaError::Config(format!("Invalid baud rate '{baud}'")))?;
                Ok(TransportConfig::Serial {
                    port: port.to_string(),
                    baud_rate,
                })
            }
            "tcp" | "udp" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| LaError::Config(format!("Invalid network target '{target}'")))?;
                let port = port
                    .parse::<u16>()
                    .map_err(|_| LaError::Config(format!("Invalid port '{port}'")))?;
                if scheme == "tcp" {
                    Ok(TransportConfig::Tcp {
                        host: host.to_string(),
                        port,
                    })
                } else {
                    Ok(TransportConfig::Udp {
                        host: host.to_string(),
                        port,
                    })
                }
            }
            other => Err(LaError::Config(format!("Unknown transport '{other}'"))),
        }
    }

    /// The coarse transport family, as recorded in the device descriptor.
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Serial { .. } => TransportKind::Serial,
            TransportConfig::Tcp { .. } | TransportConfig::Udp { .. } => TransportKind::Network,
            TransportConfig::Mock => TransportKind::Network,
        }
    }
}

/// Wire framing spoken by the device.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// ASCII line commands, FIFO response matching.
    Text,
    /// Single-line JSON objects carrying an `id` field.
    Json,
    /// Length-prefixed binary frames behind a 0x55AA sync marker.
    Binary,
}

impl std::str::FromStr for ProtocolFamily {
    type Err = LaError;

    fn from_str(value: &str) -> LaResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(ProtocolFamily::Text),
            "json" => Ok(ProtocolFamily::Json),
            "binary" => Ok(ProtocolFamily::Binary),
            other => Err(LaError::Config(format!(
                "Unknown protocol '{other}'. Expected text|json|binary"
            ))),
        }
    }
}

/// Timeout budget for one session.
///
/// `command` bounds a single request/response exchange; `capture` bounds a
/// whole acquisition independently of the per-command timeout.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TimeoutSettings {
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    #[serde(with = "humantime_serde")]
    pub command: Duration,
    #[serde(with = "humantime_serde")]
    pub capture: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            command: Duration::from_secs(2),
            capture: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Settings {
    pub fn new(config_name: Option<&str>) -> LaResult<Self> {
        let config_path = config_name.unwrap_or("config/default");
        let s = Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()?;

        Ok(s.try_deserialize()?)
    }
}
