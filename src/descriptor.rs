//! Negotiated device capability descriptor.
//!
//! A [`DeviceDescriptor`] is produced once during capability negotiation and
//! is immutable afterwards — reconnecting replaces it wholesale. It is the
//! stable contract downstream consumers (decoders, UIs) read, and the record
//! every capture plan is validated against.

use serde::{Deserialize, Serialize};

/// Coarse transport family the device was reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Network,
}

/// Trigger modes a device can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Single-channel edge trigger.
    Edge,
    /// Single-channel level trigger.
    Level,
    /// Multi-channel bit-pattern trigger.
    Pattern,
}

/// Optional device features surfaced to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub flow_control: bool,
    pub streaming: bool,
    pub voltage_monitoring: bool,
}

/// Immutable description of a connected device's capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub firmware_version: String,
    pub channel_count: u8,
    pub min_sample_rate_hz: u32,
    pub max_sample_rate_hz: u32,
    /// Total samples (pre + post trigger) the device can buffer.
    pub buffer_size: u32,
    pub trigger_kinds: Vec<TriggerKind>,
    pub transport: TransportKind,
    pub features: FeatureFlags,
}

impl DeviceDescriptor {
    /// Minimally-populated descriptor used when capability negotiation cannot
    /// learn anything from the device. Negotiation is best-effort, so a
    /// connect always yields at least this.
    pub fn fallback(transport: TransportKind) -> Self {
        let (channel_count, max_sample_rate_hz, features) = match transport {
            TransportKind::Serial => (8, 24_000_000, FeatureFlags::default()),
            TransportKind::Network => (
                16,
                100_000_000,
                FeatureFlags {
                    streaming: true,
                    ..FeatureFlags::default()
                },
            ),
        };

        Self {
            name: "unknown".to_string(),
            firmware_version: "unknown".to_string(),
            channel_count,
            min_sample_rate_hz: 1_000,
            max_sample_rate_hz,
            buffer_size: buffer_for_channels(channel_count),
            trigger_kinds: vec![TriggerKind::Edge, TriggerKind::Pattern],
            transport,
            features,
        }
    }

    pub fn supports_trigger(&self, kind: TriggerKind) -> bool {
        self.trigger_kinds.contains(&kind)
    }
}

/// Default buffer depth for a given channel count.
///
/// The available buffer halves for each additional group of 8 channels:
/// 8 -> 131072, 16 -> 65536, 24 -> 32768. Devices that report an explicit
/// buffer size during negotiation override this.
pub fn buffer_for_channels(channel_count: u8) -> u32 {
    const BASE: u32 = 131_072;
    let groups = u32::from(channel_count.max(1)).div_ceil(8);
    BASE >> (groups - 1).min(31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_scaling() {
        assert_eq!(buffer_for_channels(8), 131_072);
        assert_eq!(buffer_for_channels(16), 65_536);
        assert_eq!(buffer_for_channels(24), 32_768);
        // Partial groups round up.
        assert_eq!(buffer_for_channels(9), 65_536);
        assert_eq!(buffer_for_channels(1), 131_072);
    }

    #[test]
    fn test_fallback_serial() {
        let d = DeviceDescriptor::fallback(TransportKind::Serial);
        assert_eq!(d.channel_count, 8);
        assert_eq!(d.buffer_size, 131_072);
        assert!(d.supports_trigger(TriggerKind::Edge));
        assert!(!d.supports_trigger(TriggerKind::Level));
    }

    #[test]
    fn test_fallback_network_streams() {
        let d = DeviceDescriptor::fallback(TransportKind::Network);
        assert!(d.features.streaming);
        assert_eq!(d.buffer_size, 65_536);
    }

    #[test]
    fn test_descriptor_serializes() {
        let d = DeviceDescriptor::fallback(TransportKind::Serial);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["transport"], "serial");
        assert_eq!(json["channel_count"], 8);
    }
}
