//! Capability negotiation.
//!
//! Issued once per connect, through the same correlated command path as
//! everything else. Negotiation is best-effort: an identification failure, or
//! any failed follow-up query, falls back to transport-family defaults rather
//! than failing the connect — a minimally-populated descriptor is always
//! produced.

use crate::config::TimeoutSettings;
use crate::descriptor::{buffer_for_channels, DeviceDescriptor, TransportKind};
use crate::profile::{CommandSet, DeviceQuery};
use crate::session::CommandHandle;
use log::{debug, warn};

/// Query the device and build its descriptor.
pub async fn negotiate(
    handle: &CommandHandle,
    commands: &dyn CommandSet,
    transport: TransportKind,
    timeouts: &TimeoutSettings,
) -> DeviceDescriptor {
    let mut descriptor = DeviceDescriptor::fallback(transport);

    let identity = match handle
        .command(commands.query(DeviceQuery::Identify), timeouts.command)
        .await
    {
        Ok(frame) => commands.parse_identify(&frame),
        Err(e) => {
            warn!("Identification failed ({e}); using {transport:?} defaults");
            return descriptor;
        }
    };

    match identity {
        Some((name, firmware)) => {
            descriptor.name = name;
            descriptor.firmware_version = firmware;
        }
        None => {
            warn!("Unparseable identification reply; using {transport:?} defaults");
            return descriptor;
        }
    }

    if let Some(count) = query_number(handle, commands, DeviceQuery::ChannelCount, timeouts).await
    {
        descriptor.channel_count = count.min(u64::from(u8::MAX)) as u8;
        // Reported channel count implies a buffer depth until the device says
        // otherwise below.
        descriptor.buffer_size = buffer_for_channels(descriptor.channel_count);
    }

    if let Some(rate) = query_number(handle, commands, DeviceQuery::MaxSampleRate, timeouts).await
    {
        descriptor.max_sample_rate_hz = rate.min(u64::from(u32::MAX)) as u32;
    }

    if let Some(size) = query_number(handle, commands, DeviceQuery::BufferSize, timeouts).await {
        descriptor.buffer_size = size.min(u64::from(u32::MAX)) as u32;
    }

    debug!(
        "Negotiated descriptor: {} ch, {} Hz max, {} sample buffer",
        descriptor.channel_count, descriptor.max_sample_rate_hz, descriptor.buffer_size
    );
    descriptor
}

async fn query_number(
    handle: &CommandHandle,
    commands: &dyn CommandSet,
    query: DeviceQuery,
    timeouts: &TimeoutSettings,
) -> Option<u64> {
    match handle.command(commands.query(query), timeouts.command).await {
        Ok(frame) => {
            let value = commands.parse_number(&frame);
            if value.is_none() {
                warn!("Unparseable reply to {query:?}; keeping default");
            }
            value
        }
        Err(e) => {
            warn!("Capability query {query:?} failed ({e}); keeping default");
            None
        }
    }
}
