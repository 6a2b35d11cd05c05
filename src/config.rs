//! Wire-fixed constants and the tunables an embedder is allowed to vary.
//!
//! [`PAYLOAD_LEN`] and the channel layout are bit-exact parts of the wire
//! format (see the packet codec) and are not configurable. Everything in
//! [`EngineConfig`] is a local policy knob: queue depths, timeouts, retry
//! budget, and the maximum block size accepted per channel.

use std::time::Duration;

/// Payload bytes carried by a single packet.
pub const PAYLOAD_LEN: usize = 192;

/// Number of logical channels.
pub const MAX_CHANNELS: usize = 4;

/// Fixed channel assignments.
pub const CHANNEL_SYSTEM: u8 = 0;
pub const CHANNEL_SENSORS: u8 = 1;
pub const CHANNEL_PARAMS: u8 = 2;
pub const CHANNEL_FILES: u8 = 3;

/// Time a sender waits for progress (ASK/NACK/DATA) before retrying.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Number of retransmission cycles before a send is abandoned.
pub const MAX_RETRY: u32 = 5;

/// Upper bound on a single reassembled block, regardless of channel config.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Default capacity of a channel's rx/tx queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// Minimum capacity of the dispatcher's inbound frame queue.
pub const MIN_EVENT_QUEUE_CAPACITY: usize = 30;

/// Engine loop poll interval when the event queue is empty.
pub const ENGINE_TICK: Duration = Duration::from_millis(50);

/// Pairing broadcast interval.
pub const PAIR_BROADCAST_INTERVAL: Duration = Duration::from_secs(1);

/// Pairing session timeout.
pub const PAIR_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum parameter payload, per the parameter registry's framing.
pub const MAX_PARAM_PAYLOAD: usize = 8 * 1024;

/// Per-channel runtime configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Capacity of the inbound delivered-block queue.
    pub rx_queue_capacity: usize,
    /// Capacity of the outbound pending-block queue.
    pub tx_queue_capacity: usize,
    /// Largest block this channel will reassemble or submit.
    pub max_block_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            rx_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tx_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_block_size: 512,
        }
    }
}

/// Whole-engine configuration: one [`ChannelConfig`] per channel plus the
/// dispatcher's shared event-queue depth.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub channels: [ChannelConfig; MAX_CHANNELS],
    pub event_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut channels = [ChannelConfig::default(); MAX_CHANNELS];
        // Files carry larger payloads than system/sensor/param traffic.
        channels[CHANNEL_FILES as usize].max_block_size = 4096 + 256;
        EngineConfig {
            channels,
            event_queue_capacity: MIN_EVENT_QUEUE_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn channel(&self, channel: u8) -> Option<&ChannelConfig> {
        self.channels.get(channel as usize)
    }
}
