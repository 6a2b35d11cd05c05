//! Per-channel queues and the two half-duplex reassembly state machines.
//!
//! A channel is purely data here — the transitions that drive it (on an
//! inbound packet, on a periodic tick) live in [`crate::engine`], which
//! is the one place allowed to mutate a [`ChannelState`] since all
//! channels share a single engine mutex.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{ChannelConfig, PAYLOAD_LEN};
use crate::queue::BoundedQueue;

/// A NACK payload can list at most `0xFFFE` distinct sequence numbers
/// before `0xFFFF` stops meaning "terminator". Blocks large enough to
/// need more packets than this are rejected at submit.
pub const MAX_TOTAL_PACKETS: u32 = 0xFFFE;

/// `total_packets = ceil(size / PAYLOAD_LEN) + 2` (BEGIN + DATA... + END).
pub fn total_packets_for(size: u32) -> u32 {
    let data_packets = (size as usize).div_ceil(PAYLOAD_LEN) as u32;
    data_packets + 2
}

/// Inbound reassembly state.
pub enum RxState {
    Idle,
    Receiving {
        total_size: u32,
        total_packets: u32,
        buffer: Vec<u8>,
        received: Vec<bool>,
        packets_received: usize,
        last_packet_time: Instant,
    },
}

/// Outbound segmentation state.
pub enum TxState {
    Idle,
    Sending {
        buffer: Vec<u8>,
        total_packets: u32,
        sent: Vec<bool>,
        next_seq: u32,
        retry_count: u32,
        last_send_time: Instant,
    },
}

/// Everything one logical channel owns.
pub struct ChannelState {
    pub index: u8,
    pub config: ChannelConfig,
    /// `Arc`-wrapped so a caller blocking in [`crate::engine::Engine::submit_block`]
    /// can clone the queue handle out and drop the channels-table lock
    /// before waiting on queue capacity.
    pub rx_queue: Arc<BoundedQueue<Vec<u8>>>,
    pub tx_queue: Arc<BoundedQueue<Vec<u8>>>,
    pub rx_state: RxState,
    pub tx_state: TxState,
}

impl ChannelState {
    pub fn new(index: u8, config: ChannelConfig) -> Self {
        ChannelState {
            index,
            config,
            rx_queue: Arc::new(BoundedQueue::new(config.rx_queue_capacity)),
            tx_queue: Arc::new(BoundedQueue::new(config.tx_queue_capacity)),
            rx_state: RxState::Idle,
            tx_state: TxState::Idle,
        }
    }

    pub fn is_tx_idle(&self) -> bool {
        matches!(self.tx_state, TxState::Idle)
    }
}
