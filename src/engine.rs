//! The RDT engine: the single-threaded, single-mutex state machine that
//! turns a best-effort link into per-channel reliable block delivery.
//!
//! Everything here is driven from one loop (see [`Engine::spawn`]):
//! drain at most one inbound frame from the dispatcher's event queue,
//! then sweep every channel's transmit state machine so retries and
//! pending sends make progress whether or not a frame arrived. All of
//! it runs under [`Engine::channels`]'s single mutex, matching the "one
//! mutex protects all channel state" resource policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::channel::{total_packets_for, ChannelState, RxState, TxState, MAX_TOTAL_PACKETS};
use crate::config::{EngineConfig, ACK_TIMEOUT, ENGINE_TICK, MAX_CHANNELS, MAX_RETRY, PAYLOAD_LEN};
use crate::link::{LinkPort, PeerAddr};
use crate::packet::{Packet, ServiceCode};
use crate::payload::{decode_begin, decode_nack, encode_begin, encode_nack};
use crate::queue::BoundedQueue;

/// Why [`Engine::submit_block`] refused a block before it ever reached
/// the tx_queue.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SubmitError {
    InvalidChannel,
    EmptyBlock,
    TooLarge,
    QueueFull,
}

struct ChannelSignal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl ChannelSignal {
    fn new() -> Self {
        ChannelSignal { generation: Mutex::new(0), condvar: Condvar::new() }
    }

    fn notify(&self) {
        let mut generation = self.generation.lock().unwrap();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Blocks until a delivery happens on this channel or `timeout`
    /// elapses. Returns whether a delivery was observed.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.generation.lock().unwrap();
        let start = *guard;
        let (_, result) = self
            .condvar
            .wait_timeout_while(guard, timeout, |g| *g == start)
            .unwrap();
        !result.timed_out()
    }
}

/// Owns every channel's state and drives both RDT state machines. Shared
/// across threads behind an `Arc`; construct with [`Engine::new`] and
/// start the driving loop with [`Engine::spawn`].
pub struct Engine {
    link: Arc<dyn LinkPort>,
    peer: Arc<Mutex<Option<PeerAddr>>>,
    channels: Mutex<Vec<ChannelState>>,
    event_queue: BoundedQueue<Vec<u8>>,
    signals: Vec<ChannelSignal>,
    running: AtomicBool,
}

impl Engine {
    pub fn new(link: Arc<dyn LinkPort>, config: EngineConfig) -> Arc<Self> {
        let channels = (0..MAX_CHANNELS)
            .map(|i| ChannelState::new(i as u8, config.channels[i]))
            .collect();
        let signals = (0..MAX_CHANNELS).map(|_| ChannelSignal::new()).collect();

        Arc::new(Engine {
            link,
            peer: Arc::new(Mutex::new(None)),
            channels: Mutex::new(channels),
            event_queue: BoundedQueue::new(config.event_queue_capacity),
            signals,
            running: AtomicBool::new(true),
        })
    }

    /// Shared handle to the currently paired peer, as updated by the
    /// pairing state machine's finalize/revert.
    pub fn peer_handle(&self) -> Arc<Mutex<Option<PeerAddr>>> {
        self.peer.clone()
    }

    /// Directly set the peer this engine addresses outbound frames to.
    /// Pairing reaches the same cell through [`Engine::peer_handle`];
    /// this is the entry point for a deployment that already knows its
    /// peer (e.g. a single statically-configured link) and skips pairing.
    pub fn set_peer(&self, addr: PeerAddr) {
        *self.peer.lock().unwrap() = Some(addr);
    }

    pub fn link(&self) -> Arc<dyn LinkPort> {
        self.link.clone()
    }

    /// Called by the dispatcher for every frame it recognizes as an RDT
    /// packet (see [`crate::dispatcher::Dispatcher::on_frame`]). Never
    /// blocks; drops the frame and logs if the event queue is full.
    pub fn enqueue_frame(&self, frame: Vec<u8>) {
        if self.event_queue.try_push(frame).is_err() {
            warn!("rdt: event queue full, dropping inbound frame");
        }
    }

    /// Validate and enqueue a block for transmission on `channel`,
    /// waiting up to `timeout` for room in the channel's tx_queue.
    pub fn submit_block(&self, channel: u8, block: Vec<u8>, timeout: Duration) -> Result<(), SubmitError> {
        if block.is_empty() {
            return Err(SubmitError::EmptyBlock);
        }

        let channels = self.channels.lock().unwrap();
        let state = channels.get(channel as usize).ok_or(SubmitError::InvalidChannel)?;

        if block.len() > state.config.max_block_size {
            return Err(SubmitError::TooLarge);
        }
        if total_packets_for(block.len() as u32) > MAX_TOTAL_PACKETS {
            return Err(SubmitError::TooLarge);
        }

        // Clone the queue handle and drop the channels lock before a
        // potentially-blocking push, so the engine loop is never starved
        // behind a full tx_queue.
        let tx_queue = state.tx_queue.clone();
        drop(channels);
        match tx_queue.push_timeout(block, timeout) {
            Ok(()) => Ok(()),
            Err(_) => Err(SubmitError::QueueFull),
        }
    }

    /// Pull the next delivered block off `channel`'s rx_queue, if any.
    pub fn try_recv(&self, channel: u8) -> Option<Vec<u8>> {
        self.channels.lock().unwrap().get(channel as usize)?.rx_queue.try_pop()
    }

    /// The configured maximum block size for `channel`, if it exists.
    pub fn channel_max_block_size(&self, channel: u8) -> Option<usize> {
        Some(self.channels.lock().unwrap().get(channel as usize)?.config.max_block_size)
    }

    /// Pop a block straight off `channel`'s tx_queue, bypassing the wire.
    /// Lets a single-process test stand in for the peer on the other end
    /// of the link without encoding/decoding a full packet stream.
    #[cfg(test)]
    pub(crate) fn try_pop_tx(&self, channel: u8) -> Option<Vec<u8>> {
        self.channels.lock().unwrap().get(channel as usize)?.tx_queue.try_pop()
    }

    /// Block the calling thread until a delivery happens on `channel` or
    /// `timeout` elapses. Returns whether a delivery was observed (the
    /// consumer should still `try_recv` — another waiter may have drained
    /// it first).
    pub fn wait_for_delivery(&self, channel: u8, timeout: Duration) -> bool {
        match self.signals.get(channel as usize) {
            Some(signal) => signal.wait(timeout),
            None => false,
        }
    }

    fn send_packet(&self, packet: &Packet) -> bool {
        let peer = *self.peer.lock().unwrap();
        match peer {
            Some(addr) => self.link.send(addr, &packet.encode()),
            None => {
                debug!("rdt: no peer registered, dropping outbound frame");
                false
            }
        }
    }

    /// Run one iteration: drain at most one inbound frame (waiting up to
    /// [`ENGINE_TICK`] if none is ready), then sweep every channel's
    /// transmit state machine. Call this from a loop; [`Engine::spawn`]
    /// does exactly that on a dedicated thread.
    pub fn run_once(&self) {
        if let Some(frame) = self.event_queue.pop_timeout(ENGINE_TICK) {
            self.handle_frame(&frame);
        }

        let mut channels = self.channels.lock().unwrap();
        for state in channels.iter_mut() {
            self.transmit_tick(state);
        }
    }

    /// Spawn the driving loop on its own thread. The returned handle can
    /// be joined after calling [`Engine::stop`].
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        thread::spawn(move || {
            while engine.running.load(Ordering::Acquire) {
                engine.run_once();
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn handle_frame(&self, frame: &[u8]) {
        let packet = match Packet::decode(frame) {
            Some(packet) => packet,
            None => {
                debug!("rdt: dropping frame that failed CRC/format validation");
                return;
            }
        };

        let mut channels = self.channels.lock().unwrap();
        let Some(state) = channels.get_mut(packet.channel as usize) else {
            debug!("rdt: frame for unknown channel {}", packet.channel);
            return;
        };

        match packet.service_code {
            ServiceCode::Begin => self.rx_begin(state, decode_begin(&packet.payload)),
            ServiceCode::Data => self.rx_data(state, packet.seq, &packet.payload),
            ServiceCode::End => self.rx_end(state, packet.seq),
            ServiceCode::Ask => self.tx_ask(state),
            ServiceCode::Nack => self.tx_nack(state, &decode_nack(&packet.payload)),
        }
    }

    // -- Receive state machine (§4.3.2) -----------------------------------

    fn rx_begin(&self, state: &mut ChannelState, declared_size: u32) {
        if matches!(state.rx_state, RxState::Receiving { .. }) {
            debug!("rdt: channel {} BEGIN while receiving, discarding prior buffer", state.index);
        }

        let total_size = declared_size.min(state.config.max_block_size as u32);
        let total_packets = total_packets_for(total_size);
        let mut received = vec![false; total_packets as usize];
        received[0] = true;

        state.rx_state = RxState::Receiving {
            total_size,
            total_packets,
            buffer: vec![0u8; total_size as usize],
            received,
            packets_received: 1,
            last_packet_time: Instant::now(),
        };
    }

    fn rx_data(&self, state: &mut ChannelState, seq: u16, payload: &[u8; PAYLOAD_LEN]) {
        let RxState::Receiving { total_size, total_packets, buffer, received, packets_received, last_packet_time } =
            &mut state.rx_state
        else {
            debug!("rdt: channel {} DATA before BEGIN, ignoring", state.index);
            return;
        };

        let seq = seq as u32;
        if seq == 0 || seq > *total_packets - 2 {
            return;
        }
        let index = seq as usize;
        if received[index] {
            return; // duplicate, idempotent no-op
        }

        let offset = (seq - 1) as usize * PAYLOAD_LEN;
        if offset < *total_size as usize {
            let len = payload.len().min(*total_size as usize - offset);
            buffer[offset..offset + len].copy_from_slice(&payload[..len]);
        }

        received[index] = true;
        *packets_received += 1;
        *last_packet_time = Instant::now();
    }

    fn rx_end(&self, state: &mut ChannelState, seq: u16) {
        let channel = state.index;

        // `missing` is `None` once reassembly is complete; `Some` otherwise
        // (possibly empty only transiently, between the mark and the count
        // check — in practice an empty `Some` cannot happen here).
        let missing = {
            let RxState::Receiving { total_packets, received, packets_received, .. } = &mut state.rx_state else {
                return;
            };

            let end_seq = *total_packets - 1;
            if seq as u32 != end_seq {
                return;
            }
            if !received[end_seq as usize] {
                received[end_seq as usize] = true;
                *packets_received += 1;
            }

            if *packets_received == *total_packets as usize {
                None
            } else {
                Some(
                    received
                        .iter()
                        .enumerate()
                        .filter(|(_, done)| !**done)
                        .map(|(i, _)| i as u16)
                        .collect::<Vec<u16>>(),
                )
            }
        };

        match missing {
            Some(missing) => {
                self.send_packet(&Packet::new(channel, 0, ServiceCode::Nack, encode_nack(&missing)));
            }
            None => {
                let RxState::Receiving { buffer, .. } = std::mem::replace(&mut state.rx_state, RxState::Idle) else {
                    unreachable!("checked above that rx_state was Receiving")
                };

                self.send_packet(&Packet::new(channel, 0, ServiceCode::Ask, [0u8; PAYLOAD_LEN]));

                match state.rx_queue.try_push(buffer) {
                    Ok(()) => {
                        if let Some(signal) = self.signals.get(channel as usize) {
                            signal.notify();
                        }
                    }
                    Err(_) => warn!("rdt: channel {} rx_queue full, dropping reassembled block", channel),
                }
            }
        }
    }

    // -- Transmit state machine (§4.3.1) ----------------------------------

    fn segment_payload(buffer: &[u8], seq: u32) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        let offset = (seq as usize - 1) * PAYLOAD_LEN;
        let end = (offset + PAYLOAD_LEN).min(buffer.len());
        if offset < end {
            payload[..end - offset].copy_from_slice(&buffer[offset..end]);
        }
        payload
    }

    fn send_segment(&self, channel: u8, buffer: &[u8], total_packets: u32, seq: u32) {
        let packet = if seq == 0 {
            Packet::new(channel, 0, ServiceCode::Begin, encode_begin(buffer.len() as u32))
        } else if seq == total_packets - 1 {
            Packet::new(channel, seq as u16, ServiceCode::End, [0u8; PAYLOAD_LEN])
        } else {
            Packet::new(channel, seq as u16, ServiceCode::Data, Self::segment_payload(buffer, seq))
        };
        self.send_packet(&packet);
    }

    fn transmit_tick(&self, state: &mut ChannelState) {
        if matches!(state.tx_state, TxState::Idle) {
            let Some(block) = state.tx_queue.try_pop() else { return };
            self.start_send(state, block);
            return;
        }

        let timed_out = match &state.tx_state {
            TxState::Sending { last_send_time, .. } => last_send_time.elapsed() > ACK_TIMEOUT,
            TxState::Idle => false,
        };

        if timed_out {
            self.retry_or_abort(state);
        } else {
            self.send_remaining(state);
        }
    }

    fn start_send(&self, state: &mut ChannelState, block: Vec<u8>) {
        let channel = state.index;
        let total_packets = total_packets_for(block.len() as u32);
        let mut sent = vec![false; total_packets as usize];

        self.send_segment(channel, &block, total_packets, 0);
        sent[0] = true;

        state.tx_state = TxState::Sending {
            buffer: block,
            total_packets,
            sent,
            next_seq: 1,
            retry_count: 0,
            last_send_time: Instant::now(),
        };
        // Burst the rest of the segments immediately; NACK/timeout handles
        // anything the link drops.
        self.send_remaining(state);
    }

    fn send_remaining(&self, state: &mut ChannelState) {
        let channel = state.index;
        let TxState::Sending { buffer, total_packets, sent, next_seq, .. } = &mut state.tx_state else { return };

        while *next_seq < *total_packets {
            let seq = *next_seq;
            if !sent[seq as usize] {
                self.send_segment(channel, buffer, *total_packets, seq);
                sent[seq as usize] = true;
            }
            *next_seq += 1;
        }
    }

    fn retry_or_abort(&self, state: &mut ChannelState) {
        let channel = state.index;

        let aborted = {
            let TxState::Sending { retry_count, sent, .. } = &mut state.tx_state else { return };
            *retry_count += 1;
            let abort = *retry_count >= MAX_RETRY;
            if !abort {
                for slot in sent.iter_mut() {
                    *slot = false;
                }
            }
            abort
        };

        if aborted {
            warn!("rdt: channel {} max retries exceeded, abandoning send", channel);
            state.tx_state = TxState::Idle;
            return;
        }

        if let TxState::Sending { buffer, total_packets, sent, next_seq, last_send_time, .. } = &mut state.tx_state {
            self.send_segment(channel, buffer, *total_packets, 0);
            sent[0] = true;
            *next_seq = 1;
            *last_send_time = Instant::now();
        }

        self.send_remaining(state);
    }

    fn tx_ask(&self, state: &mut ChannelState) {
        state.tx_state = TxState::Idle;
    }

    fn tx_nack(&self, state: &mut ChannelState, missing: &[u16]) {
        let channel = state.index;
        let TxState::Sending { buffer, total_packets, sent, .. } = &mut state.tx_state else { return };
        for &seq in missing {
            if (seq as u32) < *total_packets {
                self.send_segment(channel, buffer, *total_packets, seq as u32);
                sent[seq as usize] = true;
            }
        }
    }
}
