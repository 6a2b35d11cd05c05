//! End-to-end RDT transport tests driven entirely through the public
//! API: two `Engine`s wired by a link that can drop specific wire
//! frames on command, exercising the scenarios and round-trip laws from
//! the transport's design (drop+NACK recovery, ASK loss+retry, and
//! arbitrary-size blocks surviving arbitrary drop patterns).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;

use rdtlink::config::EngineConfig;
use rdtlink::dispatcher::Dispatcher;
use rdtlink::engine::Engine;
use rdtlink::link::{LinkPort, PeerAddr};
use rdtlink::packet::Packet;

/// A link that forwards every frame straight into the peer's
/// dispatcher, except frames whose `(service_code, seq)` appear in
/// `drop_once` — each such pair is dropped exactly once, then allowed
/// through (modeling a lossy link, not a permanently broken one).
struct LossyLink {
    peer: Mutex<Option<Arc<Dispatcher>>>,
    drop_once: Mutex<HashSet<(u8, u16)>>,
}

impl LossyLink {
    fn new() -> Arc<Self> {
        Arc::new(LossyLink { peer: Mutex::new(None), drop_once: Mutex::new(HashSet::new()) })
    }

    fn connect(&self, peer: Arc<Dispatcher>) {
        *self.peer.lock().unwrap() = Some(peer);
    }

    fn drop_next(&self, service_code: u8, seq: u16) {
        self.drop_once.lock().unwrap().insert((service_code, seq));
    }
}

impl LinkPort for LossyLink {
    fn send(&self, _peer: PeerAddr, frame: &[u8]) -> bool {
        if let Some(packet) = Packet::decode(frame) {
            let key = (packet.service_code as u8, packet.seq);
            if self.drop_once.lock().unwrap().remove(&key) {
                return true; // dropped, but reported as "sent" — the link is best-effort
            }
        }
        match &*self.peer.lock().unwrap() {
            Some(dispatcher) => {
                dispatcher.on_frame(frame);
                true
            }
            None => false,
        }
    }

    fn broadcast(&self, frame: &[u8]) -> bool {
        self.send([0; 6], frame)
    }

    fn register_peer(&self, _peer: PeerAddr) {}
}

struct Harness {
    sender_link: Arc<LossyLink>,
    sender_engine: Arc<Engine>,
    receiver_engine: Arc<Engine>,
}

fn harness() -> Harness {
    let sender_link = LossyLink::new();
    let receiver_link = LossyLink::new();

    let sender_engine = Engine::new(sender_link.clone(), EngineConfig::default());
    let receiver_engine = Engine::new(receiver_link.clone(), EngineConfig::default());
    // Both engines address the same dummy peer; `LossyLink::send` ignores
    // the address and always forwards to whichever dispatcher it was
    // `connect`-ed to, so any non-zero placeholder works here. Without a
    // registered peer `Engine::send_packet` drops every outbound frame.
    sender_engine.set_peer([1; 6]);
    receiver_engine.set_peer([2; 6]);
    sender_engine.spawn();
    receiver_engine.spawn();

    let sender_dispatcher = Arc::new(Dispatcher::new(sender_engine.clone(), 32));
    let receiver_dispatcher = Arc::new(Dispatcher::new(receiver_engine.clone(), 32));

    sender_link.connect(receiver_dispatcher);
    receiver_link.connect(sender_dispatcher);

    Harness { sender_link, sender_engine, receiver_engine }
}

const CHANNEL: u8 = 2;

#[test]
fn small_block_delivered_intact() {
    let harness = harness();
    let block = b"0123456789".to_vec();

    harness.sender_engine.submit_block(CHANNEL, block.clone(), Duration::from_secs(1)).expect("submit");
    assert!(harness.receiver_engine.wait_for_delivery(CHANNEL, Duration::from_secs(2)));
    assert_eq!(harness.receiver_engine.try_recv(CHANNEL), Some(block));
}

#[test]
fn dropped_data_packet_is_recovered_via_nack() {
    // 200 bytes needs BEGIN + DATA(seq=1, 192B) + DATA(seq=2, 8B) + END.
    let harness = harness();
    let block: Vec<u8> = (0..200u16).map(|b| b as u8).collect();

    // DATA service_code is 2 (see rdtlink::packet::ServiceCode); drop seq 2 once.
    harness.sender_link.drop_next(2, 2);

    harness.sender_engine.submit_block(CHANNEL, block.clone(), Duration::from_secs(1)).expect("submit");
    assert!(harness.receiver_engine.wait_for_delivery(CHANNEL, Duration::from_secs(2)));
    assert_eq!(harness.receiver_engine.try_recv(CHANNEL), Some(block));
}

#[test]
fn dropped_ask_triggers_full_retry() {
    let harness = harness();
    let block = b"retry-me".to_vec();

    // ASK service_code is 4, always seq 0.
    harness.sender_link.drop_next(4, 0);

    harness.sender_engine.submit_block(CHANNEL, block.clone(), Duration::from_secs(1)).expect("submit");
    // Must survive at least one 100ms ACK_TIMEOUT cycle before the
    // receiver's idempotent reassembly succeeds on the retransmit.
    assert!(harness.receiver_engine.wait_for_delivery(CHANNEL, Duration::from_secs(2)));
    assert_eq!(harness.receiver_engine.try_recv(CHANNEL), Some(block));
}

#[test]
fn exact_payload_len_boundary_uses_three_packets() {
    use rdtlink::config::PAYLOAD_LEN;

    let harness = harness();
    let block = vec![7u8; PAYLOAD_LEN];

    harness.sender_engine.submit_block(CHANNEL, block.clone(), Duration::from_secs(1)).expect("submit");
    assert!(harness.receiver_engine.wait_for_delivery(CHANNEL, Duration::from_secs(2)));
    assert_eq!(harness.receiver_engine.try_recv(CHANNEL), Some(block));
}

#[test]
fn empty_block_is_rejected_at_submit() {
    let harness = harness();
    let err = harness.sender_engine.submit_block(CHANNEL, Vec::new(), Duration::from_millis(50));
    assert!(err.is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Round-trip law: for any block within [1, 500) bytes, dropping one
    /// arbitrarily chosen DATA packet (re-requested via NACK) still
    /// delivers the block byte-for-byte.
    #[test]
    fn arbitrary_block_survives_scattered_drops(size in 1usize..500, drop_seed in 0u64..1000) {
        let harness = harness();
        let block: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        let total_data_packets = size.div_ceil(192) as u64;
        if total_data_packets > 0 {
            let victim = 1 + (drop_seed % total_data_packets) as u16;
            harness.sender_link.drop_next(2, victim);
        }

        harness.sender_engine.submit_block(CHANNEL, block.clone(), Duration::from_secs(1)).unwrap();
        prop_assert!(harness.receiver_engine.wait_for_delivery(CHANNEL, Duration::from_secs(2)));
        prop_assert_eq!(harness.receiver_engine.try_recv(CHANNEL), Some(block));
    }
}
