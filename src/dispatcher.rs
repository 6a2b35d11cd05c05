//! Maps link-layer receive upcalls — which can fire from whatever context
//! the `LinkPort` implementation calls back from, not necessarily the
//! engine thread — onto the engine's event queue, and demultiplexes the
//! two frame shapes that travel over the same link: 200-byte RDT packets
//! and 8-byte raw pairing frames (pairing has no peer registered yet, so
//! it cannot ride inside an RDT channel).

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::engine::Engine;
use crate::packet::PACKET_SIZE;
use crate::queue::BoundedQueue;

/// Raw system-channel pairing frame: `{message_type, peer_addr[6], channel}`.
pub const PAIRING_FRAME_SIZE: usize = 8;

/// Entry point for inbound frames and the pairing inbox they feed.
///
/// One `Dispatcher` sits in front of one [`Engine`]; `on_frame` is the
/// only method the link's receive callback needs to call.
pub struct Dispatcher {
    engine: Arc<Engine>,
    pairing_inbox: BoundedQueue<Vec<u8>>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, pairing_inbox_capacity: usize) -> Self {
        Dispatcher { engine, pairing_inbox: BoundedQueue::new(pairing_inbox_capacity) }
    }

    /// Called from the link's receive upcall. Never blocks: pairing
    /// frames and RDT packets each land in their own bounded queue, and
    /// anything else is dropped with a debug log.
    pub fn on_frame(&self, frame: &[u8]) {
        match frame.len() {
            PACKET_SIZE => self.engine.enqueue_frame(frame.to_vec()),
            PAIRING_FRAME_SIZE => {
                if self.pairing_inbox.try_push(frame.to_vec()).is_err() {
                    debug!("dispatcher: pairing inbox full, dropping frame");
                }
            }
            other => debug!("dispatcher: dropping frame of unrecognized length {}", other),
        }
    }

    /// Pull the next pairing frame, if any, without blocking.
    pub fn try_recv_pairing(&self) -> Option<Vec<u8>> {
        self.pairing_inbox.try_pop()
    }

    /// Pull the next pairing frame, waiting up to `timeout`.
    pub fn recv_pairing_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.pairing_inbox.pop_timeout(timeout)
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::link::mock::MockLink;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        let link = Arc::new(MockLink::new());
        let engine = Engine::new(link, EngineConfig::default());
        Dispatcher::new(engine, 8)
    }

    #[test]
    fn routes_rdt_sized_frames_to_the_engine() {
        let dispatcher = dispatcher();
        dispatcher.on_frame(&[0u8; PACKET_SIZE]);
        assert!(dispatcher.try_recv_pairing().is_none());
    }

    #[test]
    fn routes_pairing_sized_frames_to_the_inbox() {
        let dispatcher = dispatcher();
        let frame = vec![1u8; PAIRING_FRAME_SIZE];
        dispatcher.on_frame(&frame);
        assert_eq!(dispatcher.try_recv_pairing(), Some(frame));
    }

    #[test]
    fn drops_frames_of_other_lengths() {
        let dispatcher = dispatcher();
        dispatcher.on_frame(&[0u8; 3]);
        assert_eq!(dispatcher.recv_pairing_timeout(Duration::from_millis(5)), None);
    }
}
