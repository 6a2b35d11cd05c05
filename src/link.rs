//! The external collaborator this crate never implements itself: a
//! single-peer, best-effort, unordered link (radio bring-up is an
//! explicit non-goal). [`LinkPort`] hides the hardware the same way the
//! nRF24 driver this crate grew out of hid its SPI/GPIO specifics behind
//! a `Device` trait — everything above it only ever sees "send these
//! bytes to this peer" and "a frame arrived from that peer".

/// A link-layer peer address. ESP-NOW addresses a peer by its 6-byte
/// MAC; this type is intentionally that wide and no wider.
pub type PeerAddr = [u8; 6];

pub const ZERO_ADDR: PeerAddr = [0; 6];

/// Best-effort, unordered, packet-limited link to a single registered
/// peer (or a broadcast-capable medium, for pairing).
pub trait LinkPort: Send + Sync {
    /// Send one frame to `peer`. Best-effort: the call does not block
    /// waiting for delivery, and a `false` return means the frame was
    /// dropped locally (e.g. the underlying queue was full), not that
    /// the peer rejected it.
    fn send(&self, peer: PeerAddr, frame: &[u8]) -> bool;

    /// Broadcast one frame to every peer the link can reach (used only
    /// by pairing, which has no peer yet).
    fn broadcast(&self, frame: &[u8]) -> bool;

    /// Register `peer` as a link-layer peer, e.g. after pairing
    /// finalizes. A no-op for links that do not require peer
    /// registration before `send` will work.
    fn register_peer(&self, peer: PeerAddr);
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    /// In-memory, loopback-capable [`LinkPort`] for tests. Frames handed
    /// to `send`/`broadcast` are appended to `sent`; a test drives
    /// delivery explicitly by feeding frames into the dispatcher under
    /// test, optionally dropping or reordering them first.
    #[derive(Default)]
    pub struct MockLink {
        pub sent: Mutex<Vec<(PeerAddr, Vec<u8>)>>,
        pub broadcasts: Mutex<Vec<Vec<u8>>>,
        pub registered: Mutex<Vec<PeerAddr>>,
    }

    impl MockLink {
        pub fn new() -> Self {
            MockLink::default()
        }

        pub fn drain_sent(&self) -> Vec<(PeerAddr, Vec<u8>)> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }

        pub fn drain_broadcasts(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.broadcasts.lock().unwrap())
        }
    }

    impl LinkPort for MockLink {
        fn send(&self, peer: PeerAddr, frame: &[u8]) -> bool {
            self.sent.lock().unwrap().push((peer, frame.to_vec()));
            true
        }

        fn broadcast(&self, frame: &[u8]) -> bool {
            self.broadcasts.lock().unwrap().push(frame.to_vec());
            true
        }

        fn register_peer(&self, peer: PeerAddr) {
            self.registered.lock().unwrap().push(peer);
        }
    }
}
