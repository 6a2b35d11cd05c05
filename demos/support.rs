//! Shared plumbing for the demos in this directory: an in-process
//! `LinkPort` that hands frames straight to the other node's
//! `Dispatcher`, standing in for a real radio when two "devices" live
//! in the same process.

use std::sync::{Arc, Mutex};

use rdtlink::config::EngineConfig;
use rdtlink::dispatcher::Dispatcher;
use rdtlink::engine::Engine;
use rdtlink::link::{LinkPort, PeerAddr};

pub struct DirectLink {
    peer: Mutex<Option<Arc<Dispatcher>>>,
}

impl DirectLink {
    pub fn new() -> Arc<Self> {
        Arc::new(DirectLink { peer: Mutex::new(None) })
    }

    /// Wire this link's outbound frames to `peer`'s dispatcher.
    pub fn connect(&self, peer: Arc<Dispatcher>) {
        *self.peer.lock().unwrap() = Some(peer);
    }
}

impl LinkPort for DirectLink {
    fn send(&self, _peer: PeerAddr, frame: &[u8]) -> bool {
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

/// One simulated device: its link, engine (already spawned) and
/// dispatcher.
pub struct Node {
    pub link: Arc<DirectLink>,
    pub engine: Arc<Engine>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn build_node(config: EngineConfig) -> Node {
    let link = DirectLink::new();
    let engine = Engine::new(link.clone(), config);
    engine.spawn();
    let dispatcher = Arc::new(Dispatcher::new(engine.clone(), 32));
    Node { link, engine, dispatcher }
}

/// Cross-wire two nodes so each one's outbound frames land in the
/// other's dispatcher. Does not register a peer on either engine — the
/// pairing demo relies on the handshake itself doing that; demos that
/// skip pairing must call [`pair_directly`] instead.
pub fn connect(a: &Node, b: &Node) {
    a.link.connect(b.dispatcher.clone());
    b.link.connect(a.dispatcher.clone());
}

/// For demos that exercise params/files without running the pairing
/// handshake: register each node as the other's peer directly.
/// `DirectLink::send` ignores the address and always forwards to
/// whatever dispatcher it was `connect`-ed to, so any non-zero
/// placeholder works — but `Engine::send_packet` drops every outbound
/// frame until a peer is registered, so skipping this would silently
/// stall the demo.
pub fn pair_directly(a: &Node, b: &Node) {
    a.engine.set_peer([1; 6]);
    b.engine.set_peer([2; 6]);
}
