//! Two devices run the pairing handshake concurrently over a shared
//! in-process link and both end up `Paired` on each other's address.

#[path = "support.rs"]
mod support;

use std::sync::{Arc, Mutex};
use std::thread;

use rdtlink::config::{EngineConfig, CHANNEL_SYSTEM};
use rdtlink::link::PeerAddr;
use rdtlink::pairing::{Pairing, PersistentPeerStore};

#[derive(Default)]
struct MemoryStore {
    addr: Mutex<PeerAddr>,
}

impl PersistentPeerStore for MemoryStore {
    fn set_peer(&self, addr: PeerAddr) {
        *self.addr.lock().unwrap() = addr;
    }
    fn get_peer(&self) -> PeerAddr {
        *self.addr.lock().unwrap()
    }
    fn commit(&self) {}
}

fn main() {
    env_logger::init();

    let phone = support::build_node(EngineConfig::default());
    let sensor = support::build_node(EngineConfig::default());
    support::connect(&phone, &sensor);

    let phone_pairing = Arc::new(Pairing::new(
        [1, 1, 1, 1, 1, 1],
        phone.link.clone(),
        phone.dispatcher.clone(),
        Arc::new(MemoryStore::default()),
        phone.engine.peer_handle(),
    ));
    let sensor_pairing = Arc::new(Pairing::new(
        [2, 2, 2, 2, 2, 2],
        sensor.link.clone(),
        sensor.dispatcher.clone(),
        Arc::new(MemoryStore::default()),
        sensor.engine.peer_handle(),
    ));

    let phone_handle = {
        let pairing = phone_pairing.clone();
        thread::spawn(move || pairing.run_blocking(CHANNEL_SYSTEM))
    };
    let sensor_handle = {
        let pairing = sensor_pairing.clone();
        thread::spawn(move || pairing.run_blocking(CHANNEL_SYSTEM))
    };

    println!("phone: {:?}", phone_handle.join().unwrap());
    println!("sensor: {:?}", sensor_handle.join().unwrap());
}
