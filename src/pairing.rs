//! The two-step mutual-confirmation pairing handshake run on the system
//! channel. Unlike every other consumer in this crate, pairing speaks
//! raw 8-byte frames instead of RDT blocks — there is no peer registered
//! yet for the engine to address, so `PAIRING_MAC`/`PAIRING_DONE` travel
//! as broadcasts and direct replies straight over the [`LinkPort`],
//! demultiplexed by the dispatcher purely on frame length.
//!
//! The one property worth protecting is atomicity: a crash or timeout
//! must never leave persistent storage holding a candidate that the
//! other side never confirmed. [`Pairing::run_blocking`] only ever
//! commits the fully-confirmed address or the all-zero address, never
//! anything in between.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{PAIR_BROADCAST_INTERVAL, PAIR_TIMEOUT};
use crate::dispatcher::Dispatcher;
use crate::error::PairingError;
use crate::link::{LinkPort, PeerAddr, ZERO_ADDR};

const MSG_PAIRING_MAC: u8 = 1;
const MSG_PAIRING_DONE: u8 = 2;

/// `{message_type: u8, peer_addr[6], channel: u8}`, matching
/// [`crate::dispatcher::PAIRING_FRAME_SIZE`].
fn encode_system_header(message_type: u8, addr: PeerAddr, channel: u8) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = message_type;
    frame[1..7].copy_from_slice(&addr);
    frame[7] = channel;
    frame
}

fn decode_system_header(frame: &[u8]) -> Option<(u8, PeerAddr, u8)> {
    if frame.len() != 8 {
        return None;
    }
    let message_type = frame[0];
    let mut addr = ZERO_ADDR;
    addr.copy_from_slice(&frame[1..7]);
    let channel = frame[7];
    Some((message_type, addr, channel))
}

/// Tri-state pairing status, the only thing pairing surfaces beyond the
/// persistent store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    Unpaired,
    PairingActive,
    Paired,
}

/// Where pairing persists the confirmed peer address. Commit boundary
/// must be atomic for the no-half-paired invariant to hold; this crate
/// does not implement storage itself (an explicit non-goal) — it only
/// calls through this seam at the two points (finalize, revert) that
/// matter.
pub trait PersistentPeerStore: Send + Sync {
    fn set_peer(&self, addr: PeerAddr);
    fn get_peer(&self) -> PeerAddr;
    /// Must durably commit whatever `set_peer` last wrote before
    /// returning.
    fn commit(&self);
}

/// Runs the handshake described in the module docs. Build one with
/// [`Pairing::new`] and drive it from its own thread with
/// [`Pairing::run_blocking`]; call [`Pairing::cancel`] from another
/// thread to abort early (treated the same as a timeout: revert).
pub struct Pairing {
    own_addr: PeerAddr,
    link: Arc<dyn LinkPort>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn PersistentPeerStore>,
    peer_handle: Arc<Mutex<Option<PeerAddr>>>,
    status: Mutex<PairingStatus>,
    cancel_flag: AtomicBool,
}

impl Pairing {
    pub fn new(
        own_addr: PeerAddr,
        link: Arc<dyn LinkPort>,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn PersistentPeerStore>,
        peer_handle: Arc<Mutex<Option<PeerAddr>>>,
    ) -> Self {
        Pairing {
            own_addr,
            link,
            dispatcher,
            store,
            peer_handle,
            status: Mutex::new(PairingStatus::Unpaired),
            cancel_flag: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> PairingStatus {
        *self.status.lock().unwrap()
    }

    /// Request that an in-progress [`Pairing::run_blocking`] abort at its
    /// next poll. Treated identically to a wall-clock timeout: revert.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Release);
    }

    /// Run one full pairing session to completion, blocking the calling
    /// thread. Returns the final status (`Paired` or `Unpaired` — never
    /// `PairingActive`, which is only observable via [`Pairing::status`]
    /// from another thread while this call is in flight).
    ///
    /// Refuses to start if a session is already active.
    pub fn run_blocking(&self, own_channel: u8) -> Result<PairingStatus, PairingError> {
        if self.own_addr == ZERO_ADDR {
            return Err(PairingError::ZeroAddress);
        }
        {
            let mut status = self.status.lock().unwrap();
            if *status == PairingStatus::PairingActive {
                return Err(PairingError::AlreadyActive);
            }
            *status = PairingStatus::PairingActive;
        }
        self.cancel_flag.store(false, Ordering::Release);

        // Clear any previously stored identity before starting — a crash
        // mid-session must never leave a stale confirmed peer behind.
        self.store.set_peer(ZERO_ADDR);
        self.store.commit();

        let mut candidate: Option<PeerAddr> = None;
        let mut confirmed = false;
        let deadline = Instant::now() + PAIR_TIMEOUT;
        let mut next_broadcast = Instant::now();

        while Instant::now() < deadline && !self.cancel_flag.load(Ordering::Acquire) {
            if Instant::now() >= next_broadcast {
                let frame = encode_system_header(MSG_PAIRING_MAC, self.own_addr, own_channel);
                self.link.broadcast(&frame);
                next_broadcast = Instant::now() + PAIR_BROADCAST_INTERVAL;
            }

            let remaining = deadline.saturating_duration_since(Instant::now()).min(Duration::from_millis(100));
            let Some(frame) = self.dispatcher.recv_pairing_timeout(remaining) else { continue };
            let Some((message_type, addr, _channel)) = decode_system_header(&frame) else { continue };
            if addr == ZERO_ADDR {
                debug!("pairing: ignoring all-zero address");
                continue;
            }

            match message_type {
                MSG_PAIRING_MAC => {
                    match candidate {
                        None => {
                            candidate = Some(addr);
                            let reply = encode_system_header(MSG_PAIRING_DONE, self.own_addr, own_channel);
                            self.link.send(addr, &reply);
                        }
                        Some(existing) if existing != addr => {
                            warn!("pairing: ignoring second candidate (first-wins)");
                        }
                        _ => {}
                    }
                }
                MSG_PAIRING_DONE => match candidate {
                    None => {
                        candidate = Some(addr);
                        confirmed = true;
                    }
                    Some(existing) if existing == addr => {
                        confirmed = true;
                    }
                    Some(_) => {
                        warn!("pairing: ignoring confirmation from a non-candidate peer");
                    }
                },
                _ => debug!("pairing: unknown system message_type {}", message_type),
            }

            if confirmed {
                break;
            }
        }

        let result = if confirmed {
            let addr = candidate.expect("confirmed implies a candidate was adopted");
            self.store.set_peer(addr);
            self.store.commit();
            self.link.register_peer(addr);
            *self.peer_handle.lock().unwrap() = Some(addr);
            info!("pairing: finalized with peer");
            PairingStatus::Paired
        } else {
            self.store.set_peer(ZERO_ADDR);
            self.store.commit();
            info!("pairing: session ended without confirmation, reverting");
            PairingStatus::Unpaired
        };

        *self.status.lock().unwrap() = result;
        Ok(result)
    }
}
