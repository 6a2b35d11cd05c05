// Copyright 2017, Romuald Texier-Marcadé <romualdtm@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/license/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option.  This file may not be copied, modified, or distributed
// except according to those terms.

//! A reliable, block-oriented datagram transport for lossy,
//! packet-limited best-effort links — the kind an ESP-NOW style radio
//! primitive offers: frames capped at a couple hundred bytes, no
//! ordering, no acknowledgement.
//!
//! Two tightly coupled layers do the work:
//!
//! * [`engine`] — the Reliable Datagram Transport (RDT): a multi-channel,
//!   segmented, CRC-checked, retry/NACK/ASK state machine that carries
//!   arbitrary-sized blocks across a fixed-size packet with
//!   memory-bounded reassembly.
//! * [`broker`] — Request/Response Orchestration (RRO): turns the
//!   engine's one-way block delivery into blocking request/response
//!   calls, single-flight per channel, correlated by either a
//!   parameter's `message_type` or a file request's `request_id`.
//!
//! On top of those two cores sit three protocols that share the wire
//! format but never the channel: a two-way [`pairing`] handshake, a
//! [`params`] get/set registry, and a [`files`] list/read/write service.
//!
//! Link initialization (radio bring-up), persistent storage of the
//! paired peer's identity, OS-level file I/O, and application-level
//! logging are explicit non-goals — narrow seams ([`link::LinkPort`],
//! [`pairing::PersistentPeerStore`], [`files::FileBackend`]) stand in
//! for them, for the embedder to wire up to real hardware and storage.
//!
//! # Wiring one device together
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rdtlink::broker::RequestBroker;
//! use rdtlink::config::{EngineConfig, CHANNEL_PARAMS};
//! use rdtlink::dispatcher::Dispatcher;
//! use rdtlink::engine::Engine;
//! use rdtlink::link::LinkPort;
//! use rdtlink::params::ParamRegistry;
//!
//! # struct MyLink;
//! # impl LinkPort for MyLink {
//! #     fn send(&self, _peer: rdtlink::link::PeerAddr, _frame: &[u8]) -> bool { true }
//! #     fn broadcast(&self, _frame: &[u8]) -> bool { true }
//! #     fn register_peer(&self, _peer: rdtlink::link::PeerAddr) {}
//! # }
//! let link: Arc<dyn LinkPort> = Arc::new(MyLink);
//! let engine = Engine::new(link, EngineConfig::default());
//! let _engine_thread = engine.spawn();
//!
//! let dispatcher = Arc::new(Dispatcher::new(engine.clone(), 32));
//! // The link implementation's receive upcall should call
//! // `dispatcher.on_frame(bytes)` for every inbound frame.
//!
//! let broker = Arc::new(RequestBroker::new(engine.clone()));
//! let params = ParamRegistry::new(engine.clone(), broker.clone());
//! params.register(20, Some(Box::new(|| (vec![0x07, 0xe8], 0))), None);
//! let _params_thread = params.spawn();
//!
//! let mut resp = [0u8; 16];
//! match params.get(20, &mut resp, Duration::from_millis(500)) {
//!     Ok((len, code)) => println!("got {} bytes, code {}", len, code),
//!     Err(err) => println!("get failed: {}", err),
//! }
//! # let _ = CHANNEL_PARAMS;
//! ```

pub mod broker;
pub mod channel;
pub mod config;
mod crc;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod files;
pub mod link;
pub mod packet;
mod payload;
pub mod pairing;
pub mod params;
mod queue;

pub use broker::{CorrelationKey, RequestBroker};
pub use config::{ChannelConfig, EngineConfig};
pub use dispatcher::Dispatcher;
pub use engine::{Engine, SubmitError};
pub use error::{BrokerError, FileError, PairingError, ParamError};
pub use files::{FileBackend, FileService};
pub use link::{LinkPort, PeerAddr};
pub use pairing::{Pairing, PairingStatus, PersistentPeerStore};
pub use params::ParamRegistry;
