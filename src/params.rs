//! Parameter get/set registry: a descriptor table keyed by `message_type`,
//! dispatched over the broker/engine pair on [`CHANNEL_PARAMS`]. Structurally
//! this is the broker's other consumer besides the file service — same
//! request/response shape, different header and correlation key
//! (`message_type` here, `request_id` for files).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::broker::{CorrelationKey, RequestBroker};
use crate::config::{CHANNEL_PARAMS, ENGINE_TICK, MAX_PARAM_PAYLOAD};
use crate::engine::Engine;
use crate::error::{BrokerError, ParamError};

const OP_GET: u8 = 0;
const OP_SET: u8 = 1;
const OP_RESP: u8 = 2;

/// Reads the current value of a parameter. Returns the encoded bytes and
/// an application return-code (`0` is success).
pub type ReadFn = Box<dyn Fn() -> (Vec<u8>, u8) + Send + Sync>;
/// Applies a new value to a parameter. Returns an application return-code.
pub type WriteFn = Box<dyn Fn(&[u8]) -> u8 + Send + Sync>;

#[derive(Default)]
struct Descriptor {
    read: Option<ReadFn>,
    write: Option<WriteFn>,
}

fn encode_header(message_type: u8, op: u8, return_code: u8, data: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(3 + data.len());
    block.push(message_type);
    block.push(op);
    block.push(return_code);
    block.extend_from_slice(data);
    block
}

fn decode_header(block: &[u8]) -> Option<(u8, u8, u8, &[u8])> {
    let &[message_type, op, return_code, ref data @ ..] = block else { return None };
    Some((message_type, op, return_code, data))
}

/// Owns the descriptor table and the background thread that services
/// incoming GET/SET requests and correlates incoming RESP frames back to
/// the broker.
pub struct ParamRegistry {
    descriptors: Mutex<HashMap<u8, Descriptor>>,
    engine: Arc<Engine>,
    broker: Arc<RequestBroker>,
}

impl ParamRegistry {
    pub fn new(engine: Arc<Engine>, broker: Arc<RequestBroker>) -> Arc<Self> {
        Arc::new(ParamRegistry { descriptors: Mutex::new(HashMap::new()), engine, broker })
    }

    /// Register a reader and/or writer for `message_type`. Calling again
    /// for the same type replaces the prior descriptor.
    pub fn register(&self, message_type: u8, read: Option<ReadFn>, write: Option<WriteFn>) {
        self.descriptors.lock().unwrap().insert(message_type, Descriptor { read, write });
    }

    /// Issue a blocking GET for `message_type`, returning the bytes
    /// written into `resp_buf` and the peer's application return-code.
    pub fn get(&self, message_type: u8, resp_buf: &mut [u8], timeout: Duration) -> Result<(usize, u8), BrokerError> {
        let request = encode_header(message_type, OP_GET, 0, &[]);
        self.broker.request_blocking(CHANNEL_PARAMS, CorrelationKey::MessageType(message_type), request, resp_buf, timeout)
    }

    /// Issue a blocking SET of `data` for `message_type`.
    pub fn set(&self, message_type: u8, data: &[u8], timeout: Duration) -> Result<(usize, u8), BrokerError> {
        let request = encode_header(message_type, OP_SET, 0, data);
        let mut resp_buf = [0u8; 1];
        self.broker.request_blocking(CHANNEL_PARAMS, CorrelationKey::MessageType(message_type), request, &mut resp_buf, timeout)
    }

    /// Drain every block currently sitting in the params rx_queue.
    fn drain(&self) {
        while let Some(block) = self.engine.try_recv(CHANNEL_PARAMS) {
            self.handle_block(block);
        }
    }

    fn handle_block(&self, block: Vec<u8>) {
        let Some((message_type, op, return_code, data)) = decode_header(&block) else {
            debug!("params: dropping malformed block");
            return;
        };

        match op {
            OP_GET => {
                let (payload, code) = self.service_read(message_type);
                self.reply(message_type, code, &payload);
            }
            OP_SET => {
                let code = self.service_write(message_type, data);
                self.reply(message_type, code, &[]);
            }
            OP_RESP => {
                self.broker.deliver_response(CHANNEL_PARAMS, CorrelationKey::MessageType(message_type), data.to_vec(), return_code);
            }
            other => debug!("params: unknown op {}", other),
        }
    }

    fn service_read(&self, message_type: u8) -> (Vec<u8>, u8) {
        let descriptors = self.descriptors.lock().unwrap();
        match descriptors.get(&message_type) {
            None => (Vec::new(), ParamError::UnknownMessageType.code()),
            Some(descriptor) => match &descriptor.read {
                Some(read) => {
                    let (bytes, code) = read();
                    let bytes = if bytes.len() > MAX_PARAM_PAYLOAD { bytes[..MAX_PARAM_PAYLOAD].to_vec() } else { bytes };
                    (bytes, code)
                }
                None => (Vec::new(), ParamError::NoReader.code()),
            },
        }
    }

    fn service_write(&self, message_type: u8, data: &[u8]) -> u8 {
        let descriptors = self.descriptors.lock().unwrap();
        match descriptors.get(&message_type) {
            None => ParamError::UnknownMessageType.code(),
            Some(descriptor) => match &descriptor.write {
                Some(write) => write(data),
                None => ParamError::NoWriter.code(),
            },
        }
    }

    fn reply(&self, message_type: u8, return_code: u8, data: &[u8]) {
        let response = encode_header(message_type, OP_RESP, return_code, data);
        if self.engine.submit_block(CHANNEL_PARAMS, response, ENGINE_TICK).is_err() {
            debug!("params: failed to submit RESP for message_type {}", message_type);
        }
    }

    /// Spawn the background thread that drains the params channel and
    /// services/correlates every block that arrives on it.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = self.clone();
        thread::spawn(move || loop {
            registry.engine.wait_for_delivery(CHANNEL_PARAMS, ENGINE_TICK);
            registry.drain();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::link::mock::MockLink;

    fn registry() -> (Arc<ParamRegistry>, Arc<Engine>) {
        let link = Arc::new(MockLink::new());
        let engine = Engine::new(link, EngineConfig::default());
        let broker = Arc::new(RequestBroker::new(engine.clone()));
        (ParamRegistry::new(engine.clone(), broker), engine)
    }

    #[test]
    fn services_a_get_with_a_registered_reader() {
        let (registry, _engine) = registry();
        registry.register(20, Some(Box::new(|| (vec![0x07, 0xe8], 0))), None);

        let request = encode_header(20, OP_GET, 0, &[]);
        registry.handle_block(request);

        let reply = registry.engine.try_pop_tx(CHANNEL_PARAMS).expect("a RESP block");
        let (message_type, op, return_code, data) = decode_header(&reply).unwrap();
        assert_eq!(message_type, 20);
        assert_eq!(op, OP_RESP);
        assert_eq!(return_code, 0);
        assert_eq!(data, &[0x07, 0xe8]);
    }

    #[test]
    fn get_on_unknown_message_type_returns_code_1() {
        let (registry, _engine) = registry();
        registry.handle_block(encode_header(99, OP_GET, 0, &[]));
        let reply = registry.engine.try_pop_tx(CHANNEL_PARAMS).expect("a RESP block");
        let (_, _, return_code, _) = decode_header(&reply).unwrap();
        assert_eq!(return_code, ParamError::UnknownMessageType.code());
    }

    #[test]
    fn write_without_a_registered_writer_returns_code_3() {
        let (registry, _engine) = registry();
        registry.register(5, Some(Box::new(|| (vec![], 0))), None);
        registry.handle_block(encode_header(5, OP_SET, 0, &[1, 2]));
        let reply = registry.engine.try_pop_tx(CHANNEL_PARAMS).expect("a RESP block");
        let (_, _, return_code, _) = decode_header(&reply).unwrap();
        assert_eq!(return_code, ParamError::NoWriter.code());
    }

    #[test]
    fn resp_blocks_are_handed_to_the_broker() {
        let (registry, _engine) = registry();
        let mut resp_buf = [0u8; 8];
        let client = registry.clone();
        let handle =
            thread::spawn(move || client.get(20, &mut resp_buf, Duration::from_secs(1)).map(|result| (result, resp_buf)));

        thread::sleep(Duration::from_millis(20));
        registry.broker.deliver_response(CHANNEL_PARAMS, CorrelationKey::MessageType(20), vec![1, 2, 3], 0);

        let (result, resp_buf) = handle.join().unwrap().unwrap();
        assert_eq!(result, (3, 0));
        assert_eq!(&resp_buf[..3], &[1, 2, 3]);
    }
}
