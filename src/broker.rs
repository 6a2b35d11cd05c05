//! Turns the engine's one-way block delivery into blocking request/response
//! calls: single-flight per channel, correlated by either a parameter's
//! `message_type` or a file request's `request_id`, with a bounded wait
//! and buffer hand-off to the caller.
//!
//! The broker never touches the wire itself — it submits request blocks
//! through the [`Engine`] it's built against and expects its owning
//! consumer (the parameter registry or file service) to hand matching
//! response blocks back via [`RequestBroker::deliver_response`] once it
//! has parsed enough of the response header to know the correlation key.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::debug;

use crate::config::MAX_CHANNELS;
use crate::engine::Engine;
use crate::error::BrokerError;

/// What a response must match to be handed to the waiting caller instead
/// of dropped as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationKey {
    MessageType(u8),
    RequestId(u16),
}

enum SlotState {
    Idle,
    Waiting { key: CorrelationKey, response: Option<(Vec<u8>, u8)> },
}

struct RequestSlot {
    state: Mutex<SlotState>,
    condvar: Condvar,
}

impl RequestSlot {
    fn new() -> Self {
        RequestSlot { state: Mutex::new(SlotState::Idle), condvar: Condvar::new() }
    }
}

/// One broker instance per engine; shares the engine's channels.
pub struct RequestBroker {
    engine: Arc<Engine>,
    slots: Vec<RequestSlot>,
}

impl RequestBroker {
    pub fn new(engine: Arc<Engine>) -> Self {
        let slots = (0..MAX_CHANNELS).map(|_| RequestSlot::new()).collect();
        RequestBroker { engine, slots }
    }

    /// Send `payload` on `channel`, correlated by `key`, and block the
    /// caller until a matching response arrives or `timeout` elapses.
    /// Copies the response payload into `resp_buf` (truncated to its
    /// capacity) and returns `(bytes_written, return_code)`.
    pub fn request_blocking(
        &self,
        channel: u8,
        key: CorrelationKey,
        payload: Vec<u8>,
        resp_buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(usize, u8), BrokerError> {
        let deadline = Instant::now() + timeout;
        let slot = self.slots.get(channel as usize).ok_or(BrokerError::NotInitialized)?;

        {
            let mut state = slot.state.lock().map_err(|_| BrokerError::MutexUnavailable)?;
            if !matches!(*state, SlotState::Idle) {
                return Err(BrokerError::AnotherInProgress);
            }
            *state = SlotState::Waiting { key, response: None };
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.engine.submit_block(channel, payload, remaining).is_err() {
            *slot.state.lock().map_err(|_| BrokerError::MutexUnavailable)? = SlotState::Idle;
            return Err(BrokerError::SendFailed);
        }

        let mut state = slot.state.lock().map_err(|_| BrokerError::MutexUnavailable)?;
        loop {
            if let SlotState::Waiting { response: Some(_), .. } = &*state {
                let SlotState::Waiting { response: Some((payload, return_code)), .. } =
                    std::mem::replace(&mut *state, SlotState::Idle)
                else {
                    unreachable!("checked above")
                };
                let bytes_written = payload.len().min(resp_buf.len());
                resp_buf[..bytes_written].copy_from_slice(&payload[..bytes_written]);
                return Ok((bytes_written, return_code));
            }

            let now = Instant::now();
            if now >= deadline {
                *state = SlotState::Idle;
                return Err(BrokerError::Timeout);
            }

            let (guard, result) = slot.condvar.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if result.timed_out() && !matches!(&*state, SlotState::Waiting { response: Some(_), .. }) {
                *state = SlotState::Idle;
                return Err(BrokerError::Timeout);
            }
        }
    }

    /// Hand a parsed response to the broker. Returns `true` if it matched
    /// an outstanding request on `channel` and was delivered; `false` if
    /// the channel was idle or the correlation key didn't match, in which
    /// case the response is a late arrival and is silently dropped.
    pub fn deliver_response(&self, channel: u8, key: CorrelationKey, payload: Vec<u8>, return_code: u8) -> bool {
        let Some(slot) = self.slots.get(channel as usize) else { return false };
        let mut state = slot.state.lock().unwrap();
        match &*state {
            SlotState::Waiting { key: waiting_key, response: None } if *waiting_key == key => {
                *state = SlotState::Waiting { key, response: Some((payload, return_code)) };
                drop(state);
                slot.condvar.notify_all();
                true
            }
            _ => {
                debug!("broker: dropping late or mismatched response on channel {}", channel);
                false
            }
        }
    }
}
