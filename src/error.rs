//! Typed error taxonomy for everything above the transport-local layer.
//!
//! CRC failures, duplicate BEGINs, full queues and the like never surface
//! here: they are transport-local (see the engine module) and are only
//! ever observable as a log line or, ultimately, a broker timeout. What
//! lives in this module is the boundary the embedder actually programs
//! against.

use thiserror::Error;

/// Failure modes of [`crate::broker::RequestBroker::request_blocking`].
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BrokerError {
    #[error("broker not initialized for this channel")]
    NotInitialized,
    #[error("could not acquire the channel's request slot")]
    MutexUnavailable,
    #[error("another request is already in progress on this channel")]
    AnotherInProgress,
    #[error("failed to hand the request block to the transport")]
    SendFailed,
    #[error("timed out waiting for a response")]
    Timeout,
}

impl BrokerError {
    /// Stable numeric code, independent of `Display` wording.
    pub fn code(self) -> u8 {
        match self {
            BrokerError::NotInitialized => 1,
            BrokerError::MutexUnavailable => 2,
            BrokerError::AnotherInProgress => 3,
            BrokerError::SendFailed => 4,
            BrokerError::Timeout => 5,
        }
    }
}

/// Parameter registry return codes (§7).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ParamError {
    #[error("unknown message_type")]
    UnknownMessageType,
    #[error("no reader registered for this message_type")]
    NoReader,
    #[error("no writer registered for this message_type")]
    NoWriter,
}

impl ParamError {
    pub fn code(self) -> u8 {
        match self {
            ParamError::UnknownMessageType => 1,
            ParamError::NoReader => 2,
            ParamError::NoWriter => 3,
        }
    }
}

/// File service return codes (§7).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FileError {
    #[error("unknown command")]
    UnknownCommand,
    #[error("file not found")]
    NotFound,
    #[error("I/O error")]
    Io,
    #[error("oversized path or data")]
    Oversized,
    #[error("internal error")]
    Internal,
}

impl FileError {
    pub fn code(self) -> u8 {
        match self {
            FileError::UnknownCommand => 1,
            FileError::NotFound => 2,
            FileError::Io => 3,
            FileError::Oversized => 4,
            FileError::Internal => 5,
        }
    }
}

/// Pairing failure surfaced only through [`crate::pairing::PairingStatus`];
/// there is no retry beyond the state machine itself.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum PairingError {
    #[error("a pairing session is already active")]
    AlreadyActive,
    #[error("peer address was all-zero")]
    ZeroAddress,
}
