//! Error types for aulos-stream.

use crate::protocol::DeviceHandle;
use thiserror::Error;

/// Errors from shared-memory streaming primitives.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("queue capacity {0} is not a power of two greater than one")]
    InvalidCapacity(usize),

    #[error("element alignment {0} exceeds the shared queue slot alignment")]
    UnsupportedAlignment(usize),

    #[error("region size mismatch: expected {expected} bytes, handle names {actual}")]
    RegionSizeMismatch { expected: usize, actual: usize },

    #[error("bad stream pool magic or version")]
    BadPoolHeader,

    #[error("block count {count} does not fit a ring of {slots} slots")]
    PoolTooLarge { count: u32, slots: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors from the session client.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(
        "an output sink is already outstanding for device {current:?} \
         (requested {requested:?})"
    )]
    SessionBusy {
        requested: DeviceHandle,
        current: DeviceHandle,
    },

    #[error("session transport failed: {0}")]
    Transport(String),

    #[error("session connection closed")]
    Disconnected,
}
