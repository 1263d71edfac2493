//! Cross-process streaming for the aulos audio engine.
//!
//! Everything the renderer needs to exchange sample blocks with an
//! out-of-process worker under real-time bounds:
//!
//! - [`SharedRegion`]: named shared-memory regions with serializable handles
//! - [`SharedQueue`] / [`Producer`] / [`Consumer`]: the lock-free shared
//!   circular queue (`{tail, head, head_protector, data}` layout)
//! - [`BlockStream`]: pool + free ring + ready ring block transport
//! - [`NotifySignal`] / [`NotifyListener`]: the coalescing wake primitive
//! - [`ProcessorPort`] / [`ProcessorEndpoint`] / [`WorkletNode`]: per-node
//!   request/response pairing and the graph node bridging to it
//! - [`SessionClient`]: the output-sink session state machine
//!
//! The real-time rules hold throughout: producers fail fast on backpressure,
//! consumers drain without waiting, and a missed response degrades to silence
//! instead of stalling the render thread.

pub mod error;
pub use error::{Result, SessionError, StreamError};

mod config;
pub use config::{SessionConfig, StreamConfig};

pub mod protocol;
pub use protocol::{
    BlockHeader, DeviceHandle, HostMessage, SessionRequest, SessionResponse, StreamBinding,
    StreamDescriptor, WorkerMessage, BLOCK_HEADER_BYTES, BLOCK_PROTOCOL_VERSION,
    BLOCK_REQUEST_MAGIC, BLOCK_RESPONSE_MAGIC,
};

mod shared_memory;
pub use shared_memory::{RegionHandle, SharedRegion};

mod queue;
pub use queue::{Consumer, Producer, SharedQueue};

mod notify;
pub use notify::{NotifyListener, NotifySignal};

mod block;
pub use block::{
    BlockDescriptor, BlockPool, BlockStream, BlockStreamConsumer, BlockStreamProducer,
    STREAM_RING_SLOTS,
};

mod port;
pub use port::{ProcessorEndpoint, ProcessorPort, WorkletNode};

mod transport;
pub use transport::{MessageReceiver, MessageSender, MessageTransport, TransportListener};

mod session;
pub use session::{
    SessionClient, SessionEvent, SessionState, SessionTransport, SocketSessionTransport,
};
