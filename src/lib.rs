//! Real-time audio rendering engine with an out-of-process worklet worker.
//!
//! # Primary API
//!
//! - [`RenderEngine`] / [`RenderEngineBuilder`]: main entry point
//! - [`GraphDescription`] / [`encode_graph`]: declarative graph input
//! - [`DeviceHandle`] + session methods: output-sink lifecycle
//! - `device-io` feature: CPAL output pulling quanta from the renderer
//!
//! # Example
//!
//! ```no_run
//! use aulos::prelude::*;
//!
//! # fn main() -> aulos::Result<()> {
//! let mut engine = RenderEngine::builder().sample_rate(48_000.0).build()?;
//!
//! let mut graph = GraphDescription::new(NodeId(1));
//! graph.add_node(NodeId(1), NodeSpec::new("destination"));
//! graph.add_node(
//!     NodeId(2),
//!     NodeSpec::new("sine").with_params(params! { "frequency" => 440.0 }),
//! );
//! graph.connect(NodeId(2), NodeId(1));
//! engine.apply_graph(&graph)?;
//!
//! let mut quantum = vec![0.0f32; 128 * 2];
//! engine.render_interleaved(&mut quantum)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

mod engine;
pub use engine::{RenderEngine, RenderEngineBuilder};

mod worklet;
pub use worklet::WorkletHub;

mod worker_link;
pub use worker_link::WorkerLink;

#[cfg(feature = "device-io")]
mod output;
#[cfg(feature = "device-io")]
pub use output::OutputDriver;

pub use aulos_core::{
    decode_graph, encode_graph, params, AudioBus, ChannelInterpretation, Connection,
    GraphDescription, GraphError, NodeId, NodeRegistry, NodeSpec, RenderConfig, RenderContext,
    RenderNode, Renderer,
};
pub use aulos_stream::{
    DeviceHandle, SessionConfig, SessionEvent, SessionState, StreamConfig, WorkerMessage,
};

/// Common imports for engine users.
pub mod prelude {
    pub use crate::{
        params, DeviceHandle, GraphDescription, NodeId, NodeSpec, RenderEngine, SessionConfig,
        StreamConfig,
    };
}
