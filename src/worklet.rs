//! Worklet node registration: the seam between the graph registry and the
//! block streaming transport.
//!
//! A `worklet` node's output is computed out of process. Constructing one
//! creates its request/response streams and records the [`StreamBinding`]
//! so the engine can publish the full set to the worker after every graph
//! build.

use aulos_core::{NodeId, NodeParams, NodeRegistry, NodeRegistryError, RenderNode};
use aulos_stream::{ProcessorPort, StreamBinding, StreamConfig, WorkletNode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_WORKLET_CHANNELS: i64 = 32;

/// Creates worklet ports and tracks the bindings of the most recent graph
/// build.
pub struct WorkletHub {
    stream_config: StreamConfig,
    quantum_frames: u32,
    bindings: Mutex<HashMap<u64, StreamBinding>>,
}

impl WorkletHub {
    pub fn new(stream_config: StreamConfig, quantum_frames: u32) -> Arc<Self> {
        Arc::new(Self {
            stream_config,
            quantum_frames,
            bindings: Mutex::new(HashMap::new()),
        })
    }

    /// Register the `worklet` node type. Parameters: `input_channels` and
    /// `output_channels`, both defaulting to 2.
    pub fn register_into(self: &Arc<Self>, registry: &NodeRegistry) {
        let hub = Arc::clone(self);
        registry.register("worklet", move |id: NodeId, params: &NodeParams| {
            let input_channels = channel_param(params, "input_channels")?;
            let output_channels = channel_param(params, "output_channels")?;

            let port = ProcessorPort::create(
                &hub.stream_config,
                id.0,
                hub.quantum_frames,
                input_channels,
                output_channels,
            )
            .map_err(|e| NodeRegistryError::ConstructionFailed(e.to_string()))?;

            hub.bindings.lock().insert(id.0, port.binding().clone());
            Ok(Box::new(WorkletNode::new(port)) as Box<dyn RenderNode>)
        });
    }

    /// Forget all recorded bindings. Called before each graph build so the
    /// recorded set always mirrors the latest build.
    pub fn reset(&self) {
        self.bindings.lock().clear();
    }

    /// The bindings created by the most recent graph build.
    pub fn current_bindings(&self) -> Vec<StreamBinding> {
        self.bindings.lock().values().cloned().collect()
    }
}

fn channel_param(params: &NodeParams, name: &str) -> Result<u32, NodeRegistryError> {
    let value = params.get(name).and_then(|v| v.as_i64()).unwrap_or(2);
    if !(1..=MAX_WORKLET_CHANNELS).contains(&value) {
        return Err(NodeRegistryError::InvalidParameter(
            name.to_string(),
            format!("{value} is outside 1..={MAX_WORKLET_CHANNELS}"),
        ));
    }
    Ok(value as u32)
}
