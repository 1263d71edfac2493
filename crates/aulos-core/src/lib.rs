//! Render graph kernel for the aulos audio engine.
//!
//! # Primary API
//!
//! - [`GraphDescription`] / [`decode_graph`]: declarative graph input from the
//!   control plane
//! - [`NodeRegistry`]: `node_type` string to [`RenderNode`] constructors
//! - [`PreparedGraph`] / [`Renderer`]: dependency-ordered per-quantum
//!   processing, driven by whichever thread owns the audio callback
//! - [`mix_inputs_into`] / [`mix_inputs_discrete_into`]: speaker-aware channel
//!   up/down-mixing at the graph edges
//!
//! The render path never allocates, locks, or blocks: graph rebuilds happen on
//! the control thread and are handed to the render thread through an atomic
//! pending slot swapped in at quantum boundaries.

pub mod error;
pub use error::{GraphError, NodeRegistryError, Result};

mod bus;
pub use bus::AudioBus;

mod mixer;
pub use mixer::{deinterleave_into, interleave_into, mix_inputs_discrete_into, mix_inputs_into};

mod graph;
pub use graph::{
    decode_graph, encode_graph, ChannelInterpretation, Connection, GraphDescription, NodeId,
    NodeSpec,
};

pub mod registry;
pub use registry::{NodeConstructor, NodeParamValue, NodeParams, NodeRegistry};

mod node;
pub use node::{
    ConstantSourceNode, DestinationNode, GainNode, RenderContext, RenderNode, SineNode,
};

mod topology;
pub use topology::{InputConnection, NodeLayout, Topology};

mod render;
pub use render::{PreparedGraph, RenderConfig, RenderHandle, Renderer};
