//! Prepared graphs and the per-quantum renderer.
//!
//! Graph rebuilds happen on the control thread: nodes are instantiated, output
//! buses allocated, and the topology derived, all off to the side. The
//! finished [`PreparedGraph`] is published through an atomic pending slot that
//! the render thread swaps in at the start of a quantum, so the render thread
//! never observes a half-built graph.

use crate::bus::AudioBus;
use crate::error::GraphError;
use crate::graph::GraphDescription;
use crate::mixer::{interleave_into, mix_inputs_discrete_into, mix_inputs_into};
use crate::node::{RenderContext, RenderNode};
use crate::registry::NodeRegistry;
use crate::topology::{NodeLayout, Topology};
use crate::ChannelInterpretation;
use arc_swap::ArcSwapOption;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Upstream fan-in kept inline on the render path.
const INLINE_FAN_IN: usize = 8;

/// Fixed render format for a session.
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    pub sample_rate: f64,
    pub quantum_frames: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            quantum_frames: 128,
        }
    }
}

/// A fully-built render graph: node instances, their output buses, and the
/// derived topology. Created on the control thread, consumed by the renderer.
pub struct PreparedGraph {
    nodes: Vec<Box<dyn RenderNode>>,
    outputs: Vec<Vec<AudioBus>>,
    topology: Topology,
    silence: AudioBus,
}

impl PreparedGraph {
    /// Instantiate every node in the description and derive the topology.
    ///
    /// Returns [`GraphError::CycleDetected`] when a cycle is reachable from
    /// the destination; callers decide between keeping the previous graph and
    /// publishing [`PreparedGraph::muted`] (the fail-safe).
    pub fn prepare(
        description: &GraphDescription,
        registry: &NodeRegistry,
        config: &RenderConfig,
    ) -> Result<Self, GraphError> {
        let mut nodes = Vec::with_capacity(description.nodes.len());
        let mut layouts = Vec::with_capacity(description.nodes.len());
        let mut index_by_id = HashMap::with_capacity(description.nodes.len());

        for (index, (&id, spec)) in description.nodes.iter().enumerate() {
            let node = registry.create(&spec.node_type, id, &spec.params)?;
            layouts.push(NodeLayout {
                input_count: node.input_count(),
                output_count: node.output_count(),
                channel_count: spec.channel_count.max(1) as usize,
                interpretation: spec.interpretation,
            });
            nodes.push(node);
            index_by_id.insert(id, index);
        }

        let topology = Topology::build(
            &layouts,
            &index_by_id,
            description.destination,
            &description.connections,
            config.quantum_frames,
        )?;

        let outputs = layouts
            .iter()
            .map(|layout| {
                (0..layout.output_count)
                    .map(|_| AudioBus::new(layout.channel_count, config.quantum_frames))
                    .collect()
            })
            .collect();

        Ok(Self {
            nodes,
            outputs,
            topology,
            silence: AudioBus::new(2, config.quantum_frames),
        })
    }

    /// An empty graph that renders silence. Published as the fail-safe when a
    /// cycle makes the whole quantum unschedulable.
    pub fn muted(config: &RenderConfig) -> Self {
        Self {
            nodes: Vec::new(),
            outputs: Vec::new(),
            topology: Topology::muted(),
            silence: AudioBus::new(2, config.quantum_frames),
        }
    }

    /// The destination node's first output bus: the quantum's final result.
    pub fn destination_bus(&self) -> &AudioBus {
        self.outputs
            .get(self.topology.destination_index)
            .and_then(|buses| buses.first())
            .unwrap_or(&self.silence)
    }

    fn render(&mut self, ctx: &RenderContext) {
        let Topology {
            inputs_by_node,
            input_mix_buses,
            interpretation,
            destination_index,
            processing_order,
        } = &mut self.topology;

        if processing_order.is_empty() {
            if let Some(buses) = self.outputs.get_mut(*destination_index) {
                for bus in buses {
                    bus.zero();
                }
            }
            return;
        }

        for &node_index in processing_order.iter() {
            let slots = &inputs_by_node[node_index];
            let mix_buses = &mut input_mix_buses[node_index];
            for (slot, connections) in slots.iter().enumerate() {
                // Pointer wiring: upstream buses are referenced in place from
                // already-processed nodes, never copied.
                let upstream: SmallVec<[Option<&AudioBus>; INLINE_FAN_IN]> = connections
                    .iter()
                    .map(|c| {
                        self.outputs
                            .get(c.source_index)
                            .and_then(|buses| buses.get(c.source_output))
                    })
                    .collect();
                match interpretation[node_index] {
                    ChannelInterpretation::Speakers => {
                        mix_inputs_into(&mut mix_buses[slot], &upstream)
                    }
                    ChannelInterpretation::Discrete => {
                        mix_inputs_discrete_into(&mut mix_buses[slot], &upstream)
                    }
                }
            }

            self.nodes[node_index].process(ctx, mix_buses, &mut self.outputs[node_index]);
        }
    }
}

/// Control-thread handle for publishing prepared graphs to the renderer.
///
/// Publications are latest-wins: an unconsumed pending graph is replaced.
#[derive(Clone)]
pub struct RenderHandle {
    pending: Arc<ArcSwapOption<PreparedGraph>>,
}

impl RenderHandle {
    pub fn publish(&self, graph: PreparedGraph) {
        self.pending.store(Some(Arc::new(graph)));
    }
}

/// Drives one processing quantum at a time. Owned by whichever thread owns the
/// audio callback; that thread must never block on I/O or locks, and nothing
/// here does.
pub struct Renderer {
    config: RenderConfig,
    pending: Arc<ArcSwapOption<PreparedGraph>>,
    current: Option<PreparedGraph>,
    current_frame: u64,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> (Self, RenderHandle) {
        let pending = Arc::new(ArcSwapOption::empty());
        (
            Self {
                config,
                pending: Arc::clone(&pending),
                current: None,
                current_frame: 0,
            },
            RenderHandle { pending },
        )
    }

    pub fn config(&self) -> RenderConfig {
        self.config
    }

    /// Render one quantum and return the destination bus, or `None` when no
    /// graph has ever been published.
    pub fn render_quantum(&mut self) -> Option<&AudioBus> {
        self.adopt_pending();

        let ctx = RenderContext {
            sample_rate: self.config.sample_rate,
            quantum_frames: self.config.quantum_frames,
            current_frame: self.current_frame,
            playback_time: self.current_frame as f64 / self.config.sample_rate,
        };
        self.current_frame += self.config.quantum_frames as u64;

        let graph = self.current.as_mut()?;
        graph.render(&ctx);
        Some(graph.destination_bus())
    }

    /// Render one quantum directly into an interleaved output slice, zeroing
    /// whatever the destination bus does not cover.
    pub fn render_interleaved(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        if let Some(bus) = self.render_quantum() {
            interleave_into(bus, out);
        }
    }

    fn adopt_pending(&mut self) {
        if let Some(pending) = self.pending.swap(None) {
            // The publishing side drops its Arc immediately after store, so
            // the renderer is the only holder here.
            match Arc::try_unwrap(pending) {
                Ok(graph) => self.current = Some(graph),
                Err(shared) => self.pending.store(Some(shared)),
            }
        }
    }
}
