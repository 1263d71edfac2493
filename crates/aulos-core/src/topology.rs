//! Dependency-ordered processing topology, rebuilt on every graph change.
//!
//! All edges reference nodes by dense array index, resolved once per build
//! from the control plane's `NodeId`s; no node owns another, so there is
//! nothing cycle-aware to destroy on the hot path. The finished topology is
//! read-only during quantum processing except for its pre-sized input mix
//! buses.

use crate::bus::AudioBus;
use crate::error::GraphError;
use crate::graph::{ChannelInterpretation, Connection, NodeId};
use std::collections::HashMap;

/// One resolved upstream edge for an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConnection {
    pub source_index: usize,
    pub source_output: usize,
}

/// Per-node shape information the topology build needs.
#[derive(Debug, Clone, Copy)]
pub struct NodeLayout {
    pub input_count: usize,
    pub output_count: usize,
    pub channel_count: usize,
    pub interpretation: ChannelInterpretation,
}

/// The derived, rebuilt scheduling artifact.
pub struct Topology {
    /// `inputs_by_node[node][slot]` lists the upstream edges summed into that
    /// input slot.
    pub inputs_by_node: Vec<Vec<Vec<InputConnection>>>,
    /// Mixed input bus per node per slot. Sized once at build time, never
    /// resized during quantum processing.
    pub input_mix_buses: Vec<Vec<AudioBus>>,
    pub interpretation: Vec<ChannelInterpretation>,
    pub destination_index: usize,
    /// Node indices ordered so every node appears after all of its upstream
    /// dependencies. Empty when the graph is muted (cycle fail-safe).
    pub processing_order: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

impl Topology {
    /// Build the topology for the given node layouts and connections.
    ///
    /// Connections naming unknown ids or out-of-range slots are dropped.
    /// A cycle reachable from the destination aborts the build with
    /// [`GraphError::CycleDetected`]; callers that want the fail-safe
    /// all-silent behavior publish [`Topology::muted`] instead.
    pub fn build(
        layouts: &[NodeLayout],
        index_by_id: &HashMap<NodeId, usize>,
        destination: NodeId,
        connections: &[Connection],
        quantum_frames: usize,
    ) -> Result<Self, GraphError> {
        let node_count = layouts.len();
        let destination_index = *index_by_id
            .get(&destination)
            .ok_or(GraphError::MissingDestination(destination))?;

        let mut inputs_by_node: Vec<Vec<Vec<InputConnection>>> = layouts
            .iter()
            .map(|layout| vec![Vec::new(); layout.input_count])
            .collect();

        for connection in connections {
            let (Some(&source_index), Some(&destination_index)) = (
                index_by_id.get(&connection.source),
                index_by_id.get(&connection.destination),
            ) else {
                tracing::debug!(
                    source = %connection.source,
                    destination = %connection.destination,
                    "dropping connection naming an unknown node"
                );
                continue;
            };

            let slot = connection.destination_input as usize;
            let output = connection.source_output as usize;
            if slot >= layouts[destination_index].input_count
                || output >= layouts[source_index].output_count
            {
                tracing::debug!(
                    source = %connection.source,
                    destination = %connection.destination,
                    "dropping connection with out-of-range slot"
                );
                continue;
            }

            inputs_by_node[destination_index][slot].push(InputConnection {
                source_index,
                source_output: output,
            });
        }

        let mut marks = vec![Mark::Unvisited; node_count];
        let mut processing_order = Vec::with_capacity(node_count);
        visit(
            destination_index,
            &inputs_by_node,
            &mut marks,
            &mut processing_order,
        )?;

        let input_mix_buses = layouts
            .iter()
            .map(|layout| {
                (0..layout.input_count)
                    .map(|_| AudioBus::new(layout.channel_count, quantum_frames))
                    .collect()
            })
            .collect();

        Ok(Self {
            inputs_by_node,
            input_mix_buses,
            interpretation: layouts.iter().map(|l| l.interpretation).collect(),
            destination_index,
            processing_order,
        })
    }

    /// An all-silent topology: no processing order, nothing to mix.
    pub fn muted() -> Self {
        Self {
            inputs_by_node: Vec::new(),
            input_mix_buses: Vec::new(),
            interpretation: Vec::new(),
            destination_index: 0,
            processing_order: Vec::new(),
        }
    }
}

/// Depth-first post-order visit: a node is appended only after everything
/// connected to its inputs, so the order respects dependencies. Revisiting a
/// `Visited` node is DAG sharing; revisiting a `Visiting` node is a cycle.
fn visit(
    node_index: usize,
    inputs_by_node: &[Vec<Vec<InputConnection>>],
    marks: &mut [Mark],
    order: &mut Vec<usize>,
) -> Result<(), GraphError> {
    match marks[node_index] {
        Mark::Visited => return Ok(()),
        Mark::Visiting => return Err(GraphError::CycleDetected),
        Mark::Unvisited => {}
    }
    marks[node_index] = Mark::Visiting;
    for slot in &inputs_by_node[node_index] {
        for connection in slot {
            visit(connection.source_index, inputs_by_node, marks, order)?;
        }
    }
    marks[node_index] = Mark::Visited;
    order.push(node_index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(input_count: usize) -> NodeLayout {
        NodeLayout {
            input_count,
            output_count: 1,
            channel_count: 2,
            interpretation: ChannelInterpretation::Speakers,
        }
    }

    fn connection(source: u64, destination: u64) -> Connection {
        Connection {
            source: NodeId(source),
            source_output: 0,
            destination: NodeId(destination),
            destination_input: 0,
        }
    }

    fn index_map(ids: &[u64]) -> HashMap<NodeId, usize> {
        ids.iter()
            .enumerate()
            .map(|(index, &id)| (NodeId(id), index))
            .collect()
    }

    #[test]
    fn test_source_precedes_destination() {
        // Destination (index 0) fed by A (index 1).
        let layouts = [layout(1), layout(0)];
        let topology = Topology::build(
            &layouts,
            &index_map(&[1, 2]),
            NodeId(1),
            &[connection(2, 1)],
            128,
        )
        .unwrap();
        assert_eq!(topology.processing_order, vec![1, 0]);
        assert_eq!(topology.destination_index, 0);
    }

    #[test]
    fn test_cycle_is_detected() {
        // A <-> B, with A also feeding the destination.
        let layouts = [layout(1), layout(1), layout(1)];
        let connections = [connection(2, 3), connection(3, 2), connection(2, 1)];
        let result = Topology::build(
            &layouts,
            &index_map(&[1, 2, 3]),
            NodeId(1),
            &connections,
            128,
        );
        assert!(matches!(result, Err(GraphError::CycleDetected)));
    }

    #[test]
    fn test_shared_dependency_appears_once() {
        // Diamond: source 4 feeds 2 and 3, both feed the destination 1.
        let layouts = [layout(2), layout(1), layout(1), layout(0)];
        let connections = [
            connection(4, 2),
            connection(4, 3),
            connection(2, 1),
            connection(3, 1),
        ];
        let topology = Topology::build(
            &layouts,
            &index_map(&[1, 2, 3, 4]),
            NodeId(1),
            &connections,
            128,
        )
        .unwrap();
        assert_eq!(topology.processing_order.len(), 4);
        assert_eq!(topology.processing_order.last(), Some(&0));
        let position = |index: usize| {
            topology
                .processing_order
                .iter()
                .position(|&n| n == index)
                .unwrap()
        };
        assert!(position(3) < position(1));
        assert!(position(3) < position(2));
    }

    #[test]
    fn test_unknown_connection_is_dropped() {
        let layouts = [layout(1)];
        let topology = Topology::build(
            &layouts,
            &index_map(&[1]),
            NodeId(1),
            &[connection(99, 1)],
            128,
        )
        .unwrap();
        assert!(topology.inputs_by_node[0][0].is_empty());
        assert_eq!(topology.processing_order, vec![0]);
    }

    #[test]
    fn test_missing_destination_is_an_error() {
        let layouts = [layout(1)];
        let result = Topology::build(&layouts, &index_map(&[1]), NodeId(42), &[], 128);
        assert!(matches!(result, Err(GraphError::MissingDestination(_))));
    }

    #[test]
    fn test_unreachable_nodes_are_not_scheduled() {
        // Node 2 feeds nothing; only the destination is ordered.
        let layouts = [layout(1), layout(0)];
        let topology =
            Topology::build(&layouts, &index_map(&[1, 2]), NodeId(1), &[], 128).unwrap();
        assert_eq!(topology.processing_order, vec![0]);
    }
}
