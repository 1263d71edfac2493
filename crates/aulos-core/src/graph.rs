//! Declarative graph descriptions and their wire codec.
//!
//! The control plane describes the render graph as a value: a node map, a
//! destination id, and a connection list. Descriptions travel across the
//! process boundary as an opaque encoded byte buffer with a small magic/version
//! prefix ahead of the bincode body.

use crate::error::GraphError;
use crate::registry::NodeParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const GRAPH_MAGIC: u32 = 0x4147_5246; // "AGRF"
const GRAPH_VERSION: u32 = 1;
const GRAPH_PREFIX_BYTES: usize = 8;

/// Stable node identifier assigned by the control plane.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a node's summed inputs are mixed down to its channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChannelInterpretation {
    #[default]
    Speakers,
    Discrete,
}

/// One node in the graph description: its type, parameters, and the channel
/// format of its mixed input and output buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_type: String,
    pub channel_count: u32,
    pub interpretation: ChannelInterpretation,
    pub params: NodeParams,
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            channel_count: 2,
            interpretation: ChannelInterpretation::Speakers,
            params: NodeParams::new(),
        }
    }

    pub fn with_channel_count(mut self, channel_count: u32) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn with_interpretation(mut self, interpretation: ChannelInterpretation) -> Self {
        self.interpretation = interpretation;
        self
    }

    pub fn with_params(mut self, params: NodeParams) -> Self {
        self.params = params;
        self
    }
}

/// One edge: source output slot into destination input slot. Many connections
/// may target the same input slot; all of them are summed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: NodeId,
    pub source_output: u32,
    pub destination: NodeId,
    pub destination_input: u32,
}

/// The complete graph description, delivered as a value (never incrementally).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphDescription {
    pub nodes: BTreeMap<NodeId, NodeSpec>,
    pub destination: NodeId,
    pub connections: Vec<Connection>,
}

impl GraphDescription {
    pub fn new(destination: NodeId) -> Self {
        Self {
            nodes: BTreeMap::new(),
            destination,
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, id: NodeId, spec: NodeSpec) -> &mut Self {
        self.nodes.insert(id, spec);
        self
    }

    pub fn connect(&mut self, source: NodeId, destination: NodeId) -> &mut Self {
        self.connect_slots(source, 0, destination, 0)
    }

    pub fn connect_slots(
        &mut self,
        source: NodeId,
        source_output: u32,
        destination: NodeId,
        destination_input: u32,
    ) -> &mut Self {
        self.connections.push(Connection {
            source,
            source_output,
            destination,
            destination_input,
        });
        self
    }
}

/// Encode a graph description into its opaque wire form.
pub fn encode_graph(description: &GraphDescription) -> Result<Vec<u8>, GraphError> {
    let mut out = Vec::with_capacity(GRAPH_PREFIX_BYTES + 64);
    out.extend_from_slice(&GRAPH_MAGIC.to_le_bytes());
    out.extend_from_slice(&GRAPH_VERSION.to_le_bytes());
    bincode::serialize_into(&mut out, description)?;
    Ok(out)
}

/// Decode a graph description previously produced by [`encode_graph`].
pub fn decode_graph(bytes: &[u8]) -> Result<GraphDescription, GraphError> {
    if bytes.len() < GRAPH_PREFIX_BYTES {
        return Err(GraphError::TruncatedGraph);
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().expect("sliced to 4 bytes"));
    if magic != GRAPH_MAGIC {
        return Err(GraphError::BadMagic);
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().expect("sliced to 4 bytes"));
    if version != GRAPH_VERSION {
        return Err(GraphError::UnsupportedVersion(version));
    }
    Ok(bincode::deserialize(&bytes[GRAPH_PREFIX_BYTES..])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_graph() -> GraphDescription {
        let mut description = GraphDescription::new(NodeId(1));
        description.add_node(NodeId(1), NodeSpec::new("destination"));
        description.add_node(
            NodeId(2),
            NodeSpec::new("gain").with_params(crate::params! { "gain" => 0.5 }),
        );
        description.connect(NodeId(2), NodeId(1));
        description
    }

    #[test]
    fn test_codec_round_trip() {
        let graph = example_graph();
        let bytes = encode_graph(&graph).unwrap();
        let decoded = decode_graph(&bytes).unwrap();
        assert_eq!(decoded.destination, NodeId(1));
        assert_eq!(decoded.nodes.len(), 2);
        assert_eq!(decoded.connections, graph.connections);
        assert_eq!(decoded.nodes[&NodeId(2)].node_type, "gain");
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = encode_graph(&example_graph()).unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(decode_graph(&bytes), Err(GraphError::BadMagic)));
    }

    #[test]
    fn test_decode_rejects_unsupported_version() {
        let mut bytes = encode_graph(&example_graph()).unwrap();
        bytes[4] = 0x7f;
        assert!(matches!(
            decode_graph(&bytes),
            Err(GraphError::UnsupportedVersion(0x7f))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        assert!(matches!(
            decode_graph(&[0x41, 0x47]),
            Err(GraphError::TruncatedGraph)
        ));
    }
}
