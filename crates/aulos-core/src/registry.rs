//! Node registry for dynamic node creation.
//!
//! Maps `node_type` strings from the graph description to constructor
//! closures. This is what lets serialized graphs (and the worklet layer on
//! top) instantiate nodes without the kernel knowing every node type.

use crate::error::NodeRegistryError;
use crate::graph::NodeId;
use crate::node::{ConstantSourceNode, DestinationNode, GainNode, RenderNode, SineNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Create a `NodeParams` map with key-value pairs.
///
/// # Example
/// ```
/// let params = aulos_core::params! {
///     "frequency" => 440.0,
///     "gain" => 0.5,
/// };
/// assert_eq!(params["frequency"].as_f64(), Some(440.0));
/// ```
#[macro_export]
macro_rules! params {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::NodeParams::new();
        $(
            map.insert($key.to_string(), $value.into());
        )*
        map
    }};
}

/// Function that constructs a node from its id and parameters.
pub type NodeConstructor = Arc<
    dyn Fn(NodeId, &NodeParams) -> Result<Box<dyn RenderNode>, NodeRegistryError> + Send + Sync,
>;

/// Node parameters (simple key-value map).
pub type NodeParams = HashMap<String, NodeParamValue>;

/// Parameter value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeParamValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(String),
}

impl NodeParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.as_f64().map(|f| f as f32)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for NodeParamValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<f32> for NodeParamValue {
    fn from(f: f32) -> Self {
        Self::Float(f as f64)
    }
}

impl From<i64> for NodeParamValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for NodeParamValue {
    fn from(i: i32) -> Self {
        Self::Int(i as i64)
    }
}

impl From<bool> for NodeParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for NodeParamValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for NodeParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Registry of node constructors, cheap to clone and share.
#[derive(Clone)]
pub struct NodeRegistry {
    constructors: Arc<RwLock<HashMap<String, NodeConstructor>>>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a registry pre-loaded with the built-in node types:
    /// `destination`, `gain`, `constant`, and `sine`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();

        registry.register("destination", |_, _| {
            Ok(Box::new(DestinationNode) as Box<dyn RenderNode>)
        });

        registry.register("gain", |_, params: &NodeParams| {
            let gain = params.get("gain").and_then(|v| v.as_f32()).unwrap_or(1.0);
            Ok(Box::new(GainNode::new(gain)) as Box<dyn RenderNode>)
        });

        registry.register("constant", |_, params: &NodeParams| {
            let value = params.get("value").and_then(|v| v.as_f32()).unwrap_or(1.0);
            Ok(Box::new(ConstantSourceNode::new(value)) as Box<dyn RenderNode>)
        });

        registry.register("sine", |_, params: &NodeParams| {
            let frequency = params
                .get("frequency")
                .and_then(|v| v.as_f64())
                .unwrap_or(440.0);
            if !(frequency.is_finite() && frequency > 0.0) {
                return Err(NodeRegistryError::InvalidParameter(
                    "frequency".to_string(),
                    format!("{frequency} is not a positive finite value"),
                ));
            }
            Ok(Box::new(SineNode::new(frequency)) as Box<dyn RenderNode>)
        });

        registry
    }

    /// Register a constructor under a node type name, replacing any previous
    /// registration.
    pub fn register<F>(&self, node_type: &str, constructor: F)
    where
        F: Fn(NodeId, &NodeParams) -> Result<Box<dyn RenderNode>, NodeRegistryError>
            + Send
            + Sync
            + 'static,
    {
        let mut constructors = self
            .constructors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        constructors.insert(node_type.to_string(), Arc::new(constructor));
    }

    /// Construct a node of the given type.
    pub fn create(
        &self,
        node_type: &str,
        id: NodeId,
        params: &NodeParams,
    ) -> Result<Box<dyn RenderNode>, NodeRegistryError> {
        let constructor = {
            let constructors = self
                .constructors
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            constructors.get(node_type).cloned()
        };
        match constructor {
            Some(constructor) => constructor(id, params),
            None => Err(NodeRegistryError::UnknownNodeType(node_type.to_string())),
        }
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(node_type)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
