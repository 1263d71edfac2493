//! Error types for aulos-core.

use crate::graph::NodeId;
use thiserror::Error;

/// Errors from graph decoding, validation, and topology builds.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("graph contains a cycle reachable from the destination")]
    CycleDetected,

    #[error("destination node {0} is not present in the node map")]
    MissingDestination(NodeId),

    #[error("graph buffer too short for header")]
    TruncatedGraph,

    #[error("bad graph magic")]
    BadMagic,

    #[error("unsupported graph version {0}")]
    UnsupportedVersion(u32),

    #[error("graph codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Node(#[from] NodeRegistryError),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, GraphError>;

/// Errors from node registry operations.
#[derive(Error, Debug)]
pub enum NodeRegistryError {
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter '{0}': {1}")]
    InvalidParameter(String, String),

    #[error("construction failed: {0}")]
    ConstructionFailed(String),
}
