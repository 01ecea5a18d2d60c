use crate::{NodeKind, PortType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Unsupported document version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single node. Never escapes the per-node boundary of a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type: expected {expected}, got {actual}")]
    InvalidInputType { expected: String, actual: String },

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Malformed configuration: {0}")]
    MalformedConfiguration(String),

    #[error("IO failure: {0}")]
    IoFailure(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn invalid_input(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        NodeError::InvalidInputType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<ArchiveError> for NodeError {
    fn from(e: ArchiveError) -> Self {
        NodeError::IoFailure(e.to_string())
    }
}

/// A connection or node that cannot take part in a runnable graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Connection {connection} references unknown node {node}")]
    UnknownNode { connection: String, node: String },

    #[error("Connection {connection}: {source_type} cannot feed {target_kind} (expects {expected})")]
    IncompatiblePorts {
        connection: String,
        source_type: PortType,
        target_kind: NodeKind,
        expected: String,
    },

    #[error("Connection {connection}: node {node} ({kind}) has no output")]
    NoOutput {
        connection: String,
        node: String,
        kind: NodeKind,
    },

    #[error("Connection {connection}: {kind} takes no inputs")]
    NoInput { connection: String, kind: NodeKind },

    #[error("Connection {connection}: {kind} has no input handle '{handle}'")]
    UnknownHandle {
        connection: String,
        kind: NodeKind,
        handle: String,
    },

    #[error("Connection {connection}: {kind} has no output handle '{handle}'")]
    UnknownSourceHandle {
        connection: String,
        kind: NodeKind,
        handle: String,
    },

    #[error("Node {node} ({kind}) has {count} connections on input handle '{handle}'")]
    DuplicateHandle {
        node: String,
        kind: NodeKind,
        handle: String,
        count: usize,
    },

    #[error("Node {node} ({kind}) accepts a single input but has {count} incoming connections")]
    TooManyInputs {
        node: String,
        kind: NodeKind,
        count: usize,
    },
}

/// Errors that abort a whole run before any node executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Graph structure error: no starting nodes")]
    NoStartingNodes,

    #[error("Graph structure error: cycle through nodes {}", .nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("Validation failed: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Validation(Vec<ValidationError>),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Graph not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive not found: {0}")]
    NotFound(String),

    #[error("Archive IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive format error: {0}")]
    Format(String),
}
