use crate::archive::{ArchiveLocks, ArchiveStore};
use crate::events::{EventEmitter, ExecutionId};
use crate::payload::Payload;
use crate::schema::SchemaRegistry;
use crate::{CounterRegistry, NodeError, NodeKind, PortType, RunOptions};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Core trait implemented by every node kind's executor.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The kind this executor runs.
    fn kind(&self) -> NodeKind;

    /// Execute the node against its aggregated input.
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Validate configuration before a run
    fn validate_config(&self, _config: &serde_json::Value) -> Result<(), NodeError> {
        Ok(())
    }

    fn description(&self) -> &str {
        ""
    }
}

/// The single logical input of a node after fan-in aggregation.
#[derive(Debug, Clone, Default)]
pub enum NodeInput {
    #[default]
    None,
    Single(Payload),
    /// Merge fan-in: every resolved upstream payload, nulls dropped.
    Many(Vec<Payload>),
    /// Join fan-in: `(source, index)`.
    Pair {
        source: Option<Payload>,
        index: Option<Payload>,
    },
}

impl NodeInput {
    pub fn is_none(&self) -> bool {
        matches!(self, NodeInput::None)
    }

    fn describe(&self) -> String {
        match self {
            NodeInput::None => "nothing".to_string(),
            NodeInput::Single(p) => p.port_type().to_string(),
            NodeInput::Many(items) => format!("list of {}", items.len()),
            NodeInput::Pair { .. } => "join pair".to_string(),
        }
    }

    /// The single payload, or `MissingInput`.
    pub fn single(&self) -> Result<&Payload, NodeError> {
        match self {
            NodeInput::Single(p) => Ok(p),
            NodeInput::None => Err(NodeError::MissingInput("input".to_string())),
            other => Err(NodeError::invalid_input("single payload", other.describe())),
        }
    }

    /// Every payload carried, whatever the fan-in shape.
    pub fn payloads(&self) -> Vec<&Payload> {
        match self {
            NodeInput::None => Vec::new(),
            NodeInput::Single(p) => vec![p],
            NodeInput::Many(items) => items.iter().collect(),
            NodeInput::Pair { source, index } => source.iter().chain(index.iter()).collect(),
        }
    }
}

/// Extracts one payload variant from a node's single input, reporting
/// `InvalidInputType` otherwise.
#[macro_export]
macro_rules! expect_input {
    ($input:expr, $variant:ident) => {
        match $input.single()? {
            $crate::Payload::$variant(inner) => Ok::<_, $crate::NodeError>(inner),
            other => Err($crate::NodeError::invalid_input(
                stringify!($variant),
                other.port_type().to_string(),
            )),
        }
    };
}

/// Collaborators shared by every node of a run.
pub struct Services {
    pub archives: Arc<dyn ArchiveStore>,
    pub schemas: Arc<dyn SchemaRegistry>,
    pub write_locks: ArchiveLocks,
}

impl Services {
    pub fn new(archives: Arc<dyn ArchiveStore>, schemas: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            archives,
            schemas,
            write_locks: ArchiveLocks::new(),
        }
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: String,

    pub kind: NodeKind,

    /// Shared by every node of one run; save nodes derive their output
    /// archive from it.
    pub execution_id: ExecutionId,

    /// Aggregated input from connected nodes
    pub input: NodeInput,

    /// Snapshot of the node's configuration
    pub config: serde_json::Value,

    pub options: Arc<RunOptions>,

    pub services: Arc<Services>,

    /// Counter sequences of the runtime; the only mutable engine state.
    pub counters: Arc<Mutex<CounterRegistry>>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    pub cancellation: tokio_util::sync::CancellationToken,
}

impl NodeContext {
    /// Deserializes the configuration into the kind's typed config.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, NodeError> {
        let config = if self.config.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.config.clone()
        };
        serde_json::from_value(config).map_err(|e| NodeError::MalformedConfiguration(e.to_string()))
    }

    /// Archive written by every save node of this run.
    pub fn output_archive(&self) -> String {
        self.options
            .output_archive
            .clone()
            .unwrap_or_else(|| format!("packflow_{}.pack", self.execution_id.simple()))
    }

    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.cancellation.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub primary: Option<Payload>,

    /// Secondary output (filters only).
    pub else_branch: Option<Payload>,

    /// Named outputs of fan-out nodes.
    pub outputs: BTreeMap<String, Payload>,

    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(payload: Payload) -> Self {
        Self {
            primary: Some(payload),
            ..Self::default()
        }
    }

    pub fn with_else(mut self, payload: Payload) -> Self {
        self.else_branch = Some(payload);
        self
    }

    pub fn with_output(mut self, handle: impl Into<String>, payload: Payload) -> Self {
        self.outputs.insert(handle.into(), payload);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.custom.insert(key.into(), value.into());
        self
    }

    pub fn primary_type(&self) -> Option<PortType> {
        self.primary.as_ref().map(Payload::port_type)
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub custom: BTreeMap<String, serde_json::Value>,
}
