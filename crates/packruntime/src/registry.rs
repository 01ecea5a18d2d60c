use packcore::kind::OutputRule;
use packcore::{NodeExecutor, NodeKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata about a node kind
#[derive(Debug, Clone, Serialize)]
pub struct KindMetadata {
    pub kind: NodeKind,
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortDefinition {
    pub handle: Option<String>,
    pub accepts: Vec<String>,
}

/// Lookup table from node kind to its executor
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for its kind
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let kind = executor.kind();
        tracing::debug!("Registering executor for kind: {}", kind);
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Registered kinds, in declaration order
    pub fn list_node_kinds(&self) -> Vec<NodeKind> {
        self.executors.keys().copied().collect()
    }

    /// Kinds of the closed set with no executor registered
    pub fn missing_kinds(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|k| !self.executors.contains_key(k))
            .collect()
    }

    pub fn get_metadata(&self, kind: NodeKind) -> Option<KindMetadata> {
        let executor = self.executors.get(&kind)?;
        let inputs = kind
            .inputs()
            .iter()
            .map(|p| PortDefinition {
                handle: p.handle.map(str::to_string),
                accepts: p.accepts.iter().map(ToString::to_string).collect(),
            })
            .collect();
        let output = match kind.output() {
            OutputRule::Fixed(t) => Some(t.to_string()),
            OutputRule::PassThrough => Some("same as input".to_string()),
            OutputRule::JoinResult => Some("TableSelection | NestedTableSelection".to_string()),
            OutputRule::None => None,
        };
        Some(KindMetadata {
            kind,
            description: executor.description().to_string(),
            category: kind.category().to_string(),
            inputs,
            output,
        })
    }
}
