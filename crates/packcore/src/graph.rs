use crate::{FlowError, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;

/// Current version of [`GraphDocument`].
pub const DOCUMENT_VERSION: u32 = 1;

/// The graph submitted to the engine for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Graph {
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeSpec) -> String {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Adds a connection between the default ports of two nodes.
    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) -> &mut Connection {
        let id = format!("c{}", self.connections.len() + 1);
        self.connections.push(Connection::new(id, source, target));
        let last = self.connections.len() - 1;
        &mut self.connections[last]
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Incoming connections per node id, in connection order.
    pub fn incoming(&self) -> HashMap<&str, Vec<&Connection>> {
        let mut map: HashMap<&str, Vec<&Connection>> = HashMap::new();
        for conn in &self.connections {
            map.entry(conn.target_id.as_str()).or_default().push(conn);
        }
        map
    }

    /// Outgoing connections per node id, in connection order.
    pub fn outgoing(&self) -> HashMap<&str, Vec<&Connection>> {
        let mut map: HashMap<&str, Vec<&Connection>> = HashMap::new();
        for conn in &self.connections {
            map.entry(conn.source_id.as_str()).or_default().push(conn);
        }
        map
    }

    /// Nodes without incoming connections, in graph order.
    pub fn starting_nodes(&self) -> Vec<&NodeSpec> {
        let incoming = self.incoming();
        self.nodes
            .iter()
            .filter(|n| !incoming.contains_key(n.id.as_str()))
            .collect()
    }
}

/// Node specification in a graph. Layout data is carried for the editor and
/// ignored by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default = "empty_object")]
    pub configuration: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

fn empty_object() -> Json {
    Json::Object(Map::new())
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            configuration: empty_object(),
            name: None,
            position: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        if !self.configuration.is_object() {
            self.configuration = empty_object();
        }
        if let Json::Object(map) = &mut self.configuration {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Replaces the whole configuration object.
    pub fn with_configuration(mut self, configuration: Json) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(Json::as_str)
    }
}

/// Connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Connection {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_id: source.into(),
            target_id: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn from_handle(&mut self, handle: impl Into<String>) -> &mut Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn to_handle(&mut self, handle: impl Into<String>) -> &mut Self {
        self.target_handle = Some(handle.into());
        self
    }
}

/// Node position in the visual editor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Per-run options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// Reset counter sequences before the run.
    pub reset_counters: bool,
    /// Archives read by `allEnabledMods` nodes.
    pub enabled_mods: Vec<String>,
    /// Game data archives searched for referenced tables after the
    /// selection's own sources.
    pub base_archives: Vec<String>,
    /// Archive written by save nodes. Defaults to one derived from the
    /// execution id.
    pub output_archive: Option<String>,
    /// Re-check port compatibility before running.
    pub validate_ports: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reset_counters: true,
            enabled_mods: Vec::new(),
            base_archives: Vec::new(),
            output_archive: None,
            validate_ports: true,
        }
    }
}

/// Versioned editor-side serialization of a graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphDocument {
    pub version: u32,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub options: RunOptions,
    #[serde(default)]
    pub metadata: Map<String, Json>,
}

impl GraphDocument {
    pub fn new(graph: Graph) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            nodes: graph.nodes,
            connections: graph.connections,
            options: RunOptions::default(),
            metadata: Map::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let doc: GraphDocument = serde_json::from_str(json)?;
        if doc.version > DOCUMENT_VERSION {
            return Err(FlowError::UnsupportedVersion {
                found: doc.version,
                supported: DOCUMENT_VERSION,
            });
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn graph(&self) -> Graph {
        Graph {
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
        }
    }
}
