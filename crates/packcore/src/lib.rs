//! Core abstractions for the pack dataflow engine
//!
//! This crate provides the port vocabulary, graph model, typed payloads and
//! collaborator traits that the runtime and the node library build on. It
//! has no scheduling logic.

pub mod archive;
mod counter;
mod error;
pub mod events;
mod graph;
pub mod kind;
mod node;
pub mod payload;
pub mod port;
pub mod schema;
pub mod table;
pub mod validate;
mod value;

pub use archive::{Archive, ArchiveEntry, ArchiveStore, DecodedTable, EntryData, MemoryArchiveStore};
pub use counter::CounterRegistry;
pub use error::{ArchiveError, FlowError, GraphError, NodeError, ValidationError};
pub use events::*;
pub use graph::{Connection, Graph, GraphDocument, NodeSpec, Position, RunOptions, DOCUMENT_VERSION};
pub use kind::{FanIn, NodeKind};
pub use node::{NodeContext, NodeExecutor, NodeInput, NodeMetadata, NodeOutput, Services};
pub use payload::Payload;
pub use port::PortType;
pub use schema::{InMemorySchemaRegistry, SchemaRegistry};
pub use table::{Row, TableData};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
