//! Graph execution runtime
//!
//! This crate provides the scheduler that runs graphs in dependency order,
//! the per-kind fan-in policies, the executor registry and the execution
//! report.

pub mod fanin;
mod registry;
mod report;
mod runtime;
mod scheduler;

pub use fanin::{aggregate_input, merge_for_save};
pub use registry::{ExecutorRegistry, KindMetadata, PortDefinition};
pub use report::{ExecutionReport, NodeReport};
pub use runtime::{GraphRuntime, RuntimeConfig};
pub use scheduler::{find_cycles, GraphScheduler, RunEnvironment};
