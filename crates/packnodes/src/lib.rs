//! Node executors
//!
//! One executor per node kind. [`register_all`] installs the full set into
//! a registry.

mod common;
mod custom;
mod export;
mod filter;
mod group;
mod join;
mod nested;
mod numeric;
mod reference;
mod rowgen;
mod save;
mod select;
mod source;
mod text;

pub use custom::{CustomRowsInputNode, CustomSchemaNode, ReadTsvFromPackNode};
pub use export::{table_to_tsv, ColumnCollectorNode, DumpToTsvNode};
pub use filter::FilterNode;
pub use group::GroupByNode;
pub use join::{build_index, ExtractTableNode, IndexTableNode, LookupNode};
pub use nested::{AggregateNestedNode, FlattenNestedNode};
pub use numeric::{ClampMinNode, MergeChangesNode, NumericAdjustmentNode, RoundUpNode};
pub use reference::{ReferenceLookupNode, ReverseReferenceLookupNode};
pub use rowgen::{GenerateRowsNode, GENERATED_FILE_NAME};
pub use save::{SaveChangesNode, DEFAULT_TEXT_ENTRY};
pub use select::{ColumnSelectionNode, TableSelectionNode};
pub use source::{AllEnabledModsNode, PackFilesNode};
pub use text::{AppendTextNode, ColumnsToTextNode, GroupedColumnsToTextNode, TextJoinNode, TextSurroundNode};

use packruntime::ExecutorRegistry;
use std::sync::Arc;

/// Register every node kind's executor with a registry
pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register(Arc::new(PackFilesNode));
    registry.register(Arc::new(AllEnabledModsNode));
    registry.register(Arc::new(TableSelectionNode));
    registry.register(Arc::new(ColumnSelectionNode));
    registry.register(Arc::new(FilterNode));
    registry.register(Arc::new(ReferenceLookupNode));
    registry.register(Arc::new(ReverseReferenceLookupNode));
    registry.register(Arc::new(IndexTableNode));
    registry.register(Arc::new(LookupNode));
    registry.register(Arc::new(FlattenNestedNode));
    registry.register(Arc::new(AggregateNestedNode));
    registry.register(Arc::new(ExtractTableNode));
    registry.register(Arc::new(GroupByNode));
    registry.register(Arc::new(GenerateRowsNode));
    registry.register(Arc::new(NumericAdjustmentNode::new()));
    registry.register(Arc::new(ClampMinNode));
    registry.register(Arc::new(RoundUpNode));
    registry.register(Arc::new(MergeChangesNode));
    registry.register(Arc::new(ColumnsToTextNode));
    registry.register(Arc::new(GroupedColumnsToTextNode));
    registry.register(Arc::new(TextSurroundNode));
    registry.register(Arc::new(AppendTextNode));
    registry.register(Arc::new(TextJoinNode));
    registry.register(Arc::new(SaveChangesNode));
    registry.register(Arc::new(CustomSchemaNode));
    registry.register(Arc::new(CustomRowsInputNode));
    registry.register(Arc::new(ReadTsvFromPackNode));
    registry.register(Arc::new(DumpToTsvNode));
    registry.register(Arc::new(ColumnCollectorNode));
}

/// A registry with every executor installed
pub fn default_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    register_all(&mut registry);
    registry
}
