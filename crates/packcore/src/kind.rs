//! The closed set of node kinds and their port declarations.

use crate::PortType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source handle selecting the secondary output of a filter.
pub const ELSE_HANDLE: &str = "else";
/// Source handle selecting the primary output of a filter.
pub const MATCH_HANDLE: &str = "match";
/// Join input carrying the table being enriched.
pub const SOURCE_HANDLE: &str = "source";
/// Join input carrying the index (or raw table) to match against.
pub const INDEX_HANDLE: &str = "index";
/// Maximum number of independently configured row generation outputs.
pub const MAX_ROW_OUTPUTS: usize = 4;
/// Source handles naming the independently configured row generation outputs.
pub const ROW_OUTPUT_HANDLES: [&str; MAX_ROW_OUTPUTS] = ["output0", "output1", "output2", "output3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    PackFiles,
    AllEnabledMods,
    TableSelection,
    ColumnSelection,
    Filter,
    ReferenceLookup,
    ReverseReferenceLookup,
    IndexTable,
    Lookup,
    FlattenNested,
    AggregateNested,
    ExtractTable,
    GroupBy,
    GenerateRows,
    NumericAdjustment,
    ClampMin,
    RoundUp,
    MergeChanges,
    ColumnsToText,
    GroupedColumnsToText,
    TextSurround,
    AppendText,
    TextJoin,
    SaveChanges,
    CustomSchema,
    CustomRowsInput,
    ReadTsvFromPack,
    DumpToTsv,
    ColumnCollector,
}

/// How a node's single logical input is computed from its incoming
/// connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanIn {
    /// Ordered list of every resolved payload.
    Merge,
    /// Text, then changed columns, then the union of table selections.
    Save,
    /// `(source, index)` pair addressed by target handle.
    Join,
    /// Union of table selections when more than one connection arrives.
    RowGeneration,
    /// One upstream payload.
    Single,
}

/// How the output port type of a node is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRule {
    Fixed(PortType),
    /// Same type as the node's input.
    PassThrough,
    /// Depends on the configured join type.
    JoinResult,
    None,
}

/// A declared input port. `handle` is `None` for the default port.
#[derive(Debug, Clone, Copy)]
pub struct InputPort {
    pub handle: Option<&'static str>,
    pub accepts: &'static [PortType],
}

impl InputPort {
    const fn single(accepts: &'static [PortType]) -> Self {
        Self { handle: None, accepts }
    }
}

const PACKS: &[InputPort] = &[InputPort::single(&[PortType::PackFiles])];
const TABLES: &[InputPort] = &[InputPort::single(&[PortType::TableSelection])];
const NESTED: &[InputPort] = &[InputPort::single(&[PortType::NestedTableSelection])];
const COLUMNS: &[InputPort] = &[InputPort::single(&[PortType::ColumnSelection])];
const CHANGES: &[InputPort] = &[InputPort::single(&[PortType::ChangedColumnSelection])];
const TEXT: &[InputPort] = &[InputPort::single(&[PortType::Text])];
const TEXT_LINES: &[InputPort] = &[InputPort::single(&[PortType::TextLines])];
const SCHEMA: &[InputPort] = &[InputPort::single(&[PortType::CustomSchema])];
const JOIN: &[InputPort] = &[
    InputPort {
        handle: Some(SOURCE_HANDLE),
        accepts: &[PortType::TableSelection],
    },
    InputPort {
        handle: Some(INDEX_HANDLE),
        accepts: &[PortType::IndexedTable, PortType::TableSelection],
    },
];

impl NodeKind {
    pub const ALL: [NodeKind; 29] = [
        NodeKind::PackFiles,
        NodeKind::AllEnabledMods,
        NodeKind::TableSelection,
        NodeKind::ColumnSelection,
        NodeKind::Filter,
        NodeKind::ReferenceLookup,
        NodeKind::ReverseReferenceLookup,
        NodeKind::IndexTable,
        NodeKind::Lookup,
        NodeKind::FlattenNested,
        NodeKind::AggregateNested,
        NodeKind::ExtractTable,
        NodeKind::GroupBy,
        NodeKind::GenerateRows,
        NodeKind::NumericAdjustment,
        NodeKind::ClampMin,
        NodeKind::RoundUp,
        NodeKind::MergeChanges,
        NodeKind::ColumnsToText,
        NodeKind::GroupedColumnsToText,
        NodeKind::TextSurround,
        NodeKind::AppendText,
        NodeKind::TextJoin,
        NodeKind::SaveChanges,
        NodeKind::CustomSchema,
        NodeKind::CustomRowsInput,
        NodeKind::ReadTsvFromPack,
        NodeKind::DumpToTsv,
        NodeKind::ColumnCollector,
    ];

    /// Identifier used in graph documents (e.g. `tableSelection`).
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::PackFiles => "packFiles",
            NodeKind::AllEnabledMods => "allEnabledMods",
            NodeKind::TableSelection => "tableSelection",
            NodeKind::ColumnSelection => "columnSelection",
            NodeKind::Filter => "filter",
            NodeKind::ReferenceLookup => "referenceLookup",
            NodeKind::ReverseReferenceLookup => "reverseReferenceLookup",
            NodeKind::IndexTable => "indexTable",
            NodeKind::Lookup => "lookup",
            NodeKind::FlattenNested => "flattenNested",
            NodeKind::AggregateNested => "aggregateNested",
            NodeKind::ExtractTable => "extractTable",
            NodeKind::GroupBy => "groupBy",
            NodeKind::GenerateRows => "generateRows",
            NodeKind::NumericAdjustment => "numericAdjustment",
            NodeKind::ClampMin => "clampMin",
            NodeKind::RoundUp => "roundUp",
            NodeKind::MergeChanges => "mergeChanges",
            NodeKind::ColumnsToText => "columnsToText",
            NodeKind::GroupedColumnsToText => "groupedColumnsToText",
            NodeKind::TextSurround => "textSurround",
            NodeKind::AppendText => "appendText",
            NodeKind::TextJoin => "textJoin",
            NodeKind::SaveChanges => "saveChanges",
            NodeKind::CustomSchema => "customSchema",
            NodeKind::CustomRowsInput => "customRowsInput",
            NodeKind::ReadTsvFromPack => "readTsvFromPack",
            NodeKind::DumpToTsv => "dumpToTsv",
            NodeKind::ColumnCollector => "columnCollector",
        }
    }

    pub fn inputs(self) -> &'static [InputPort] {
        match self {
            NodeKind::PackFiles | NodeKind::AllEnabledMods | NodeKind::CustomSchema => &[],
            NodeKind::TableSelection | NodeKind::ReadTsvFromPack => PACKS,
            NodeKind::ColumnSelection
            | NodeKind::Filter
            | NodeKind::ReferenceLookup
            | NodeKind::ReverseReferenceLookup
            | NodeKind::IndexTable
            | NodeKind::ExtractTable
            | NodeKind::GroupBy
            | NodeKind::GenerateRows
            | NodeKind::ColumnsToText
            | NodeKind::GroupedColumnsToText
            | NodeKind::DumpToTsv
            | NodeKind::ColumnCollector => TABLES,
            NodeKind::Lookup => JOIN,
            NodeKind::FlattenNested | NodeKind::AggregateNested => NESTED,
            NodeKind::NumericAdjustment => COLUMNS,
            NodeKind::ClampMin
            | NodeKind::RoundUp
            | NodeKind::MergeChanges
            | NodeKind::SaveChanges => CHANGES,
            NodeKind::TextSurround | NodeKind::AppendText => TEXT,
            NodeKind::TextJoin => TEXT_LINES,
            NodeKind::CustomRowsInput => SCHEMA,
        }
    }

    pub fn output(self) -> OutputRule {
        match self {
            NodeKind::PackFiles | NodeKind::AllEnabledMods => OutputRule::Fixed(PortType::PackFiles),
            NodeKind::ColumnSelection => OutputRule::Fixed(PortType::ColumnSelection),
            NodeKind::IndexTable => OutputRule::Fixed(PortType::IndexedTable),
            NodeKind::Lookup => OutputRule::JoinResult,
            NodeKind::NumericAdjustment
            | NodeKind::ClampMin
            | NodeKind::RoundUp
            | NodeKind::MergeChanges => OutputRule::Fixed(PortType::ChangedColumnSelection),
            NodeKind::ColumnsToText => OutputRule::Fixed(PortType::TextLines),
            NodeKind::GroupedColumnsToText => OutputRule::Fixed(PortType::GroupedText),
            NodeKind::TextSurround | NodeKind::AppendText => OutputRule::PassThrough,
            NodeKind::TextJoin | NodeKind::DumpToTsv => OutputRule::Fixed(PortType::Text),
            NodeKind::SaveChanges => OutputRule::None,
            NodeKind::CustomSchema => OutputRule::Fixed(PortType::CustomSchema),
            NodeKind::TableSelection
            | NodeKind::Filter
            | NodeKind::ReferenceLookup
            | NodeKind::ReverseReferenceLookup
            | NodeKind::FlattenNested
            | NodeKind::AggregateNested
            | NodeKind::ExtractTable
            | NodeKind::GroupBy
            | NodeKind::GenerateRows
            | NodeKind::CustomRowsInput
            | NodeKind::ReadTsvFromPack
            | NodeKind::ColumnCollector => OutputRule::Fixed(PortType::TableSelection),
        }
    }

    pub fn fan_in(self) -> FanIn {
        match self {
            NodeKind::MergeChanges => FanIn::Merge,
            NodeKind::SaveChanges => FanIn::Save,
            NodeKind::Lookup => FanIn::Join,
            NodeKind::GenerateRows => FanIn::RowGeneration,
            _ => FanIn::Single,
        }
    }

    /// Whether more than one incoming connection is meaningful.
    pub fn accepts_multiple_inputs(self) -> bool {
        self.fan_in() != FanIn::Single
    }

    /// Kinds whose executors draw from the run's counter sequences.
    pub fn draws_counters(self) -> bool {
        matches!(self, NodeKind::GenerateRows)
    }

    /// Named outputs a connection may pick with its source handle.
    pub fn source_handles(self) -> &'static [&'static str] {
        match self {
            NodeKind::Filter => &[MATCH_HANDLE, ELSE_HANDLE],
            NodeKind::GenerateRows => &ROW_OUTPUT_HANDLES,
            _ => &[],
        }
    }

    pub fn category(self) -> &'static str {
        match self {
            NodeKind::PackFiles | NodeKind::AllEnabledMods => "source",
            NodeKind::TableSelection | NodeKind::ColumnSelection | NodeKind::Filter => "selection",
            NodeKind::ReferenceLookup
            | NodeKind::ReverseReferenceLookup
            | NodeKind::IndexTable
            | NodeKind::Lookup
            | NodeKind::FlattenNested
            | NodeKind::AggregateNested
            | NodeKind::ExtractTable
            | NodeKind::GroupBy => "relational",
            NodeKind::GenerateRows => "generation",
            NodeKind::NumericAdjustment
            | NodeKind::ClampMin
            | NodeKind::RoundUp
            | NodeKind::MergeChanges => "numeric",
            NodeKind::ColumnsToText
            | NodeKind::GroupedColumnsToText
            | NodeKind::TextSurround
            | NodeKind::AppendText
            | NodeKind::TextJoin => "text",
            NodeKind::SaveChanges => "output",
            NodeKind::CustomSchema | NodeKind::CustomRowsInput | NodeKind::ReadTsvFromPack => "custom",
            NodeKind::DumpToTsv | NodeKind::ColumnCollector => "diagnostic",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
