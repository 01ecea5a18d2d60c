//! Port type vocabulary and the connection compatibility rule.

use crate::NodeKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of data carried over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    PackFiles,
    TableSelection,
    NestedTableSelection,
    IndexedTable,
    ColumnSelection,
    ChangedColumnSelection,
    Text,
    TextLines,
    GroupedText,
    CustomSchema,
}

impl PortType {
    pub const ALL: [PortType; 10] = [
        PortType::PackFiles,
        PortType::TableSelection,
        PortType::NestedTableSelection,
        PortType::IndexedTable,
        PortType::ColumnSelection,
        PortType::ChangedColumnSelection,
        PortType::Text,
        PortType::TextLines,
        PortType::GroupedText,
        PortType::CustomSchema,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PortType::PackFiles => "PackFiles",
            PortType::TableSelection => "TableSelection",
            PortType::NestedTableSelection => "NestedTableSelection",
            PortType::IndexedTable => "IndexedTable",
            PortType::ColumnSelection => "ColumnSelection",
            PortType::ChangedColumnSelection => "ChangedColumnSelection",
            PortType::Text => "Text",
            PortType::TextLines => "TextLines",
            PortType::GroupedText => "GroupedText",
            PortType::CustomSchema => "CustomSchema",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const TEXT_ANY: &[PortType] = &[PortType::Text, PortType::TextLines, PortType::GroupedText];
const TEXT_MULTI: &[PortType] = &[PortType::TextLines, PortType::GroupedText];
const SAVEABLE: &[PortType] = &[
    PortType::ChangedColumnSelection,
    PortType::Text,
    PortType::TableSelection,
];

/// Extra source types a target kind accepts beyond exact equality.
pub fn accepted_union(target_kind: NodeKind) -> &'static [PortType] {
    match target_kind {
        NodeKind::TextSurround | NodeKind::AppendText => TEXT_ANY,
        NodeKind::TextJoin => TEXT_MULTI,
        NodeKind::SaveChanges => SAVEABLE,
        _ => &[],
    }
}

/// Whether an output of `source` may feed an input declared as `target` on a
/// node of `target_kind`.
pub fn validate(source: PortType, target: PortType, target_kind: NodeKind) -> bool {
    source == target || accepted_union(target_kind).contains(&source)
}
