//! Per-kind fan-in: computes one logical input from a node's incoming
//! connections and the results of their source nodes.

use crate::report::NodeReport;
use packcore::kind::{INDEX_HANDLE, SOURCE_HANDLE};
use packcore::payload::TableSelection;
use packcore::{Connection, FanIn, NodeInput, NodeSpec, Payload};
use std::collections::BTreeMap;

/// Aggregated input of `target`. `incoming` must be in connection order.
pub fn aggregate_input(
    target: &NodeSpec,
    incoming: &[&Connection],
    results: &BTreeMap<String, NodeReport>,
) -> NodeInput {
    let resolved = |conn: &Connection| -> Option<Payload> {
        results
            .get(&conn.source_id)
            .and_then(|r| r.payload_for(conn))
            .cloned()
    };

    match target.kind.fan_in() {
        FanIn::Merge => NodeInput::Many(incoming.iter().filter_map(|c| resolved(c)).collect()),
        FanIn::Save => {
            let payloads: Vec<Payload> = incoming.iter().filter_map(|c| resolved(c)).collect();
            merge_for_save(&payloads).map_or(NodeInput::None, NodeInput::Single)
        }
        FanIn::Join => {
            let mut source = None;
            let mut index = None;
            let mut unlabeled = Vec::new();
            for conn in incoming {
                match conn.target_handle.as_deref() {
                    Some(SOURCE_HANDLE) => source = resolved(conn),
                    Some(INDEX_HANDLE) => index = resolved(conn),
                    _ => unlabeled.push(*conn),
                }
            }
            for conn in unlabeled {
                if source.is_none() {
                    source = resolved(conn);
                } else if index.is_none() {
                    index = resolved(conn);
                }
            }
            NodeInput::Pair { source, index }
        }
        FanIn::RowGeneration if incoming.len() > 1 => {
            let payloads: Vec<Payload> = incoming.iter().filter_map(|c| resolved(c)).collect();
            let tables: Vec<&TableSelection> = payloads.iter().filter_map(Payload::as_tables).collect();
            if tables.is_empty() {
                NodeInput::None
            } else {
                NodeInput::Single(Payload::TableSelection(TableSelection::merge_all(tables)))
            }
        }
        FanIn::RowGeneration | FanIn::Single => {
            // Most recently executed source wins.
            incoming
                .iter()
                .filter_map(|conn| {
                    let report = results.get(&conn.source_id)?;
                    Some((report.sequence, report.payload_for(conn)?))
                })
                .max_by_key(|(sequence, _)| *sequence)
                .map_or(NodeInput::None, |(_, payload)| NodeInput::Single(payload.clone()))
        }
    }
}

/// Priority merge used by save nodes: first text, else first changed-column
/// selection, else the union of every table selection.
pub fn merge_for_save(payloads: &[Payload]) -> Option<Payload> {
    if let Some(text) = payloads.iter().find(|p| matches!(p, Payload::Text(_))) {
        return Some(text.clone());
    }
    if let Some(changes) = payloads
        .iter()
        .find(|p| matches!(p, Payload::ChangedColumnSelection(_)))
    {
        return Some(changes.clone());
    }
    let tables: Vec<&TableSelection> = payloads.iter().filter_map(Payload::as_tables).collect();
    if tables.is_empty() {
        None
    } else {
        Some(Payload::TableSelection(TableSelection::merge_all(tables)))
    }
}
