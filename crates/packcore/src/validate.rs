//! Whole-graph validation: port compatibility of every connection plus the
//! structural rules a runnable graph must satisfy.

use crate::kind::{InputPort, OutputRule};
use crate::{port, Connection, Graph, NodeSpec, PortType, ValidationError};
use std::collections::{HashMap, HashSet};

/// Output port type of `node` given the type arriving on its input.
pub fn output_type(node: &NodeSpec, input: Option<PortType>) -> Option<PortType> {
    match node.kind.output() {
        OutputRule::Fixed(t) => Some(t),
        OutputRule::PassThrough => input,
        OutputRule::JoinResult => match node.config_str("joinType") {
            Some("nested") => Some(PortType::NestedTableSelection),
            _ => Some(PortType::TableSelection),
        },
        OutputRule::None => None,
    }
}

/// Output type of every node, following pass-through kinds upstream.
/// Unknown when a pass-through node has no resolvable input.
pub fn infer_output_types(graph: &Graph) -> HashMap<String, Option<PortType>> {
    let incoming = graph.incoming();
    let mut memo = HashMap::new();
    for node in &graph.nodes {
        let mut visiting = HashSet::new();
        infer(graph, &incoming, node, &mut memo, &mut visiting);
    }
    memo
}

fn infer(
    graph: &Graph,
    incoming: &HashMap<&str, Vec<&Connection>>,
    node: &NodeSpec,
    memo: &mut HashMap<String, Option<PortType>>,
    visiting: &mut HashSet<String>,
) -> Option<PortType> {
    if let Some(known) = memo.get(&node.id) {
        return *known;
    }
    if !visiting.insert(node.id.clone()) {
        return None;
    }
    let input = if node.kind.output() == OutputRule::PassThrough {
        incoming
            .get(node.id.as_str())
            .and_then(|conns| conns.first())
            .and_then(|conn| graph.find_node(&conn.source_id))
            .and_then(|source| infer(graph, incoming, source, memo, visiting))
    } else {
        None
    };
    let result = output_type(node, input);
    memo.insert(node.id.clone(), result);
    result
}

/// Input ports of `target` a connection may land on.
fn candidate_ports(target: &NodeSpec, conn: &Connection) -> Result<Vec<InputPort>, ValidationError> {
    let ports = target.kind.inputs();
    if ports.is_empty() {
        return Err(ValidationError::NoInput {
            connection: conn.id.clone(),
            kind: target.kind,
        });
    }
    let named = ports.iter().any(|p| p.handle.is_some());
    match (&conn.target_handle, named) {
        // Single default port: any handle label lands on it.
        (_, false) => Ok(ports.to_vec()),
        (None, true) => Ok(ports.to_vec()),
        (Some(handle), true) => {
            let matching: Vec<InputPort> = ports
                .iter()
                .filter(|p| p.handle == Some(handle.as_str()))
                .copied()
                .collect();
            if matching.is_empty() {
                Err(ValidationError::UnknownHandle {
                    connection: conn.id.clone(),
                    kind: target.kind,
                    handle: handle.clone(),
                })
            } else {
                Ok(matching)
            }
        }
    }
}

/// Checks one connection against the port declarations of its endpoints.
pub fn validate_connection(
    graph: &Graph,
    conn: &Connection,
    output_types: &HashMap<String, Option<PortType>>,
) -> Result<(), ValidationError> {
    let source = graph
        .find_node(&conn.source_id)
        .ok_or_else(|| ValidationError::UnknownNode {
            connection: conn.id.clone(),
            node: conn.source_id.clone(),
        })?;
    let target = graph
        .find_node(&conn.target_id)
        .ok_or_else(|| ValidationError::UnknownNode {
            connection: conn.id.clone(),
            node: conn.target_id.clone(),
        })?;

    let ports = candidate_ports(target, conn)?;

    if source.kind.output() == OutputRule::None {
        return Err(ValidationError::NoOutput {
            connection: conn.id.clone(),
            node: source.id.clone(),
            kind: source.kind,
        });
    }
    if let Some(handle) = &conn.source_handle {
        if !source.kind.source_handles().contains(&handle.as_str()) {
            return Err(ValidationError::UnknownSourceHandle {
                connection: conn.id.clone(),
                kind: source.kind,
                handle: handle.clone(),
            });
        }
    }
    let Some(source_type) = output_types.get(&source.id).copied().flatten() else {
        // Unresolved pass-through; the executor reports the mismatch.
        return Ok(());
    };

    let compatible = ports
        .iter()
        .flat_map(|p| p.accepts.iter())
        .any(|&accepted| port::validate(source_type, accepted, target.kind));
    if compatible {
        Ok(())
    } else {
        let mut expected: Vec<String> = ports
            .iter()
            .flat_map(|p| p.accepts.iter())
            .chain(port::accepted_union(target.kind))
            .map(ToString::to_string)
            .collect();
        expected.dedup();
        Err(ValidationError::IncompatiblePorts {
            connection: conn.id.clone(),
            source_type,
            target_kind: target.kind,
            expected: expected.join(" | "),
        })
    }
}

/// Validates every node and connection, collecting all problems.
pub fn validate_graph(graph: &Graph) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNode(node.id.clone()));
        }
    }

    let output_types = infer_output_types(graph);
    for conn in &graph.connections {
        if let Err(e) = validate_connection(graph, conn, &output_types) {
            errors.push(e);
        }
    }

    let incoming = graph.incoming();
    for node in &graph.nodes {
        let count = incoming.get(node.id.as_str()).map_or(0, Vec::len);
        let limit = if node.kind.accepts_multiple_inputs() {
            if node.kind.inputs().iter().any(|p| p.handle.is_some()) {
                node.kind.inputs().len()
            } else {
                usize::MAX
            }
        } else {
            1
        };
        if count > limit {
            errors.push(ValidationError::TooManyInputs {
                node: node.id.clone(),
                kind: node.kind,
                count,
            });
        }

        // Each named input port takes exactly one connection.
        let conns = incoming.get(node.id.as_str()).map_or(&[][..], Vec::as_slice);
        for port in node.kind.inputs() {
            let Some(handle) = port.handle else {
                continue;
            };
            let count = conns
                .iter()
                .filter(|c| c.target_handle.as_deref() == Some(handle))
                .count();
            if count > 1 {
                errors.push(ValidationError::DuplicateHandle {
                    node: node.id.clone(),
                    kind: node.kind,
                    handle: handle.to_string(),
                    count,
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
