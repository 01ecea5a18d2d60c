use chrono::{DateTime, Utc};
use packcore::kind::{ELSE_HANDLE, MATCH_HANDLE};
use packcore::{Connection, ExecutionId, NodeKind, NodeOutput, Payload};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Result of one node in a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub kind: NodeKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub else_data: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_outputs: Option<BTreeMap<String, Payload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Position of the node in execution order, starting at 0.
    pub sequence: usize,
    pub duration_ms: u64,
}

impl NodeReport {
    pub fn succeeded(kind: NodeKind, output: NodeOutput, sequence: usize, duration_ms: u64) -> Self {
        Self {
            kind,
            success: true,
            data: output.primary,
            else_data: output.else_branch,
            multi_outputs: (!output.outputs.is_empty()).then_some(output.outputs),
            error: None,
            metadata: output.metadata.custom,
            sequence,
            duration_ms,
        }
    }

    pub fn failed(kind: NodeKind, error: String, sequence: usize, duration_ms: u64) -> Self {
        Self {
            kind,
            success: false,
            data: None,
            else_data: None,
            multi_outputs: None,
            error: Some(error),
            metadata: BTreeMap::new(),
            sequence,
            duration_ms,
        }
    }

    /// Payload this node hands to `conn`: the primary without a handle, the
    /// else-branch for `else`, or the named output. Failed nodes and handles
    /// this kind does not expose hand over nothing.
    pub fn payload_for(&self, conn: &Connection) -> Option<&Payload> {
        if !self.success {
            return None;
        }
        match conn.source_handle.as_deref() {
            None => self.data.as_ref(),
            Some(handle) if !self.kind.source_handles().contains(&handle) => None,
            Some(ELSE_HANDLE) => self.else_data.as_ref(),
            Some(MATCH_HANDLE) => self.data.as_ref(),
            Some(handle) => self.multi_outputs.as_ref()?.get(handle),
        }
    }
}

/// Outcome of one graph run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub success: bool,
    pub total_executed: usize,
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub per_node: BTreeMap<String, NodeReport>,
    /// Nodes whose dependencies never all succeeded.
    pub skipped: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            success: false,
            total_executed: 0,
            success_count: 0,
            failure_count: 0,
            error: None,
            per_node: BTreeMap::new(),
            skipped: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Recomputes the counters from `per_node`.
    pub fn finalize(&mut self) {
        self.total_executed = self.per_node.len();
        self.success_count = self.per_node.values().filter(|r| r.success).count();
        self.failure_count = self.total_executed - self.success_count;
        self.success = self.success_count > 0;
    }

    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.per_node.get(id)
    }

    /// Human-readable per-node summary in execution order.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let mut nodes: Vec<_> = self.per_node.iter().collect();
        nodes.sort_by_key(|(_, r)| r.sequence);
        for (id, report) in nodes {
            match &report.error {
                None => {
                    let _ = writeln!(out, "  ok      {} ({})", id, report.kind);
                }
                Some(err) => {
                    let _ = writeln!(out, "  failed  {} ({}): {}", id, report.kind, err);
                }
            }
        }
        for id in &self.skipped {
            let _ = writeln!(out, "  skipped {}", id);
        }
        if let Some(err) = &self.error {
            let _ = writeln!(out, "  error: {}", err);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packcore::payload::TableSelection;
    use packcore::TableData;

    fn tables(name: &str) -> Payload {
        Payload::TableSelection(TableSelection::new(vec![TableData::new(name, vec![])], vec![]))
    }

    fn conn(handle: Option<&str>) -> Connection {
        let mut conn = Connection::new("c1", "gen", "next");
        conn.source_handle = handle.map(str::to_string);
        conn
    }

    #[test]
    fn unexposed_handles_yield_nothing() {
        let output = NodeOutput::with_primary(tables("union")).with_output("output0", tables("first"));
        let report = NodeReport::succeeded(NodeKind::GenerateRows, output, 0, 1);

        assert!(report.payload_for(&conn(None)).is_some());
        assert!(report.payload_for(&conn(Some("output0"))).is_some());
        assert!(report.payload_for(&conn(Some("output3"))).is_none());
        assert!(report.payload_for(&conn(Some("else"))).is_none());
    }
}
