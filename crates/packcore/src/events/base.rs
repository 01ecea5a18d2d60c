use crate::NodeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle of one graph run as seen by subscribers. Serialized with a
/// `type` tag for the event socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: ExecutionId,
        node_count: usize,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        execution_id: ExecutionId,
        success: bool,
        success_count: usize,
        failure_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Structural failure; no node ran.
    RunAborted {
        execution_id: ExecutionId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node_id: String,
        kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: String,
        kind: NodeKind,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node_id: String,
        kind: NodeKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        execution_id: ExecutionId,
        node_id: String,
        kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    /// Free-form message raised by an executor while it runs.
    NodeNotice {
        execution_id: ExecutionId,
        node_id: String,
        level: NoticeLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// Handle given to one executor; tags every notice with its run and node.
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    node_id: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        // No subscribers is fine.
        let _ = self.sender.send(ExecutionEvent::NodeNotice {
            execution_id: self.execution_id,
            node_id: self.node_id.clone(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notice(NoticeLevel::Info, message);
    }

    /// Non-fatal problems: skipped archives, missing tables.
    pub fn warn(&self, message: impl Into<String>) {
        self.notice(NoticeLevel::Warning, message);
    }
}

pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// losing events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, node_id: &str) -> EventEmitter {
        EventEmitter {
            execution_id,
            node_id: node_id.to_string(),
            sender: self.sender.clone(),
        }
    }
}
