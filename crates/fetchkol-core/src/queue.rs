//! Work queue transport.
//!
//! Each accepted request becomes exactly one work item, serialized as a
//! UTF-8 JSON object `{task_id, platform, action, params}`. The broker is an
//! external collaborator; the engine only depends on the [`WorkQueue`]
//! publish trait and a consumer end. The in-process implementation is a
//! bounded channel used by the single-binary deployment and by tests.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::QueueError;
use crate::task::{Action, Platform};

/// One unit of work handed from the coordinator to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Task id of the row this item drives.
    pub task_id: String,
    /// Target platform.
    pub platform: Platform,
    /// Requested action.
    pub action: Action,
    /// Action-specific parameters, opaque to the transport.
    pub params: serde_json::Value,
}

impl WorkItem {
    /// Encode as UTF-8 JSON bytes for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|source| QueueError::Codec { source })
    }

    /// Decode from UTF-8 JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(bytes).map_err(|source| QueueError::Codec { source })
    }
}

/// Publisher half of the work queue.
#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish one work item. Returns an error only when the transport is
    /// unusable; delivery is at-least-once.
    async fn publish(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Whether the transport can currently accept items.
    fn healthy(&self) -> bool {
        true
    }
}

/// In-process bounded queue.
pub struct MemoryWorkQueue {
    tx: mpsc::Sender<WorkItem>,
}

/// Consumer half of the in-process queue.
pub struct MemoryWorkSource {
    rx: mpsc::Receiver<WorkItem>,
}

impl MemoryWorkSource {
    /// Receive the next work item, or `None` once all publishers are gone.
    pub async fn next(&mut self) -> Option<WorkItem> {
        self.rx.recv().await
    }
}

/// Build a connected in-process queue pair.
pub fn memory_queue(capacity: usize) -> (MemoryWorkQueue, MemoryWorkSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MemoryWorkQueue { tx }, MemoryWorkSource { rx })
}

#[async_trait::async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn publish(&self, item: WorkItem) -> Result<(), QueueError> {
        self.tx.send(item).await.map_err(|_| QueueError::Closed)
    }

    fn healthy(&self) -> bool {
        !self.tx.is_closed()
    }
}
