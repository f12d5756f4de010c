//! Shared application state for the fetchkol server.

use std::sync::Arc;

use fetchkol_core::coordinator::Coordinator;
use fetchkol_core::queue::WorkQueue;
use fetchkol_core::storage::DbPool;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// Task coordinator: validation, insert, enqueue, status reads.
    pub coordinator: Coordinator,
    /// Task log pool, used directly by the health check.
    pub db: DbPool,
    /// Work queue handle, used by the health check.
    pub queue: Arc<dyn WorkQueue>,
}
