//! Application state.

use encodeq_scheduler::DispatchHandle;
use encodeq_store::JobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    /// Wakes idle workers after an enqueue. `None` when no dispatcher runs in
    /// this process.
    pub dispatch: Option<DispatchHandle>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            dispatch: None,
        }
    }

    pub fn with_dispatch(mut self, handle: DispatchHandle) -> Self {
        self.dispatch = Some(handle);
        self
    }
}
