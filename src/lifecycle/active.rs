use super::launcher::ExecutionHandle;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Executions started or restarted by this process that may still be
/// running. Consulted when draining on shutdown.
#[derive(Debug, Default)]
pub struct ActiveExecutions {
    handles: Mutex<Vec<ExecutionHandle>>,
}

impl ActiveExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExecutionHandle>> {
        // The list stays consistent even if a holder panicked.
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false when the handle was already tracked.
    pub fn track(&self, handle: ExecutionHandle) -> bool {
        let mut handles = self.lock();
        if handles.contains(&handle) {
            return false;
        }
        handles.push(handle);
        true
    }

    pub fn release(&self, target: &str, execution_id: i64) -> bool {
        let mut handles = self.lock();
        let before = handles.len();
        handles.retain(|h| !(h.target == target && h.execution_id == execution_id));
        handles.len() != before
    }

    pub fn snapshot(&self) -> Vec<ExecutionHandle> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
