//! State shared between the subscription and anything else that inspects
//! what was last written to the clipboard

use std::sync::Arc;

use tokio::sync::Mutex;

/// Last clipboard body accepted from the relay
///
/// Cloning yields another handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    last_applied: Arc<Mutex<String>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the last applied body
    pub async fn last_applied(&self) -> String {
        self.last_applied.lock().await.clone()
    }

    /// Replace the last applied body with `candidate` if `admit` approves
    ///
    /// `admit` sees the current body and runs under the lock, so two callers
    /// racing with the same candidate cannot both succeed.
    pub async fn replace_if<F>(&self, candidate: &str, admit: F) -> bool
    where
        F: FnOnce(&str) -> bool,
    {
        let mut last = self.last_applied.lock().await;
        if admit(last.as_str()) {
            *last = candidate.to_owned();
            true
        } else {
            false
        }
    }
}
