//! Shared shutdown coordination between the application and the accept loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Cloneable shutdown flag that can also be awaited.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    shutdown_initiated: Arc<AtomicBool>,
    notify: Arc<watch::Sender<bool>>,
}

impl ShutdownState {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(notify),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Initiates shutdown. Calling it again has no further effect.
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new connections will be accepted");
        }
        self.notify.send_replace(true);
    }

    /// Resolves once shutdown has been initiated, immediately if it already was.
    pub async fn wait(&self) {
        let mut initiated = self.notify.subscribe();
        // The sender lives in `self`, so this only ends once the flag is set.
        let _ = initiated.wait_for(|set| *set).await;
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waiters_wake_on_shutdown() {
        let state = ShutdownState::new();
        let waiter = tokio::spawn({
            let state = state.clone();
            async move { state.wait().await }
        });

        assert!(!state.is_shutdown_initiated());
        state.initiate_shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(state.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn late_waiters_return_immediately() {
        let state = ShutdownState::new();
        state.initiate_shutdown();
        state.initiate_shutdown();

        tokio::time::timeout(Duration::from_millis(100), state.wait()).await.unwrap();
    }
}
