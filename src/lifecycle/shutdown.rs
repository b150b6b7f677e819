//! Shutdown coordination for the router.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Long-running tasks (subscriber, pruner, listeners) each hold a receiver
/// and exit when the signal fires.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Tasks still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for background tasks to finish, up to `deadline` in total.
/// Returns the names of tasks that were still running and got aborted.
pub async fn drain_tasks(tasks: Vec<(&'static str, JoinHandle<()>)>, deadline: Duration) -> Vec<&'static str> {
    let until = tokio::time::Instant::now() + deadline;
    let mut aborted = Vec::new();
    for (name, mut handle) in tasks {
        match tokio::time::timeout_at(until, &mut handle).await {
            Ok(Ok(())) => tracing::debug!(task = name, "Task stopped"),
            Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task failed"),
            Err(_) => {
                tracing::warn!(task = name, "Task did not stop before deadline, aborting");
                handle.abort();
                aborted.push(name);
            }
        }
    }
    aborted
}
