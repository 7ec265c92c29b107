//! Long-lived subscription handles.
//!
//! A [`Feed`] owns the background task that consumes a remote watch and
//! publishes the derived state through a `tokio::sync::watch` channel.
//! Dropping the feed aborts the task, which drops the remote watch with it.

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Feed<T> {
    rx: watch::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T: Clone> Feed<T> {
    pub(crate) fn new(rx: watch::Receiver<T>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Latest published state.
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next state. `None` once the feed has stopped.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the state satisfies `predicate`, checking the current
    /// state first.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&T) -> bool) -> Option<T> {
        self.rx.wait_for(predicate).await.ok().map(|state| state.clone())
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the feed and wait until its remote watch has been released.
    pub async fn close(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
