//! Graceful shutdown primitives, adapted from the teacher's
//! `devolutions-gateway-task` crate: a `watch`-channel based shutdown
//! broadcast plus an abort-on-drop task handle, so the listener loop and
//! every per-connection task can be told to wind down without forcefully
//! killing in-flight proxying.

use std::future::Future;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct ShutdownHandle(tokio::sync::watch::Sender<()>);

impl ShutdownHandle {
    pub fn new() -> (Self, ShutdownSignal) {
        let (sender, receiver) = tokio::sync::watch::channel(());
        (Self(sender), ShutdownSignal(receiver))
    }

    pub fn signal(&self) {
        let _ = self.0.send(());
    }

    /// Resolves once every clone of the paired [`ShutdownSignal`] has been
    /// dropped, i.e. every task has observed the shutdown and exited.
    pub async fn all_closed(&self) {
        self.0.closed().await;
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownSignal(tokio::sync::watch::Receiver<()>);

impl ShutdownSignal {
    pub async fn wait(&mut self) {
        let _ = self.0.changed().await;
    }
}

/// Aborts the wrapped task when dropped, so a crashed parent never leaves
/// orphaned connection tasks running.
#[must_use]
pub struct ChildTask<T>(JoinHandle<T>);

impl<T> ChildTask<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        ChildTask(tokio::task::spawn(future))
    }

    pub async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }

    pub fn abort(&self) {
        self.0.abort()
    }

    /// Drop without aborting the task, letting it run to completion detached.
    pub fn detach(self) {
        core::mem::forget(self);
    }
}

impl<T> From<JoinHandle<T>> for ChildTask<T> {
    fn from(value: JoinHandle<T>) -> Self {
        Self(value)
    }
}

impl<T> Drop for ChildTask<T> {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_wakes_waiters() {
        let (handle, mut signal) = ShutdownHandle::new();
        let waiter = tokio::spawn(async move {
            signal.wait().await;
        });
        handle.signal();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn abort_cancels_the_task() {
        let task = ChildTask::spawn(async move {
            std::future::pending::<()>().await;
        });
        task.abort();
        let result = task.join().await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
