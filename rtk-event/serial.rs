use futures_util::future::BoxFuture;
use tokio::{
  runtime::Handle,
  sync::mpsc::{
    self,
    UnboundedSender,
  },
};

use crate::{
  Executor,
  Job,
  Scheduler,
};

/// A serial context backed by a tokio task draining a channel.
///
/// Jobs run one after another in submission order on the runtime the queue
/// was created in.
#[derive(Clone)]
pub struct SerialQueue {
  tx: UnboundedSender<Job>,
}

impl SerialQueue {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    // only spawn worker if we are inside runtime to avoid having to spawn a runtime
    // for unrelated unit tests
    if Handle::try_current().is_ok() {
      tokio::spawn(run(rx));
    }
    Self { tx }
  }
}

impl Default for SerialQueue {
  fn default() -> Self {
    Self::new()
  }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Job>) {
  while let Some(job) = rx.recv().await {
    job();
  }
}

impl Scheduler for SerialQueue {
  fn schedule(&self, job: Job) {
    if self.tx.send(job).is_err() {
      log::warn!("Attempted to schedule job on closed serial queue");
    }
  }
}

/// Spawns futures on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
  handle: Handle,
}

impl TokioExecutor {
  pub fn new(handle: Handle) -> Self {
    Self { handle }
  }

  /// The executor for the runtime the caller is running in, if any.
  pub fn current() -> Option<Self> {
    Handle::try_current().ok().map(Self::new)
  }
}

impl Executor for TokioExecutor {
  fn spawn(&self, future: BoxFuture<'static, ()>) {
    self.handle.spawn(future);
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;
  use tokio::sync::oneshot;

  use super::*;

  #[tokio::test]
  async fn serial_queue_preserves_order() {
    let queue = SerialQueue::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
      let seen = seen.clone();
      queue.schedule(Box::new(move || seen.lock().push(i)));
    }
    let (tx, rx) = oneshot::channel();
    queue.schedule(Box::new(move || {
      let _ = tx.send(());
    }));
    rx.await.ok();
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
  }

  #[tokio::test]
  async fn tokio_executor_runs_futures() {
    let executor = TokioExecutor::current().expect("inside runtime");
    let (tx, rx) = oneshot::channel();
    executor.spawn(Box::pin(async move {
      let _ = tx.send(7);
    }));
    assert_eq!(rx.await.ok(), Some(7));
  }
}
