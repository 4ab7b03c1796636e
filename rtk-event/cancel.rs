use std::{
  borrow::Borrow,
  future::Future,
  sync::{
    Arc,
    atomic::{
      AtomicBool,
      Ordering,
    },
  },
};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelState {
  canceled: AtomicBool,
  notify:   Notify,
}

/// A cancellation flag shared between the code that issued a task and the
/// task itself.
///
/// Cancelling never interrupts running work. The task (or whoever receives
/// its result) observes the flag and drops the result instead.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
  state: Arc<CancelState>,
}

impl TaskHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    if !self.state.canceled.swap(true, Ordering::AcqRel) {
      self.state.notify.notify_waiters();
    }
  }

  pub fn is_canceled(&self) -> bool {
    self.state.canceled.load(Ordering::Acquire)
  }

  /// Resolves once [`TaskHandle::cancel`] has been called.
  pub async fn canceled(&self) {
    let notified = self.state.notify.notified();
    let mut notified = std::pin::pin!(notified);
    notified.as_mut().enable();
    if self.is_canceled() {
      return;
    }
    notified.await;
  }
}

/// Runs `future` until it completes or `handle` is cancelled.
pub async fn cancelable_future<T>(
  future: impl Future<Output = T>,
  handle: impl Borrow<TaskHandle>,
) -> Option<T> {
  let handle = handle.borrow();
  if handle.is_canceled() {
    return None;
  }
  tokio::select! {
    biased;
    _ = handle.canceled() => None,
    res = future => Some(res),
  }
}
