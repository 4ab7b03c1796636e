use std::{
  collections::VecDeque,
  sync::Arc,
  task::{
    Context,
    Poll,
  },
};

use futures_util::{
  future::BoxFuture,
  task::noop_waker_ref,
};
use parking_lot::Mutex;

/// A unit of work for the serial context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The host's serial, buffer-mutation-safe context.
///
/// Jobs must run one at a time, in submission order, and never re-entrantly
/// from inside `schedule`.
pub trait Scheduler: Send + Sync {
  fn schedule(&self, job: Job);
}

/// Worker contexts for token resolution.
pub trait Executor: Send + Sync {
  fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// A scheduler that only runs jobs when asked to.
#[derive(Clone, Default)]
pub struct ManualScheduler {
  queue: Arc<Mutex<VecDeque<Job>>>,
}

impl ManualScheduler {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pending(&self) -> usize {
    self.queue.lock().len()
  }

  /// Runs queued jobs, including ones scheduled by those jobs, until the
  /// queue is empty. Returns how many ran.
  pub fn run_until_idle(&self) -> usize {
    let mut ran = 0;
    loop {
      // the lock must not be held while the job runs, jobs schedule more jobs
      let Some(job) = self.queue.lock().pop_front() else {
        break;
      };
      job();
      ran += 1;
    }
    ran
  }
}

impl Scheduler for ManualScheduler {
  fn schedule(&self, job: Job) {
    self.queue.lock().push_back(job);
  }
}

/// An executor that polls spawned futures only when asked to.
#[derive(Clone, Default)]
pub struct ManualExecutor {
  tasks: Arc<Mutex<VecDeque<BoxFuture<'static, ()>>>>,
}

impl ManualExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pending(&self) -> usize {
    self.tasks.lock().len()
  }

  /// Polls every task until a whole pass completes nothing. Returns the
  /// number of tasks that finished.
  pub fn run_until_stalled(&self) -> usize {
    let mut cx = Context::from_waker(noop_waker_ref());
    let mut finished = 0;
    loop {
      let batch: Vec<_> = self.tasks.lock().drain(..).collect();
      if batch.is_empty() {
        break;
      }
      let mut progressed = false;
      let mut stalled = Vec::new();
      for mut task in batch {
        match task.as_mut().poll(&mut cx) {
          Poll::Ready(()) => {
            finished += 1;
            progressed = true;
          },
          Poll::Pending => stalled.push(task),
        }
      }
      let mut tasks = self.tasks.lock();
      for task in stalled.into_iter().rev() {
        tasks.push_front(task);
      }
      if !progressed {
        break;
      }
    }
    finished
  }
}

impl Executor for ManualExecutor {
  fn spawn(&self, future: BoxFuture<'static, ()>) {
    self.tasks.lock().push_back(future);
  }
}

/// Drives a manual scheduler and executor pair until neither has work left.
pub fn run_until_idle(scheduler: &ManualScheduler, executor: &ManualExecutor) -> usize {
  let mut total = 0;
  loop {
    let ran = scheduler.run_until_idle() + executor.run_until_stalled();
    if ran == 0 {
      break;
    }
    total += ran;
  }
  total
}

/// Runs spawned futures to completion on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
  fn spawn(&self, future: BoxFuture<'static, ()>) {
    futures_executor::block_on(future);
  }
}
