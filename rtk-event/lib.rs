//! Host scheduling primitives for the highlighting pipeline.
//!
//! The pipeline mutates buffer attributes only from a single serial context
//! and resolves tokens on worker contexts. Hosts plug their own run loops in
//! through [`Scheduler`] and [`Executor`]; this crate ships a deterministic
//! manual pair for tests and tools, and a tokio backed pair for real hosts.

mod cancel;
mod schedule;
mod serial;

pub use cancel::{
  TaskHandle,
  cancelable_future,
};
pub use schedule::{
  Executor,
  InlineExecutor,
  Job,
  ManualExecutor,
  ManualScheduler,
  Scheduler,
  run_until_idle,
};
pub use serial::{
  SerialQueue,
  TokioExecutor,
};
