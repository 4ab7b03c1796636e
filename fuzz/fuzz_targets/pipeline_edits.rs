#![no_main]

mod common;

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use ropey::Rope;
use rtk_event::{
  ManualExecutor,
  ManualScheduler,
  run_until_idle,
};
use rtk_syntax::{
  Pipeline,
  SharedText,
  StyleMap,
  buffer::Run,
};

use crate::common::{
  FuzzSession,
  apply_edit,
  session_from_bytes,
};

struct Host {
  text:      Arc<SharedText>,
  pipeline:  Pipeline,
  scheduler: ManualScheduler,
  executor:  ManualExecutor,
}

impl Host {
  fn new(session: &FuzzSession, source: &str) -> Self {
    let text = Arc::new(SharedText::new(source));
    let scheduler = ManualScheduler::new();
    let executor = ManualExecutor::new();
    let pipeline = Pipeline::new(
      text.clone(),
      session.loader.clone(),
      StyleMap::default(),
      Arc::new(scheduler.clone()),
      Arc::new(executor.clone()),
      session.options.clone(),
    )
    .expect("initial parse failed");
    Self {
      text,
      pipeline,
      scheduler,
      executor,
    }
  }

  fn settle(&self) {
    run_until_idle(&self.scheduler, &self.executor);
  }

  fn runs(&self) -> Vec<Run> {
    self.text.snapshot().runs().to_vec()
  }
}

fuzz_target!(|data: &[u8]| {
  let session = session_from_bytes(data);
  let mut host = Host::new(&session, &session.initial);
  let mut text = Rope::from_str(&session.initial);

  for op in &session.ops {
    let (edit, replacement) = apply_edit(&mut text, op);
    host
      .pipeline
      .will_change(edit.range.clone())
      .expect("willChange rejected");
    let change = host.text.replace(edit.range.clone(), &replacement);
    host.pipeline.did_change(&change).expect("didChange rejected");
    if op.settle {
      host.settle();
    }
    // styling never touches the characters
    assert_eq!(host.text.snapshot().text(), &text);
  }

  host.settle();
  let fresh = Host::new(&session, &text.to_string());
  fresh.settle();
  assert_eq!(host.runs(), fresh.runs());
});
