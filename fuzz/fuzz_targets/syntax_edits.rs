#![no_main]

mod common;

use libfuzzer_sys::fuzz_target;
use ropey::Rope;

use crate::common::{
  apply_edit,
  session_from_bytes,
  short_timeout,
};

fuzz_target!(|data: &[u8]| {
  let session = session_from_bytes(data);
  let mut text = Rope::from_str(&session.initial);
  let mut incremental = session.tree(&session.initial);
  if incremental.parse().is_err() {
    return;
  }
  // a second tree that keeps running out of time
  let mut starved = session.tree(&session.initial);
  let _ = starved.parse();

  for (index, op) in session.ops.iter().enumerate() {
    let (edit, replacement) = apply_edit(&mut text, op);
    let stale = incremental
      .apply_edit(&edit, &replacement)
      .expect("incremental parse failed");
    assert!(stale.ranges().iter().all(|range| range.end <= text.len_chars()));

    starved.set_timeout(short_timeout(session.seed, index));
    let _ = starved.apply_edit(&edit, &replacement);
    assert_eq!(starved.text(), &text);

    let source = text.to_string();
    let mut fresh = session.tree(&source);
    fresh.parse().expect("fresh parse failed");
    let len = text.len_chars();
    assert_eq!(incremental.highlights(0..len), fresh.highlights(0..len));
    assert_eq!(incremental.layers(), fresh.layers());
  }
});
