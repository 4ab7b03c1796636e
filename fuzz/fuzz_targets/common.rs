use std::{
  sync::Arc,
  time::Duration,
};

use ropey::Rope;
use rtk_syntax::{
  EditRecord,
  SyntaxTree,
  syntax::{
    ParseOptions,
    code::CodeGrammar,
    grammar::Loader,
  },
};

const MAX_INITIAL_BYTES: usize = 8 * 1024;
const MAX_OPS: usize = 128;
const MAX_INSERT_BYTES: usize = 256;

#[derive(Debug, Clone)]
pub struct EditOp {
  pub anchor: u16,
  pub delete: u16,
  pub insert: Vec<u8>,
  /// Whether the host gets a turn of its run loop after this edit.
  pub settle: bool,
}

struct Scenario {
  seed:    u64,
  flags:   u8,
  initial: Vec<u8>,
  ops:     Vec<EditOp>,
}

pub struct FuzzSession {
  pub seed:    u64,
  pub loader:  Arc<Loader>,
  pub options: ParseOptions,
  pub initial: String,
  pub ops:     Vec<EditOp>,
}

impl FuzzSession {
  pub fn tree(&self, text: &str) -> SyntaxTree {
    SyntaxTree::new(
      Rope::from_str(text),
      self.loader.clone(),
      self.options.clone(),
    )
  }
}

pub fn session_from_bytes(data: &[u8]) -> FuzzSession {
  let mut scenario = decode_scenario(data);
  if scenario.ops.is_empty() {
    scenario.ops.push(EditOp {
      anchor: 0,
      delete: 0,
      insert: vec![b'*'],
      settle: true,
    });
  }

  let mut loader = Loader::markdown();
  if scenario.flags & 1 != 0 {
    loader.register_code(
      "rust",
      CodeGrammar::new(["fn", "let", "match"], Some("//"), ['"', '\'']),
    );
    loader.alias("rs", "rust");
  }
  let options = ParseOptions {
    timeout: Duration::from_secs(5),
    injections: scenario.flags & 2 == 0,
    max_injection_depth: 1 + (scenario.flags as usize >> 2) % 4,
  };

  FuzzSession {
    seed: scenario.seed,
    loader: Arc::new(loader),
    options,
    initial: lossy_text(&scenario.initial),
    ops: scenario.ops,
  }
}

/// Applies `op` to `text` and returns the edit with its replacement.
pub fn apply_edit(text: &mut Rope, op: &EditOp) -> (EditRecord, String) {
  let len_chars = text.len_chars();
  let from = if len_chars == 0 {
    0
  } else {
    (op.anchor as usize) % (len_chars + 1)
  };
  let max_delete = len_chars - from;
  let delete = if max_delete == 0 {
    0
  } else {
    (op.delete as usize) % (max_delete + 1)
  };
  let to = from + delete;
  let replacement = lossy_text(&op.insert);

  text.remove(from..to);
  text.insert(from, &replacement);
  let delta = replacement.chars().count() as isize - delete as isize;
  (EditRecord::new(from..to, delta), replacement)
}

pub fn short_timeout(seed: u64, index: usize) -> Duration {
  let jitter = seed.wrapping_add(index as u64) % 7;
  Duration::from_micros(jitter * 50)
}

fn lossy_text(bytes: &[u8]) -> String {
  String::from_utf8_lossy(bytes).into_owned()
}

fn decode_scenario(data: &[u8]) -> Scenario {
  let mut cursor = ByteCursor::new(data);
  let seed = cursor.next_u64();
  let flags = cursor.next_u8();
  let initial_len = cursor.next_usize(MAX_INITIAL_BYTES);
  let initial = cursor.next_bytes(initial_len).to_vec();
  let op_count = cursor.next_usize(MAX_OPS);
  let mut ops = Vec::with_capacity(op_count);
  for _ in 0..op_count {
    let anchor = cursor.next_u16();
    let delete = cursor.next_u16();
    let insert_len = cursor.next_usize(MAX_INSERT_BYTES);
    let insert = cursor.next_bytes(insert_len).to_vec();
    let settle = cursor.next_u8() & 1 == 0;
    ops.push(EditOp {
      anchor,
      delete,
      insert,
      settle,
    });
  }

  Scenario {
    seed,
    flags,
    initial,
    ops,
  }
}

struct ByteCursor<'a> {
  data: &'a [u8],
  pos:  usize,
}

impl<'a> ByteCursor<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self { data, pos: 0 }
  }

  fn next_u8(&mut self) -> u8 {
    let value = self.data.get(self.pos).copied().unwrap_or(0);
    self.pos = self.pos.saturating_add(1);
    value
  }

  fn next_u16(&mut self) -> u16 {
    let lo = self.next_u8() as u16;
    let hi = self.next_u8() as u16;
    lo | (hi << 8)
  }

  fn next_u64(&mut self) -> u64 {
    let mut value = 0u64;
    for shift in (0..64).step_by(8) {
      value |= (self.next_u8() as u64) << shift;
    }
    value
  }

  fn next_usize(&mut self, max: usize) -> usize {
    if max == 0 {
      return 0;
    }
    (self.next_u16() as usize) % (max + 1)
  }

  fn next_bytes(&mut self, len: usize) -> &'a [u8] {
    let start = self.pos.min(self.data.len());
    let end = start.saturating_add(len).min(self.data.len());
    self.pos = end;
    &self.data[start..end]
  }
}
