//! The narrow interface the pipeline uses to reach the host's text buffer,
//! plus [`StyledText`], a rope backed reference buffer.

use std::{
  fmt,
  ops::Range,
  sync::Arc,
};

use parking_lot::Mutex;
use ropey::Rope;

use crate::{
  edit::ContentChange,
  style::AttributeSet,
};

/// Read access to the buffer, always reflecting the content after the most
/// recent edit.
pub trait TextSource {
  fn len_chars(&self) -> usize;
  fn substring(&self, range: Range<usize>) -> String;
}

/// Attribute mutation. There is no way to change characters through this
/// trait, so the buffer length is unchanged by any call.
pub trait AttributeSink {
  fn set_attributes(&self, attrs: &AttributeSet, range: Range<usize>);
}

/// A host buffer usable by the pipeline.
pub trait HostBuffer: TextSource + AttributeSink + Send + Sync {}

impl<T: TextSource + AttributeSink + Send + Sync + ?Sized> HostBuffer for T {}

impl fmt::Debug for dyn HostBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HostBuffer")
      .field("len_chars", &self.len_chars())
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
  pub range: Range<usize>,
  pub attrs: AttributeSet,
}

/// Text plus coalesced attribute runs covering every character.
#[derive(Debug, Clone, Default)]
pub struct StyledText {
  text:      Rope,
  runs:      Vec<Run>,
  /// Number of `set_attributes` calls received.
  style_ops: usize,
}

impl StyledText {
  pub fn new(text: &str) -> Self {
    let text = Rope::from_str(text);
    let len = text.len_chars();
    let runs = if len == 0 {
      Vec::new()
    } else {
      vec![Run {
        range: 0..len,
        attrs: AttributeSet::base(),
      }]
    };
    Self {
      text,
      runs,
      style_ops: 0,
    }
  }

  pub fn text(&self) -> &Rope {
    &self.text
  }

  pub fn runs(&self) -> &[Run] {
    &self.runs
  }

  pub fn style_ops(&self) -> usize {
    self.style_ops
  }

  pub fn attributes_at(&self, pos: usize) -> AttributeSet {
    let idx = self.runs.partition_point(|run| run.range.end <= pos);
    self
      .runs
      .get(idx)
      .map(|run| run.attrs.clone())
      .unwrap_or_default()
  }

  /// Replaces `range` (pre-edit characters) with `text`. Inserted characters
  /// take the attributes of the character before them.
  pub fn replace(&mut self, range: Range<usize>, text: &str) -> ContentChange {
    let len = self.text.len_chars();
    let range = range.start.min(len)..range.end.min(len).max(range.start.min(len));
    let inserted = text.chars().count();
    let inherited = if range.start > 0 {
      self.attributes_at(range.start - 1)
    } else {
      self.attributes_at(range.start)
    };

    self.text.remove(range.clone());
    self.text.insert(range.start, text);

    let start = self.split_at(range.start);
    let end = self.split_at(range.end);
    self.runs.drain(start..end);
    let delta = inserted as isize - range.len() as isize;
    for run in &mut self.runs[start..] {
      run.range.start = (run.range.start as isize + delta) as usize;
      run.range.end = (run.range.end as isize + delta) as usize;
    }
    if inserted > 0 {
      self.runs.insert(start, Run {
        range: range.start..range.start + inserted,
        attrs: inherited,
      });
    }
    self.coalesce();

    ContentChange::new(range, text, self.text.len_chars())
  }

  pub fn apply_attributes(&mut self, attrs: &AttributeSet, range: Range<usize>) {
    self.style_ops += 1;
    let len = self.text.len_chars();
    let range = range.start.min(len)..range.end.min(len);
    if range.is_empty() {
      return;
    }
    let start = self.split_at(range.start);
    let end = self.split_at(range.end);
    self.runs.splice(start..end, [Run {
      range,
      attrs: attrs.clone(),
    }]);
    self.coalesce();
  }

  /// Index of the first run starting at `pos`, splitting the run that spans
  /// it if needed.
  fn split_at(&mut self, pos: usize) -> usize {
    let idx = self.runs.partition_point(|run| run.range.end <= pos);
    let Some(run) = self.runs.get_mut(idx) else {
      return idx;
    };
    if run.range.start == pos {
      return idx;
    }
    let tail = Run {
      range: pos..run.range.end,
      attrs: run.attrs.clone(),
    };
    run.range.end = pos;
    self.runs.insert(idx + 1, tail);
    idx + 1
  }

  fn coalesce(&mut self) {
    let mut merged: Vec<Run> = Vec::with_capacity(self.runs.len());
    for run in self.runs.drain(..) {
      if run.range.is_empty() {
        continue;
      }
      match merged.last_mut() {
        Some(prev) if prev.attrs == run.attrs && prev.range.end == run.range.start => {
          prev.range.end = run.range.end;
        },
        _ => merged.push(run),
      }
    }
    self.runs = merged;
  }
}

impl TextSource for StyledText {
  fn len_chars(&self) -> usize {
    self.text.len_chars()
  }

  fn substring(&self, range: Range<usize>) -> String {
    let len = self.text.len_chars();
    self
      .text
      .slice(range.start.min(len)..range.end.min(len))
      .to_string()
  }
}

/// A [`StyledText`] shared between the host and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SharedText {
  inner: Arc<Mutex<StyledText>>,
}

impl SharedText {
  pub fn new(text: &str) -> Self {
    Self {
      inner: Arc::new(Mutex::new(StyledText::new(text))),
    }
  }

  pub fn replace(&self, range: Range<usize>, text: &str) -> ContentChange {
    self.inner.lock().replace(range, text)
  }

  pub fn snapshot(&self) -> StyledText {
    self.inner.lock().clone()
  }

  pub fn contents(&self) -> String {
    self.inner.lock().text().to_string()
  }

  pub fn attributes_at(&self, pos: usize) -> AttributeSet {
    self.inner.lock().attributes_at(pos)
  }
}

impl TextSource for SharedText {
  fn len_chars(&self) -> usize {
    self.inner.lock().len_chars()
  }

  fn substring(&self, range: Range<usize>) -> String {
    self.inner.lock().substring(range)
  }
}

impl AttributeSink for SharedText {
  fn set_attributes(&self, attrs: &AttributeSet, range: Range<usize>) {
    self.inner.lock().apply_attributes(attrs, range);
  }
}
