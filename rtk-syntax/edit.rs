//! Edit bookkeeping.
//!
//! Hosts announce a mutation twice: [`EditTracker::will_change`] before the
//! characters change and [`EditTracker::did_change`] once they have. The pair
//! collapses into exactly one [`EditRecord`]. Any disagreement between the two
//! notifications, or with the tracked buffer length, is a
//! [`EditError::StateInconsistent`] and the document session has to be reset.

use std::ops::Range;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EditError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Inconsistency {
  #[error("didChange arrived without a preceding willChange")]
  MissingWillChange,
  #[error("willChange for {pending:?} is still waiting for its didChange")]
  DuplicateWillChange { pending: Range<usize> },
  #[error("willChange announced {announced:?} but didChange reported {actual:?}")]
  RangeMismatch {
    announced: Range<usize>,
    actual:    Range<usize>,
  },
  #[error("edit range {range:?} is outside a buffer of {len} chars")]
  OutOfBounds { range: Range<usize>, len: usize },
  #[error("replacing {removed} chars with {inserted} does not give a delta of {delta}")]
  DeltaMismatch {
    removed:  usize,
    inserted: usize,
    delta:    isize,
  },
  #[error("buffer should have {expected} chars after the edit, host reports {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EditError {
  #[error("edit bookkeeping is inconsistent: {0}")]
  StateInconsistent(#[from] Inconsistency),
}

/// Which side of an edit a position sticks to when it falls inside the
/// replaced range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
  Before,
  After,
}

/// One discrete mutation: `range` is in pre-edit characters, `delta` is the
/// change in buffer length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EditRecord {
  pub range: Range<usize>,
  pub delta: isize,
}

impl EditRecord {
  pub fn new(range: Range<usize>, delta: isize) -> Self {
    debug_assert!(range.start <= range.end);
    debug_assert!(range.len() as isize + delta >= 0);
    Self { range, delta }
  }

  pub fn insert(at: usize, len: usize) -> Self {
    Self::new(at..at, len as isize)
  }

  pub fn delete(range: Range<usize>) -> Self {
    let delta = -(range.len() as isize);
    Self::new(range, delta)
  }

  pub fn inserted_len(&self) -> usize {
    (self.range.len() as isize + self.delta) as usize
  }

  pub fn new_end(&self) -> usize {
    self.range.start + self.inserted_len()
  }

  /// The replaced range in post-edit characters.
  pub fn new_range(&self) -> Range<usize> {
    self.range.start..self.new_end()
  }

  pub fn map(&self, pos: usize, assoc: Assoc) -> usize {
    if pos < self.range.start {
      pos
    } else if pos > self.range.end {
      (pos as isize + self.delta) as usize
    } else {
      match assoc {
        Assoc::Before => self.range.start,
        Assoc::After => self.new_end(),
      }
    }
  }

  /// Maps a range so that it still covers everything it covered before,
  /// including text inserted at its edges.
  pub fn map_range(&self, range: &Range<usize>) -> Range<usize> {
    let start = self.map(range.start, Assoc::Before);
    let end = self.map(range.end, Assoc::After);
    start..end.max(start)
  }
}

/// The post-edit notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
  /// Replaced range, pre-edit characters.
  pub range:   Range<usize>,
  pub delta:   isize,
  /// The replacement text.
  pub text:    String,
  /// Buffer length after the edit.
  pub new_len: usize,
}

impl ContentChange {
  pub fn new(range: Range<usize>, text: &str, new_len: usize) -> Self {
    let delta = text.chars().count() as isize - range.len() as isize;
    Self {
      range,
      delta,
      text: text.to_string(),
      new_len,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct EditTracker {
  len:     usize,
  pending: Option<Range<usize>>,
}

impl EditTracker {
  pub fn new(len: usize) -> Self {
    Self { len, pending: None }
  }

  /// Tracked buffer length in characters.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn is_pending(&self) -> bool {
    self.pending.is_some()
  }

  pub fn will_change(&mut self, range: Range<usize>) -> Result<()> {
    if let Some(pending) = &self.pending {
      return Err(
        Inconsistency::DuplicateWillChange {
          pending: pending.clone(),
        }
        .into(),
      );
    }
    if range.start > range.end || range.end > self.len {
      return Err(
        Inconsistency::OutOfBounds {
          range,
          len: self.len,
        }
        .into(),
      );
    }
    self.pending = Some(range);
    Ok(())
  }

  pub fn did_change(&mut self, change: &ContentChange) -> Result<EditRecord> {
    let announced = self.pending.take().ok_or(Inconsistency::MissingWillChange)?;
    if announced != change.range {
      return Err(
        Inconsistency::RangeMismatch {
          announced,
          actual: change.range.clone(),
        }
        .into(),
      );
    }

    let removed = change.range.len();
    let inserted = change.text.chars().count();
    if inserted as isize != removed as isize + change.delta {
      return Err(
        Inconsistency::DeltaMismatch {
          removed,
          inserted,
          delta: change.delta,
        }
        .into(),
      );
    }

    let expected = self.len - removed + inserted;
    if expected != change.new_len {
      return Err(
        Inconsistency::LengthMismatch {
          expected,
          actual: change.new_len,
        }
        .into(),
      );
    }

    self.len = expected;
    Ok(EditRecord::new(change.range.clone(), change.delta))
  }

  /// Forgets any half-finished edit and starts tracking a buffer of `len`
  /// chars.
  pub fn reset(&mut self, len: usize) {
    self.len = len;
    self.pending = None;
  }
}

/// A bulk replacement broken into single edits, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedEdit {
  pub record: EditRecord,
  pub text:   String,
}

/// Turns sorted, non-overlapping `(from, to, replacement)` changes, all in
/// pre-edit coordinates, into edits that can be applied one after another.
/// Each record is expressed in the buffer as it stands once the previous ones
/// have been applied.
pub fn records_from_changes<I, S>(changes: I) -> Vec<SequencedEdit>
where
  I: IntoIterator<Item = (usize, usize, Option<S>)>,
  S: AsRef<str>,
{
  let mut shift = 0isize;
  let mut edits = Vec::new();
  for (from, to, text) in changes {
    let text = text.as_ref().map(|s| s.as_ref()).unwrap_or_default();
    let removed = to.saturating_sub(from);
    if removed == 0 && text.is_empty() {
      continue;
    }
    let start = (from as isize + shift) as usize;
    let delta = text.chars().count() as isize - removed as isize;
    edits.push(SequencedEdit {
      record: EditRecord::new(start..start + removed, delta),
      text:   text.to_string(),
    });
    shift += delta;
  }
  edits
}

#[cfg(test)]
mod tests {
  use super::*;

  fn change(range: Range<usize>, text: &str, new_len: usize) -> ContentChange {
    ContentChange::new(range, text, new_len)
  }

  #[test]
  fn paired_notifications_emit_one_record() {
    let mut tracker = EditTracker::new(10);
    tracker.will_change(2..4).unwrap();
    let record = tracker.did_change(&change(2..4, "xyz", 11)).unwrap();
    assert_eq!(record, EditRecord::new(2..4, 1));
    assert_eq!(record.new_range(), 2..5);
    assert_eq!(tracker.len(), 11);
    assert!(!tracker.is_pending());
  }

  #[test]
  fn unpaired_notifications_are_inconsistent() {
    let mut tracker = EditTracker::new(10);
    assert_eq!(
      tracker.did_change(&change(0..0, "a", 11)),
      Err(EditError::StateInconsistent(
        Inconsistency::MissingWillChange
      ))
    );

    tracker.will_change(0..1).unwrap();
    assert!(matches!(
      tracker.will_change(0..1),
      Err(EditError::StateInconsistent(
        Inconsistency::DuplicateWillChange { .. }
      ))
    ));
  }

  #[test]
  fn length_arithmetic_must_reconcile() {
    let mut tracker = EditTracker::new(10);
    tracker.will_change(0..2).unwrap();
    assert!(matches!(
      tracker.did_change(&change(0..2, "abc", 12)),
      Err(EditError::StateInconsistent(
        Inconsistency::LengthMismatch {
          expected: 11,
          actual:   12,
        }
      ))
    ));

    tracker.reset(10);
    tracker.will_change(0..2).unwrap();
    let mut bad = change(0..2, "abc", 11);
    bad.delta = 3;
    assert!(matches!(
      tracker.did_change(&bad),
      Err(EditError::StateInconsistent(
        Inconsistency::DeltaMismatch { .. }
      ))
    ));

    tracker.reset(10);
    assert!(matches!(
      tracker.will_change(4..12),
      Err(EditError::StateInconsistent(
        Inconsistency::OutOfBounds { .. }
      ))
    ));
  }

  #[test]
  fn map_positions_through_edit() {
    let edit = EditRecord::new(4..6, 3);
    assert_eq!(edit.map(2, Assoc::After), 2);
    assert_eq!(edit.map(5, Assoc::Before), 4);
    assert_eq!(edit.map(5, Assoc::After), 9);
    assert_eq!(edit.map(10, Assoc::Before), 13);
    assert_eq!(edit.map_range(&(0..5)), 0..9);

    let insert = EditRecord::insert(3, 2);
    assert_eq!(insert.map(3, Assoc::Before), 3);
    assert_eq!(insert.map(3, Assoc::After), 5);
  }

  #[test]
  fn bulk_changes_become_sequential_records() {
    let edits = records_from_changes([
      (0, 1, Some("AB")),
      (3, 5, None),
      (6, 6, Some("!")),
    ]);
    let mut text: Vec<char> = "abcdefg".chars().collect();
    for edit in &edits {
      text.splice(edit.record.range.clone(), edit.text.chars());
    }
    assert_eq!(text.into_iter().collect::<String>(), "ABbcf!g");
    assert_eq!(edits[1].record, EditRecord::new(4..6, -2));
  }

  fn apply_reversed(text: &str, changes: &[(usize, usize, Option<String>)]) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    for (from, to, replacement) in changes.iter().rev() {
      let insert = replacement.clone().unwrap_or_default();
      chars.splice(*from..*to, insert.chars());
    }
    chars.into_iter().collect()
  }

  quickcheck::quickcheck! {
    fn sequenced_edits_match_reverse_application(
      text: String,
      cuts: Vec<(u8, u8, Option<String>)>
    ) -> bool {
      let len = text.chars().count();
      let mut points: Vec<(usize, usize, Option<String>)> = Vec::new();
      let mut floor = 0;
      for (a, b, replacement) in cuts {
        if len == 0 {
          break;
        }
        let from = floor + a as usize % (len - floor + 1);
        let to = from + b as usize % (len - from + 1);
        if from > len || to > len {
          break;
        }
        points.push((from, to, replacement));
        floor = to;
        if floor >= len {
          break;
        }
      }

      let mut chars: Vec<char> = text.chars().collect();
      for edit in records_from_changes(points.clone()) {
        chars.splice(edit.record.range.clone(), edit.text.chars());
      }
      chars.into_iter().collect::<String>() == apply_reversed(&text, &points)
    }
  }
}
