//! Stale-range bookkeeping between the parse tree and the highlighter.

use std::{
  mem,
  ops::Range,
};

use smallvec::SmallVec;

use crate::edit::EditRecord;

/// Sorted character ranges that are disjoint and not adjacent. Inserting a
/// range merges it with every range it overlaps or touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationSet {
  ranges: SmallVec<[Range<usize>; 4]>,
}

impl InvalidationSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_range(range: Range<usize>) -> Self {
    let mut set = Self::new();
    set.insert(range);
    set
  }

  pub fn is_empty(&self) -> bool {
    self.ranges.is_empty()
  }

  pub fn len(&self) -> usize {
    self.ranges.len()
  }

  pub fn ranges(&self) -> &[Range<usize>] {
    &self.ranges
  }

  pub fn iter(&self) -> impl Iterator<Item = &Range<usize>> {
    self.ranges.iter()
  }

  /// Empty ranges carry nothing to restyle and are ignored.
  pub fn insert(&mut self, range: Range<usize>) {
    if range.is_empty() {
      return;
    }
    let first = self.ranges.partition_point(|r| r.end < range.start);
    let last = self.ranges.partition_point(|r| r.start <= range.end);
    if first == last {
      self.ranges.insert(first, range);
      return;
    }
    let start = range.start.min(self.ranges[first].start);
    let end = range.end.max(self.ranges[last - 1].end);
    self.ranges.drain(first + 1..last);
    self.ranges[first] = start..end;
  }

  pub fn extend(&mut self, other: &InvalidationSet) {
    for range in other.iter() {
      self.insert(range.clone());
    }
  }

  pub fn overlaps(&self, range: &Range<usize>) -> bool {
    let idx = self.ranges.partition_point(|r| r.end <= range.start);
    self
      .ranges
      .get(idx)
      .is_some_and(|r| r.start < range.end)
  }

  /// Moves every range through `edit`.
  pub fn apply_edit(&mut self, edit: &EditRecord) {
    if self.is_empty() {
      return;
    }
    let mapped: SmallVec<[Range<usize>; 4]> =
      self.ranges.iter().map(|r| edit.map_range(r)).collect();
    self.ranges.clear();
    for range in mapped {
      self.insert(range);
    }
  }

  /// Drops everything at or past `len`.
  pub fn clamp(&mut self, len: usize) {
    self.ranges.retain(|r| {
      r.end = r.end.min(len);
      r.start < r.end
    });
  }

  pub fn take(&mut self) -> InvalidationSet {
    mem::take(self)
  }
}

impl FromIterator<Range<usize>> for InvalidationSet {
  fn from_iter<T: IntoIterator<Item = Range<usize>>>(iter: T) -> Self {
    let mut set = Self::new();
    for range in iter {
      set.insert(range);
    }
    set
  }
}

impl<'a> IntoIterator for &'a InvalidationSet {
  type Item = &'a Range<usize>;
  type IntoIter = std::slice::Iter<'a, Range<usize>>;

  fn into_iter(self) -> Self::IntoIter {
    self.ranges.iter()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushState {
  #[default]
  Idle,
  PendingFlush,
}

/// What the owner of a coordinator has to do after a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
  /// First report since the last flush: schedule one on the serial context.
  Schedule,
  /// A flush is already scheduled and will pick the range up.
  AlreadyScheduled,
  /// Nothing stale was added and nothing is pending.
  Ignored,
}

/// Accumulates stale ranges and debounces flushes: at most one flush is
/// scheduled at a time, reports arriving before it runs are merged in.
#[derive(Debug, Default)]
pub struct InvalidationCoordinator {
  pending: InvalidationSet,
  state:   FlushState,
}

impl InvalidationCoordinator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> FlushState {
    self.state
  }

  pub fn pending(&self) -> &InvalidationSet {
    &self.pending
  }

  pub fn report(&mut self, range: Range<usize>) -> FlushDecision {
    self.pending.insert(range);
    self.transition()
  }

  pub fn report_set(&mut self, set: &InvalidationSet) -> FlushDecision {
    self.pending.extend(set);
    self.transition()
  }

  fn transition(&mut self) -> FlushDecision {
    match self.state {
      FlushState::PendingFlush => FlushDecision::AlreadyScheduled,
      FlushState::Idle if self.pending.is_empty() => FlushDecision::Ignored,
      FlushState::Idle => {
        self.state = FlushState::PendingFlush;
        FlushDecision::Schedule
      },
    }
  }

  /// Drains the set for the flush that is running now.
  pub fn take_flush(&mut self) -> InvalidationSet {
    self.state = FlushState::Idle;
    self.pending.take()
  }

  pub fn apply_edit(&mut self, edit: &EditRecord) {
    self.pending.apply_edit(edit);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn set(ranges: &[Range<usize>]) -> InvalidationSet {
    ranges.iter().cloned().collect()
  }

  #[test]
  fn adjacent_ranges_coalesce() {
    let merged = set(&[0..5, 5..10]);
    assert_eq!(merged.ranges(), &[0..10]);
  }

  #[test]
  fn insert_keeps_order_and_merges_spans() {
    let mut ranges = set(&[20..25, 0..2, 10..12]);
    assert_eq!(ranges.ranges(), &[0..2, 10..12, 20..25]);
    ranges.insert(11..21);
    assert_eq!(ranges.ranges(), &[0..2, 10..25]);
    ranges.insert(3..4);
    assert_eq!(ranges.ranges(), &[0..2, 3..4, 10..25]);
    ranges.insert(7..7);
    assert_eq!(ranges.len(), 3);
    assert!(ranges.overlaps(&(24..30)));
    assert!(!ranges.overlaps(&(25..30)));
    assert!(!ranges.overlaps(&(4..10)));
  }

  #[test]
  fn edits_shift_and_merge_ranges() {
    let mut ranges = set(&[0..4, 8..10, 20..22]);
    // delete 4..8, pulling 8..10 against 0..4
    ranges.apply_edit(&EditRecord::delete(4..8));
    assert_eq!(ranges.ranges(), &[0..6, 16..18]);
    ranges.apply_edit(&EditRecord::insert(1, 3));
    assert_eq!(ranges.ranges(), &[0..9, 19..21]);
    ranges.clamp(20);
    assert_eq!(ranges.ranges(), &[0..9, 19..20]);
  }

  #[test]
  fn coordinator_debounces_to_one_flush() {
    let mut coordinator = InvalidationCoordinator::new();
    assert_eq!(coordinator.report(0..0), FlushDecision::Ignored);
    assert_eq!(coordinator.report(0..5), FlushDecision::Schedule);
    assert_eq!(coordinator.state(), FlushState::PendingFlush);
    assert_eq!(coordinator.report(5..10), FlushDecision::AlreadyScheduled);

    let flushed = coordinator.take_flush();
    assert_eq!(flushed.ranges(), &[0..10]);
    assert_eq!(coordinator.state(), FlushState::Idle);
    assert!(coordinator.pending().is_empty());
    assert_eq!(coordinator.report(2..3), FlushDecision::Schedule);
  }

  quickcheck::quickcheck! {
    fn inserted_ranges_stay_disjoint(raw: Vec<(u8, u8)>) -> bool {
      let mut ranges = InvalidationSet::new();
      let mut covered = [false; 256];
      for (a, b) in raw {
        let (start, end) = (a.min(b) as usize, a.max(b) as usize);
        ranges.insert(start..end);
        for slot in &mut covered[start..end] {
          *slot = true;
        }
      }
      let disjoint = ranges
        .ranges()
        .windows(2)
        .all(|pair| pair[0].end < pair[1].start);
      let exact = (0..256).all(|i| covered[i] == ranges.overlaps(&(i..i + 1)));
      disjoint && exact
    }
  }
}
