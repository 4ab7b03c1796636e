//! A layer's parse tree: a contiguous run of top-level units.
//!
//! Units are the granularity of reuse. Each one is parsed from a position
//! where the grammar holds no state carried over from earlier text, so an old
//! unit that starts exactly where fresh parsing arrives can be kept as is.

use std::{
  ops::Range,
  time::Instant,
};

use super::{
  ParseStats,
  grammar::{
    Grammar,
    Injection,
  },
};

/// Node kinds are grammar defined names.
pub type NodeKind = &'static str;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
  pub kind:     NodeKind,
  /// Byte range. Absolute while a grammar builds it, relative to the unit
  /// start once stored in a [`Tree`].
  pub range:    Range<usize>,
  pub children: Vec<Node>,
}

impl Node {
  pub fn leaf(kind: NodeKind, range: Range<usize>) -> Self {
    Self {
      kind,
      range,
      children: Vec::new(),
    }
  }

  pub fn with_children(kind: NodeKind, range: Range<usize>, children: Vec<Node>) -> Self {
    Self {
      kind,
      range,
      children,
    }
  }

  pub fn len(&self) -> usize {
    self.range.len()
  }

  pub fn is_empty(&self) -> bool {
    self.range.is_empty()
  }

  fn shift_down(&mut self, offset: usize) {
    self.range = self.range.start - offset..self.range.end - offset;
    for child in &mut self.children {
      child.shift_down(offset);
    }
  }

  /// Pre-order walk with absolute ranges.
  pub fn walk<'a>(&'a self, offset: usize, f: &mut impl FnMut(&'a Node, Range<usize>)) {
    f(self, self.range.start + offset..self.range.end + offset);
    for child in &self.children {
      child.walk(offset, f);
    }
  }

  pub fn child(&self, kind: NodeKind) -> Option<&Node> {
    self.children.iter().find(|child| child.kind == kind)
  }
}

/// A byte-level edit, the same shape tree-sitter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteEdit {
  pub start:   usize,
  pub old_end: usize,
  pub new_end: usize,
}

impl ByteEdit {
  fn delta(&self) -> isize {
    self.new_end as isize - self.old_end as isize
  }

  fn map_start(&self, pos: usize) -> usize {
    if pos <= self.start {
      pos
    } else if pos >= self.old_end {
      (pos as isize + self.delta()) as usize
    } else {
      self.start
    }
  }

  fn map_end(&self, pos: usize) -> usize {
    if pos < self.start {
      pos
    } else if pos >= self.old_end {
      (pos as isize + self.delta()) as usize
    } else {
      self.new_end
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
  pub start: usize,
  pub node:  Node,
  dirty:     bool,
}

impl Unit {
  pub fn end(&self) -> usize {
    self.start + self.node.range.end
  }

  pub fn range(&self) -> Range<usize> {
    self.start..self.end()
  }
}

/// The deadline passed before the parse finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

#[derive(Debug, Clone)]
pub struct Tree {
  range:      Range<usize>,
  units:      Vec<Unit>,
  needs_full: bool,
}

impl Tree {
  /// A tree over `range` that has not been parsed yet.
  pub fn unparsed(range: Range<usize>) -> Self {
    Self {
      range,
      units: Vec::new(),
      needs_full: true,
    }
  }

  pub fn range(&self) -> Range<usize> {
    self.range.clone()
  }

  pub fn units(&self) -> &[Unit] {
    &self.units
  }

  pub fn is_dirty(&self) -> bool {
    self.needs_full || self.units.iter().any(|unit| unit.dirty)
  }

  /// Units overlapping `range`.
  pub fn units_in(&self, range: Range<usize>) -> &[Unit] {
    let first = self.units.partition_point(|unit| unit.end() <= range.start);
    let last = self.units.partition_point(|unit| unit.start < range.end);
    &self.units[first..last.max(first)]
  }

  /// Shifts the tree through `edit` and marks every unit the edit touches.
  pub fn edit(&mut self, edit: &ByteEdit) {
    self.range = edit.map_start(self.range.start)..edit.map_end(self.range.end);
    if self.units.is_empty() {
      self.needs_full = true;
      return;
    }
    let delta = edit.delta();
    for unit in &mut self.units {
      let (start, end) = (unit.start, unit.end());
      if end < edit.start {
        continue;
      }
      if start > edit.old_end {
        unit.start = (start as isize + delta) as usize;
        continue;
      }
      unit.dirty = true;
      unit.start = edit.map_start(start);
    }
  }

  /// Re-parses dirty units. Returns the byte range whose structure was
  /// rebuilt, or `None` when nothing was dirty.
  pub fn reparse(
    &mut self,
    grammar: &dyn Grammar,
    source: &str,
    deadline: Option<Instant>,
    stats: &mut ParseStats,
  ) -> Result<Option<Range<usize>>, Timeout> {
    if self.needs_full {
      self.units = parse_units(
        grammar,
        source,
        self.range.start,
        self.range.end,
        deadline,
        stats,
        |_| false,
      )?;
      self.needs_full = false;
      return Ok(Some(self.range.clone()));
    }

    let Some(first_dirty) = self.units.iter().position(|unit| unit.dirty) else {
      return Ok(None);
    };
    let last_dirty = self
      .units
      .iter()
      .rposition(|unit| unit.dirty)
      .unwrap_or(first_dirty);
    let start_idx = first_dirty.saturating_sub(1);
    let from = self.units[start_idx].start;

    // old clean units after the edit are where parsing may rejoin the old tree
    let clean = &self.units[last_dirty + 1..];
    let mut next_clean = 0;
    let mut synced_at = None;
    let new_units = parse_units(grammar, source, from, self.range.end, deadline, stats, |pos| {
      while next_clean < clean.len() && clean[next_clean].start < pos {
        next_clean += 1;
      }
      let hit = next_clean < clean.len() && clean[next_clean].start == pos;
      if hit {
        synced_at = Some(next_clean);
      }
      hit
    })?;
    let resume = match synced_at {
      Some(idx) => last_dirty + 1 + idx,
      None => self.units.len(),
    };

    let mut region_start = from;
    let unchanged_prefix = start_idx < first_dirty
      && new_units
        .first()
        .is_some_and(|unit| *unit == self.units[start_idx]);
    if unchanged_prefix {
      region_start = new_units[0].end();
    }
    let region_end = new_units.last().map_or(from, Unit::end);

    self.units.splice(start_idx..resume, new_units);
    Ok(Some(region_start..region_end.max(region_start)))
  }

  /// Injection points of the units overlapping `range`.
  pub fn injections(
    &self,
    grammar: &dyn Grammar,
    source: &str,
    range: Range<usize>,
  ) -> Vec<Injection> {
    let mut injections = Vec::new();
    for unit in self.units_in(range) {
      grammar.injections(&unit.node, unit.start, source, &mut injections);
    }
    injections
  }
}

/// Parses units from `from` until `end`, stopping early when `synced` says
/// an old unit starts at the current position.
fn parse_units(
  grammar: &dyn Grammar,
  source: &str,
  from: usize,
  end: usize,
  deadline: Option<Instant>,
  stats: &mut ParseStats,
  mut synced: impl FnMut(usize) -> bool,
) -> Result<Vec<Unit>, Timeout> {
  let mut units = Vec::new();
  let mut pos = from;
  while pos < end {
    if !units.is_empty() && synced(pos) {
      break;
    }
    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
      return Err(Timeout);
    }
    let mut node = grammar.parse_unit(source, pos, end);
    debug_assert!(node.range.start == pos && node.range.end > pos && node.range.end <= end);
    // a grammar must always make progress
    if node.range.end <= pos {
      node = Node::leaf("error", pos..end);
    }
    stats.units_parsed += 1;
    stats.bytes_parsed += node.len();
    let unit_end = node.range.end;
    node.shift_down(pos);
    units.push(Unit {
      start: pos,
      node,
      dirty: false,
    });
    pos = unit_end;
  }
  Ok(units)
}

#[cfg(test)]
mod tests {
  use super::*;

  /// One unit per line, no injections.
  #[derive(Debug)]
  struct Lines;

  impl Grammar for Lines {
    fn parse_unit(&self, source: &str, start: usize, end: usize) -> Node {
      let stop = source[start..end]
        .find('\n')
        .map_or(end, |i| start + i + 1);
      Node::leaf("line", start..stop)
    }

    fn capture(&self, _kind: &str) -> Option<&'static str> {
      None
    }

    fn injections(&self, _unit: &Node, _offset: usize, _source: &str, _out: &mut Vec<Injection>) {}
  }

  fn parsed(source: &str) -> (Tree, ParseStats) {
    let mut stats = ParseStats::default();
    let mut tree = Tree::unparsed(0..source.len());
    tree.reparse(&Lines, source, None, &mut stats).unwrap();
    (tree, stats)
  }

  fn starts(tree: &Tree) -> Vec<usize> {
    tree.units().iter().map(|unit| unit.start).collect()
  }

  #[test]
  fn full_parse_covers_range() {
    let (tree, stats) = parsed("a\nbb\nccc");
    assert_eq!(starts(&tree), vec![0, 2, 5]);
    assert_eq!(stats.units_parsed, 3);
    assert_eq!(stats.bytes_parsed, 8);
  }

  #[test]
  fn single_edit_reparses_locally() {
    let old = "a\nbb\nccc\ndd\ne\n";
    let (mut tree, _) = parsed(old);
    // "bb" -> "bXb"
    let new = "a\nbXb\nccc\ndd\ne\n";
    tree.edit(&ByteEdit {
      start:   3,
      old_end: 3,
      new_end: 4,
    });
    let mut stats = ParseStats::default();
    let region = tree.reparse(&Lines, new, None, &mut stats).unwrap();
    assert_eq!(starts(&tree), vec![0, 2, 6, 10, 13]);
    // the untouched first line is re-parsed but not reported
    assert_eq!(region, Some(2..6));
    assert_eq!(stats.units_parsed, 2);
    assert!(!tree.is_dirty());
  }

  #[test]
  fn edit_that_joins_units_resyncs_later() {
    let (mut tree, _) = parsed("a\nbb\nccc\n");
    // delete the newline after "bb"
    tree.edit(&ByteEdit {
      start:   4,
      old_end: 5,
      new_end: 4,
    });
    let mut stats = ParseStats::default();
    let new = "a\nbbccc\n";
    let region = tree.reparse(&Lines, new, None, &mut stats).unwrap();
    assert_eq!(starts(&tree), vec![0, 2]);
    assert_eq!(region, Some(2..8));
  }

  #[test]
  fn expired_deadline_times_out() {
    let mut tree = Tree::unparsed(0..3);
    let mut stats = ParseStats::default();
    assert_eq!(
      tree.reparse(&Lines, "a\nb", Some(Instant::now()), &mut stats),
      Err(Timeout)
    );
  }

  #[test]
  fn units_in_selects_overlapping() {
    let (tree, _) = parsed("a\nbb\nccc");
    let hit: Vec<_> = tree.units_in(3..6).iter().map(Unit::range).collect();
    assert_eq!(hit, vec![2..5, 5..8]);
    assert!(tree.units_in(8..8).is_empty());
  }
}
