//! Layered, incrementally re-parsed syntax trees.
//!
//! A document is parsed by the root language into a [`Tree`] of units. Units
//! can inject other languages over sub-ranges, and each injection becomes a
//! child layer with its own tree. Layers live in a [`SlotMap`] arena and refer
//! to each other by [`LayerId`].
//!
//! Edits arrive as character [`EditRecord`]s. They are converted to byte
//! edits, shifted through every layer and only the dirty units are parsed
//! again. Child layers are diffed against the injections of the re-parsed
//! units: identical ones survive, new ones are created and vanished ones are
//! dropped together with their descendants.

pub mod code;
pub mod grammar;
pub mod inline;
pub mod markdown;
pub mod tree;

use std::{
  borrow::Cow,
  fmt,
  ops::Range,
  sync::{
    Arc,
    Weak,
    atomic::{
      AtomicU64,
      Ordering,
    },
  },
  time::{
    Duration,
    Instant,
  },
};

use parking_lot::{
  Mutex,
  MutexGuard,
};
use ropey::Rope;
use slotmap::SlotMap;
use thiserror::Error;

use self::{
  grammar::{
    Injection,
    LayerConfiguration,
    Loader,
  },
  tree::{
    ByteEdit,
    Timeout,
    Tree,
  },
};
use crate::{
  edit::EditRecord,
  invalidation::InvalidationSet,
};

pub const PARSE_TIMEOUT: Duration = Duration::from_millis(500);
pub const MAX_INJECTION_DEPTH: usize = 4;

pub type Result<T> = std::result::Result<T, SyntaxError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
  #[error("the document has not been parsed")]
  NoRootNode,
  #[error("parsing did not finish within {budget:?}")]
  ParseTimeout { budget: Duration },
  #[error("no grammar registered for root language '{0}'")]
  UnknownLanguage(String),
  #[error("edit range {range:?} is outside a document of {len} chars")]
  OutOfBounds { range: Range<usize>, len: usize },
}

/// Index past the next line break at or after `pos`, or `end`.
pub(crate) fn line_end(source: &str, pos: usize, end: usize) -> usize {
  source[pos..end].find('\n').map_or(end, |i| pos + i + 1)
}

/// Work done by the last parse or edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
  pub units_parsed:  usize,
  pub bytes_parsed:  usize,
  pub layers_parsed: usize,
  /// The incremental update ran out of time and the document was parsed
  /// again from scratch.
  pub full_reparse:  bool,
}

/// A classified span of the document, in characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedRange {
  pub name:  Cow<'static, str>,
  pub range: Range<usize>,
}

impl NamedRange {
  pub fn new(name: impl Into<Cow<'static, str>>, range: Range<usize>) -> Self {
    Self {
      name: name.into(),
      range,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
  /// Budget for one update. An incremental update that runs out gets one
  /// full reparse with a fresh budget.
  pub timeout:             Duration,
  pub injections:          bool,
  pub max_injection_depth: usize,
}

impl Default for ParseOptions {
  fn default() -> Self {
    Self {
      timeout:             PARSE_TIMEOUT,
      injections:          true,
      max_injection_depth: MAX_INJECTION_DEPTH,
    }
  }
}

slotmap::new_key_type! {
  pub struct LayerId;
}

#[derive(Debug)]
pub struct LayerData {
  pub config:   Arc<LayerConfiguration>,
  pub parent:   Option<LayerId>,
  pub depth:    usize,
  pub tree:     Tree,
  /// Sorted by start.
  pub children: Vec<LayerId>,
}

#[derive(Debug)]
pub struct SyntaxTree {
  loader:  Arc<Loader>,
  layers:  SlotMap<LayerId, LayerData>,
  root:    Option<LayerId>,
  text:    Rope,
  options: ParseOptions,
  version: u64,
  stats:   ParseStats,
}

impl SyntaxTree {
  /// A tree over `text` that is parsed on the first [`SyntaxTree::parse`].
  pub fn new(text: Rope, loader: Arc<Loader>, options: ParseOptions) -> Self {
    Self {
      loader,
      layers: SlotMap::with_key(),
      root: None,
      text,
      options,
      version: 0,
      stats: ParseStats::default(),
    }
  }

  pub fn text(&self) -> &Rope {
    &self.text
  }

  pub fn len_chars(&self) -> usize {
    self.text.len_chars()
  }

  pub fn version(&self) -> u64 {
    self.version
  }

  pub fn stats(&self) -> &ParseStats {
    &self.stats
  }

  pub fn options(&self) -> &ParseOptions {
    &self.options
  }

  pub fn set_timeout(&mut self, timeout: Duration) {
    self.options.timeout = timeout;
  }

  pub fn has_root(&self) -> bool {
    self.root.is_some()
  }

  pub fn layer_count(&self) -> usize {
    self.layers.len()
  }

  pub fn register_language(&self, name: &str) -> Option<Arc<LayerConfiguration>> {
    self.loader.language_for_name(name)
  }

  /// Language name and byte range of every layer, parents before children.
  pub fn layers(&self) -> Vec<(String, Range<usize>)> {
    let mut out = Vec::new();
    let mut stack: Vec<LayerId> = self.root.into_iter().collect();
    while let Some(id) = stack.pop() {
      let layer = &self.layers[id];
      out.push((layer.config.name.clone(), layer.tree.range()));
      stack.extend(layer.children.iter().rev());
    }
    out
  }

  /// Parses the whole document from scratch. Everything is stale afterwards.
  pub fn parse(&mut self) -> Result<InvalidationSet> {
    self.version += 1;
    self.stats = ParseStats::default();
    self.full_parse()
  }

  pub fn replace_content(&mut self, text: &str) -> Result<InvalidationSet> {
    self.text = Rope::from_str(text);
    self.parse()
  }

  /// Applies `edit`, whose replacement is `text`, and re-parses what it
  /// touched. Returns the character ranges whose highlighting may differ.
  pub fn apply_edit(&mut self, edit: &EditRecord, text: &str) -> Result<InvalidationSet> {
    let len = self.text.len_chars();
    if edit.range.end > len {
      return Err(SyntaxError::OutOfBounds {
        range: edit.range.clone(),
        len,
      });
    }
    debug_assert_eq!(text.chars().count(), edit.inserted_len());

    let start = self.text.char_to_byte(edit.range.start);
    let old_end = self.text.char_to_byte(edit.range.end);
    self.text.remove(edit.range.clone());
    self.text.insert(edit.range.start, text);
    self.version += 1;
    self.stats = ParseStats::default();

    let Some(root) = self.root else {
      return self.full_parse();
    };
    let byte_edit = ByteEdit {
      start,
      old_end,
      new_end: start + text.len(),
    };
    for layer in self.layers.values_mut() {
      layer.tree.edit(&byte_edit);
    }

    let deadline = self.deadline();
    let reparsed = {
      let source: Cow<str> = self.text.slice(..).into();
      let mut parser = LayerParser {
        layers: &mut self.layers,
        loader: &self.loader,
        options: &self.options,
        source: &source,
        deadline,
        stats: &mut self.stats,
        changed: Vec::new(),
      };
      let result = parser.reparse(root);
      result.map(|()| parser.changed)
    };
    match reparsed {
      Ok(changed) => {
        let mut set: InvalidationSet = changed
          .into_iter()
          .map(|range| self.text.byte_to_char(range.start)..self.text.byte_to_char(range.end))
          .collect();
        set.insert(edit.new_range());
        Ok(set)
      },
      Err(Timeout) => {
        tracing::warn!(
          budget = ?self.options.timeout,
          "incremental parse timed out, falling back to a full parse"
        );
        self.stats = ParseStats {
          full_reparse: true,
          ..ParseStats::default()
        };
        self.full_parse()
      },
    }
  }

  fn deadline(&self) -> Option<Instant> {
    Instant::now().checked_add(self.options.timeout)
  }

  fn full_parse(&mut self) -> Result<InvalidationSet> {
    self.layers.clear();
    self.root = None;
    let config = self
      .loader
      .root_language()
      .ok_or_else(|| SyntaxError::UnknownLanguage(self.loader.root_name().to_string()))?;
    let root = self.layers.insert(LayerData {
      config,
      parent: None,
      depth: 0,
      tree: Tree::unparsed(0..self.text.len_bytes()),
      children: Vec::new(),
    });

    let deadline = self.deadline();
    let source: Cow<str> = self.text.slice(..).into();
    let mut parser = LayerParser {
      layers: &mut self.layers,
      loader: &self.loader,
      options: &self.options,
      source: &source,
      deadline,
      stats: &mut self.stats,
      changed: Vec::new(),
    };
    if parser.reparse(root).is_err() {
      self.layers.clear();
      tracing::warn!(budget = ?self.options.timeout, "full parse timed out, dropping the tree");
      return Err(SyntaxError::ParseTimeout {
        budget: self.options.timeout,
      });
    }
    self.root = Some(root);
    tracing::trace!(
      layers = self.layers.len(),
      units = self.stats.units_parsed,
      "parsed document"
    );
    Ok(InvalidationSet::from_range(0..self.text.len_chars()))
  }

  /// Captured spans overlapping `range` (characters), clipped to it. Each
  /// layer's spans come in pre-order and before those of its children.
  pub fn highlights(&self, range: Range<usize>) -> Result<Vec<NamedRange>> {
    let root = self.root.ok_or(SyntaxError::NoRootNode)?;
    let len = self.text.len_chars();
    let range = range.start.min(len)..range.end.min(len);
    let bytes = self.text.char_to_byte(range.start)..self.text.char_to_byte(range.end);

    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
      let Some(layer) = self.layers.get(id) else {
        continue;
      };
      let grammar = &*layer.config.grammar;
      for unit in layer.tree.units_in(bytes.clone()) {
        unit.node.walk(unit.start, &mut |node, node_range| {
          let Some(name) = grammar.capture(node.kind) else {
            return;
          };
          let start = node_range.start.max(bytes.start);
          let end = node_range.end.min(bytes.end);
          if start < end {
            out.push(NamedRange::new(
              name,
              self.text.byte_to_char(start)..self.text.byte_to_char(end),
            ));
          }
        });
      }
      for &child in layer.children.iter().rev() {
        let child_range = self.layers[child].tree.range();
        if child_range.start < bytes.end && child_range.end > bytes.start {
          stack.push(child);
        }
      }
    }
    Ok(out)
  }
}

/// One pass of re-parsing over the layer arena.
struct LayerParser<'a> {
  layers:   &'a mut SlotMap<LayerId, LayerData>,
  loader:   &'a Loader,
  options:  &'a ParseOptions,
  source:   &'a str,
  deadline: Option<Instant>,
  stats:    &'a mut ParseStats,
  /// Byte ranges whose structure was rebuilt.
  changed:  Vec<Range<usize>>,
}

impl LayerParser<'_> {
  fn reparse(&mut self, id: LayerId) -> std::result::Result<(), Timeout> {
    let Some(layer) = self.layers.get_mut(id) else {
      return Ok(());
    };
    let grammar = layer.config.grammar.clone();
    let depth = layer.depth;
    let region = layer
      .tree
      .reparse(&*grammar, self.source, self.deadline, self.stats)?;

    if let Some(region) = region {
      self.stats.layers_parsed += 1;
      self.changed.push(region.clone());
      if self.options.injections && depth < self.options.max_injection_depth {
        let injections = layer.tree.injections(&*grammar, self.source, region.clone());
        self.diff_children(id, region, injections);
      }
    }

    let children = self.layers[id].children.clone();
    for child in children {
      if self.layers[child].tree.is_dirty() {
        self.reparse(child)?;
      }
    }
    Ok(())
  }

  /// Replaces the children of `parent` that lie inside `region` with layers
  /// for `injections`, keeping those whose language and range still match.
  fn diff_children(&mut self, parent: LayerId, region: Range<usize>, injections: Vec<Injection>) {
    let depth = self.layers[parent].depth + 1;
    let (mut stale, mut children): (Vec<LayerId>, Vec<LayerId>) = self.layers[parent]
      .children
      .iter()
      .copied()
      .partition(|&child| {
        let range = self.layers[child].tree.range();
        range.start >= region.start && range.end <= region.end
      });

    for injection in injections {
      if injection.range.is_empty() {
        continue;
      }
      let Some(config) = self.loader.language_for_name(&injection.language) else {
        tracing::trace!(language = %injection.language, "no grammar for injection");
        continue;
      };
      let existing = stale.iter().position(|&child| {
        let layer = &self.layers[child];
        Arc::ptr_eq(&layer.config, &config) && layer.tree.range() == injection.range
      });
      let id = match existing {
        Some(idx) => stale.swap_remove(idx),
        None => {
          self.layers.insert(LayerData {
            config,
            parent: Some(parent),
            depth,
            tree: Tree::unparsed(injection.range),
            children: Vec::new(),
          })
        },
      };
      children.push(id);
    }

    for child in stale {
      remove_layer(self.layers, child);
    }
    children.sort_by_key(|&child| self.layers[child].tree.range().start);
    self.layers[parent].children = children;
  }
}

fn remove_layer(layers: &mut SlotMap<LayerId, LayerData>, id: LayerId) {
  if let Some(layer) = layers.remove(id) {
    for child in layer.children {
      remove_layer(layers, child);
    }
  }
}

/// Called with the ranges an edit or parse made stale.
pub type InvalidationHandler = Arc<dyn Fn(InvalidationSet) + Send + Sync>;

/// Shared handle to a [`SyntaxTree`].
///
/// Updates are serialized by the inner lock, so an edit is fully absorbed
/// before the next one starts. The invalidation handler runs after the lock
/// is released and may call back into the state.
#[derive(Clone)]
pub struct SyntaxState {
  inner: Arc<SyntaxStateInner>,
}

struct SyntaxStateInner {
  syntax:  Mutex<SyntaxTree>,
  /// Bumped after every successful update.
  version: AtomicU64,
  handler: Mutex<Option<InvalidationHandler>>,
}

impl fmt::Debug for SyntaxState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SyntaxState")
      .field("version", &self.inner.version.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl SyntaxState {
  pub fn new(syntax: SyntaxTree) -> Self {
    Self {
      inner: Arc::new(SyntaxStateInner {
        syntax:  Mutex::new(syntax),
        version: AtomicU64::new(0),
        handler: Mutex::new(None),
      }),
    }
  }

  pub fn set_invalidation_handler(&self, handler: impl Fn(InvalidationSet) + Send + Sync + 'static) {
    *self.inner.handler.lock() = Some(Arc::new(handler));
  }

  pub fn parse(&self) -> Result<()> {
    let set = self.inner.syntax.lock().parse()?;
    self.updated(set);
    Ok(())
  }

  pub fn replace_content(&self, text: &str) -> Result<()> {
    let set = self.inner.syntax.lock().replace_content(text)?;
    self.updated(set);
    Ok(())
  }

  pub fn apply_edit(&self, edit: &EditRecord, text: &str) -> Result<()> {
    let set = self.inner.syntax.lock().apply_edit(edit, text)?;
    self.updated(set);
    Ok(())
  }

  pub fn highlights(&self, range: Range<usize>) -> Result<Vec<NamedRange>> {
    self.inner.syntax.lock().highlights(range)
  }

  pub fn version(&self) -> u64 {
    self.inner.version.load(Ordering::Acquire)
  }

  /// Direct access to the tree. Do not hold the guard across an update.
  pub fn syntax(&self) -> MutexGuard<'_, SyntaxTree> {
    self.inner.syntax.lock()
  }

  pub fn downgrade(&self) -> WeakSyntaxState {
    WeakSyntaxState {
      inner: Arc::downgrade(&self.inner),
    }
  }

  fn updated(&self, set: InvalidationSet) {
    self.inner.version.fetch_add(1, Ordering::AcqRel);
    let handler = self.inner.handler.lock().clone();
    if let Some(handler) = handler
      && !set.is_empty()
    {
      handler(set);
    }
  }
}

/// A reference that does not keep the syntax state alive.
#[derive(Clone, Default)]
pub struct WeakSyntaxState {
  inner: Weak<SyntaxStateInner>,
}

impl fmt::Debug for WeakSyntaxState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WeakSyntaxState")
      .field("alive", &(self.inner.strong_count() > 0))
      .finish()
  }
}

impl WeakSyntaxState {
  pub fn upgrade(&self) -> Option<SyntaxState> {
    self.inner.upgrade().map(|inner| SyntaxState { inner })
  }
}
