use std::{
  collections::HashMap,
  fmt,
  ops::Range,
  sync::Arc,
};

use super::{
  code::CodeGrammar,
  inline::InlineGrammar,
  markdown::MarkdownGrammar,
  tree::Node,
};

pub const MARKDOWN: &str = "markdown";
pub const MARKDOWN_INLINE: &str = "markdown_inline";

/// A unit-at-a-time parser plus its highlight and injection queries.
pub trait Grammar: fmt::Debug + Send + Sync {
  /// Parses the unit starting at `start`. The returned node uses absolute
  /// byte ranges, starts at `start` and ends after it, never past `end`.
  fn parse_unit(&self, source: &str, start: usize, end: usize) -> Node;

  /// Capture name for a node kind, if nodes of that kind are highlighted.
  fn capture(&self, kind: &str) -> Option<&'static str>;

  /// Pushes the nested-language regions found in `unit`, whose ranges are
  /// relative to `offset`.
  fn injections(&self, unit: &Node, offset: usize, source: &str, out: &mut Vec<Injection>);
}

/// A nested layer activation point: a language name and the absolute byte
/// range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
  pub language: String,
  pub range:    Range<usize>,
}

#[derive(Debug)]
pub struct LayerConfiguration {
  pub name:    String,
  pub grammar: Arc<dyn Grammar>,
}

impl LayerConfiguration {
  pub fn new(name: impl Into<String>, grammar: impl Grammar + 'static) -> Self {
    Self {
      name:    name.into(),
      grammar: Arc::new(grammar),
    }
  }
}

/// Name to grammar lookup. Names and aliases are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct Loader {
  root:      String,
  languages: HashMap<String, Arc<LayerConfiguration>>,
  aliases:   HashMap<String, String>,
}

impl Loader {
  pub fn new(root: impl Into<String>) -> Self {
    Self {
      root:      root.into().to_ascii_lowercase(),
      languages: HashMap::new(),
      aliases:   HashMap::new(),
    }
  }

  /// Block and inline markdown, with markdown as the root language.
  pub fn markdown() -> Self {
    let mut loader = Self::new(MARKDOWN);
    loader.register(LayerConfiguration::new(MARKDOWN, MarkdownGrammar));
    loader.register(LayerConfiguration::new(MARKDOWN_INLINE, InlineGrammar));
    loader.alias("md", MARKDOWN);
    loader
  }

  pub fn register(&mut self, config: LayerConfiguration) -> Arc<LayerConfiguration> {
    let config = Arc::new(config);
    self
      .languages
      .insert(config.name.to_ascii_lowercase(), config.clone());
    config
  }

  pub fn register_code(&mut self, name: &str, grammar: CodeGrammar) -> Arc<LayerConfiguration> {
    self.register(LayerConfiguration::new(name, grammar))
  }

  pub fn alias(&mut self, alias: &str, name: &str) {
    self
      .aliases
      .insert(alias.to_ascii_lowercase(), name.to_ascii_lowercase());
  }

  pub fn set_root(&mut self, name: &str) {
    self.root = name.to_ascii_lowercase();
  }

  pub fn root_name(&self) -> &str {
    &self.root
  }

  pub fn root_language(&self) -> Option<Arc<LayerConfiguration>> {
    self.language_for_name(&self.root)
  }

  /// Unknown names are not an error, the caller just skips that layer.
  pub fn language_for_name(&self, name: &str) -> Option<Arc<LayerConfiguration>> {
    let name = name.trim().to_ascii_lowercase();
    let name = self.aliases.get(&name).unwrap_or(&name);
    self.languages.get(name).cloned()
  }

  pub fn languages(&self) -> impl Iterator<Item = &str> {
    self.languages.values().map(|config| config.name.as_str())
  }
}

impl Default for Loader {
  fn default() -> Self {
    Self::markdown()
  }
}
