//! Token names to visual attributes.
//!
//! Grammars emit dotted scope names (`text.title`, `punctuation.delimiter`,
//! ...). Styling works on the closed [`TokenKind`] set instead: a name is
//! matched exactly, then by its longest dotted prefix, and anything left over
//! is [`TokenKind::Plain`], which maps to the base attributes. The table is
//! validated once when a [`StyleMap`] is built, lookups are pure.

use std::{
  collections::{
    BTreeMap,
    HashSet,
  },
  fmt,
  str::FromStr,
};

use parking_lot::Mutex;
use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StyleError {
  #[error("unknown theme scope '{0}'")]
  UnknownScope(String),
  #[error("invalid color '{0}', expected '#rrggbb' or a color name")]
  InvalidColor(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
  pub r: u8,
  pub g: u8,
  pub b: u8,
}

impl Color {
  pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
    Self { r, g, b }
  }

  pub const BLACK: Self = Self::rgb(0x00, 0x00, 0x00);
  pub const BLUE: Self = Self::rgb(0x00, 0x7a, 0xff);
  pub const GRAY: Self = Self::rgb(0x8e, 0x8e, 0x93);
  pub const GREEN: Self = Self::rgb(0x34, 0xc7, 0x59);
  pub const ORANGE: Self = Self::rgb(0xff, 0x95, 0x00);
  pub const PURPLE: Self = Self::rgb(0xaf, 0x52, 0xde);
  pub const RED: Self = Self::rgb(0xff, 0x3b, 0x30);
  pub const WHITE: Self = Self::rgb(0xff, 0xff, 0xff);
}

impl FromStr for Color {
  type Err = StyleError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let named = match s {
      "black" => Some(Self::BLACK),
      "blue" => Some(Self::BLUE),
      "gray" | "grey" => Some(Self::GRAY),
      "green" => Some(Self::GREEN),
      "orange" => Some(Self::ORANGE),
      "purple" => Some(Self::PURPLE),
      "red" => Some(Self::RED),
      "white" => Some(Self::WHITE),
      _ => None,
    };
    if let Some(color) = named {
      return Ok(color);
    }

    let invalid = || StyleError::InvalidColor(s.to_string());
    let hex = s.strip_prefix('#').ok_or_else(invalid)?;
    if hex.len() != 6 || !hex.is_ascii() {
      return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
  }
}

impl TryFrom<String> for Color {
  type Error = StyleError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Color> for String {
  fn from(color: Color) -> Self {
    color.to_string()
  }
}

impl fmt::Display for Color {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
  }
}

/// Visual attributes for a span of text. Unset fields leave whatever is
/// underneath; the all-unset value is the base style.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AttributeSet {
  pub foreground: Option<Color>,
  pub background: Option<Color>,
  pub bold:       Option<bool>,
  pub italic:     Option<bool>,
  pub underline:  Option<bool>,
  pub monospace:  Option<bool>,
  pub link:       Option<bool>,
  /// Font size relative to the base font, in percent.
  pub scale:      Option<u16>,
}

impl AttributeSet {
  pub fn base() -> Self {
    Self::default()
  }

  pub fn is_base(&self) -> bool {
    *self == Self::default()
  }

  /// Applies the fields set in `other` on top of `self`.
  pub fn merge(&mut self, other: &AttributeSet) {
    macro_rules! take {
      ($($field:ident),*) => {
        $(if other.$field.is_some() {
          self.$field = other.$field;
        })*
      };
    }
    take!(
      foreground, background, bold, italic, underline, monospace, link, scale
    );
  }

  pub fn overlay(&self, other: &AttributeSet) -> AttributeSet {
    let mut merged = self.clone();
    merged.merge(other);
    merged
  }

  fn with_foreground(mut self, color: Color) -> Self {
    self.foreground = Some(color);
    self
  }
}

const KIND_COUNT: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
  Title,
  Emphasis,
  Strong,
  Literal,
  Uri,
  Reference,
  Escape,
  Delimiter,
  Special,
  Label,
  Keyword,
  String,
  Comment,
  Number,
  Plain,
}

impl TokenKind {
  pub const ALL: [TokenKind; KIND_COUNT] = [
    TokenKind::Title,
    TokenKind::Emphasis,
    TokenKind::Strong,
    TokenKind::Literal,
    TokenKind::Uri,
    TokenKind::Reference,
    TokenKind::Escape,
    TokenKind::Delimiter,
    TokenKind::Special,
    TokenKind::Label,
    TokenKind::Keyword,
    TokenKind::String,
    TokenKind::Comment,
    TokenKind::Number,
    TokenKind::Plain,
  ];

  pub const fn scope(self) -> &'static str {
    match self {
      TokenKind::Title => "text.title",
      TokenKind::Emphasis => "text.emphasis",
      TokenKind::Strong => "text.strong",
      TokenKind::Literal => "text.literal",
      TokenKind::Uri => "text.uri",
      TokenKind::Reference => "text.reference",
      TokenKind::Escape => "string.escape",
      TokenKind::Delimiter => "punctuation.delimiter",
      TokenKind::Special => "punctuation.special",
      TokenKind::Label => "label",
      TokenKind::Keyword => "keyword",
      TokenKind::String => "string",
      TokenKind::Comment => "comment",
      TokenKind::Number => "number",
      TokenKind::Plain => "text",
    }
  }

  /// Exact scope, or the longest dotted prefix that is one, otherwise
  /// [`TokenKind::Plain`].
  pub fn from_name(name: &str) -> TokenKind {
    let mut candidate = name;
    loop {
      if let Some(kind) = Self::from_scope(candidate) {
        return kind;
      }
      match candidate.rfind('.') {
        Some(dot) => candidate = &candidate[..dot],
        None => return TokenKind::Plain,
      }
    }
  }

  pub fn from_scope(scope: &str) -> Option<TokenKind> {
    Self::ALL.into_iter().find(|kind| kind.scope() == scope)
  }

  const fn index(self) -> usize {
    self as usize
  }
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.scope())
  }
}

/// Receives the token names the highlighter styles. Must not influence
/// styling.
pub trait DiagnosticsSink: Send + Sync {
  fn token_observed(&self, name: &str, kind: TokenKind);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
  fn token_observed(&self, _name: &str, _kind: TokenKind) {}
}

/// Collects distinct token names and logs each one the first time it shows
/// up.
#[derive(Debug, Default)]
pub struct SeenTokenNames {
  names: Mutex<HashSet<String>>,
}

impl SeenTokenNames {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<_> = self.names.lock().iter().cloned().collect();
    names.sort_unstable();
    names
  }

  pub fn contains(&self, name: &str) -> bool {
    self.names.lock().contains(name)
  }
}

impl DiagnosticsSink for SeenTokenNames {
  fn token_observed(&self, name: &str, kind: TokenKind) {
    let mut names = self.names.lock();
    if names.contains(name) {
      return;
    }
    names.insert(name.to_string());
    if kind == TokenKind::Plain && name != TokenKind::Plain.scope() {
      tracing::debug!(name, "new token name has no style, using base attributes");
    } else {
      tracing::debug!(name, %kind, "new token name");
    }
  }
}

/// One attribute set per [`TokenKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleMap {
  table: [AttributeSet; KIND_COUNT],
}

impl Default for StyleMap {
  fn default() -> Self {
    let mut map = Self::empty();
    let link = AttributeSet {
      link: Some(true),
      ..AttributeSet::base()
    };
    map.set(
      TokenKind::Literal,
      AttributeSet::base().with_foreground(Color::BLUE),
    );
    map.set(
      TokenKind::Delimiter,
      AttributeSet::base().with_foreground(Color::GRAY),
    );
    map.set(TokenKind::Emphasis, AttributeSet {
      italic: Some(true),
      ..AttributeSet::base()
    });
    map.set(TokenKind::Strong, AttributeSet {
      bold: Some(true),
      ..AttributeSet::base()
    });
    map.set(TokenKind::Uri, link);
    map.set(TokenKind::Reference, AttributeSet {
      underline: Some(true),
      ..AttributeSet::base()
    });
    map.set(
      TokenKind::Escape,
      AttributeSet::base().with_foreground(Color::PURPLE),
    );
    // 16pt over a 12pt body font
    map.set(TokenKind::Title, AttributeSet {
      bold: Some(true),
      scale: Some(133),
      ..AttributeSet::base()
    });
    map.set(
      TokenKind::Special,
      AttributeSet::base().with_foreground(Color::ORANGE),
    );
    map.set(
      TokenKind::Label,
      AttributeSet::base().with_foreground(Color::GRAY),
    );
    map.set(
      TokenKind::Keyword,
      AttributeSet::base().with_foreground(Color::PURPLE),
    );
    map.set(
      TokenKind::String,
      AttributeSet::base().with_foreground(Color::RED),
    );
    map.set(
      TokenKind::Comment,
      AttributeSet::base().with_foreground(Color::GREEN),
    );
    map.set(
      TokenKind::Number,
      AttributeSet::base().with_foreground(Color::BLUE),
    );
    map
  }
}

impl StyleMap {
  /// Every kind maps to the base attributes.
  pub fn empty() -> Self {
    Self {
      table: std::array::from_fn(|_| AttributeSet::base()),
    }
  }

  /// The default table with the given scopes replaced. Keys must be scope
  /// names of a [`TokenKind`].
  pub fn from_theme(theme: &BTreeMap<String, AttributeSet>) -> Result<Self, StyleError> {
    let mut map = Self::default();
    for (scope, attrs) in theme {
      let kind =
        TokenKind::from_scope(scope).ok_or_else(|| StyleError::UnknownScope(scope.clone()))?;
      map.set(kind, attrs.clone());
    }
    Ok(map)
  }

  pub fn set(&mut self, kind: TokenKind, attrs: AttributeSet) {
    self.table[kind.index()] = attrs;
  }

  pub fn attributes(&self, kind: TokenKind) -> &AttributeSet {
    &self.table[kind.index()]
  }

  pub fn attributes_for_name(&self, name: &str) -> (TokenKind, &AttributeSet) {
    let kind = TokenKind::from_name(name);
    (kind, self.attributes(kind))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_resolve_by_longest_prefix() {
    assert_eq!(TokenKind::from_name("text.title"), TokenKind::Title);
    assert_eq!(TokenKind::from_name("string.escape.unicode"), TokenKind::Escape);
    assert_eq!(TokenKind::from_name("string.quoted"), TokenKind::String);
    assert_eq!(TokenKind::from_name("keyword.control"), TokenKind::Keyword);
    assert_eq!(TokenKind::from_name("markup.heading"), TokenKind::Plain);
    assert_eq!(TokenKind::from_name("paintItBlack"), TokenKind::Plain);
    assert_eq!(TokenKind::from_name(""), TokenKind::Plain);
  }

  #[test]
  fn every_kind_round_trips_through_its_scope() {
    for kind in TokenKind::ALL {
      assert_eq!(TokenKind::from_name(kind.scope()), kind);
    }
  }

  #[test]
  fn unknown_names_map_to_base() {
    let styles = StyleMap::default();
    let (kind, attrs) = styles.attributes_for_name("not.a.scope");
    assert_eq!(kind, TokenKind::Plain);
    assert!(attrs.is_base());
  }

  #[test]
  fn default_table_matches_markdown_styles() {
    let styles = StyleMap::default();
    assert_eq!(
      styles.attributes(TokenKind::Literal).foreground,
      Some(Color::BLUE)
    );
    assert_eq!(styles.attributes(TokenKind::Emphasis).italic, Some(true));
    assert_eq!(styles.attributes(TokenKind::Strong).bold, Some(true));
    assert_eq!(styles.attributes(TokenKind::Title).scale, Some(133));
    assert_eq!(styles.attributes(TokenKind::Uri).link, Some(true));
    assert!(styles.attributes(TokenKind::Plain).is_base());
  }

  #[test]
  fn theme_rejects_unknown_scopes() {
    let mut theme = BTreeMap::new();
    theme.insert("markup.heading".to_string(), AttributeSet::base());
    assert_eq!(
      StyleMap::from_theme(&theme),
      Err(StyleError::UnknownScope("markup.heading".into()))
    );

    let mut theme = BTreeMap::new();
    theme.insert("text.emphasis".to_string(), AttributeSet {
      underline: Some(true),
      ..AttributeSet::base()
    });
    let styles = StyleMap::from_theme(&theme).unwrap();
    assert_eq!(styles.attributes(TokenKind::Emphasis).italic, None);
    assert_eq!(styles.attributes(TokenKind::Emphasis).underline, Some(true));
  }

  #[test]
  fn colors_parse_hex_and_names() {
    assert_eq!("#ff9500".parse::<Color>(), Ok(Color::ORANGE));
    assert_eq!("gray".parse::<Color>(), Ok(Color::GRAY));
    assert!("#ff95".parse::<Color>().is_err());
    assert!("ff9500".parse::<Color>().is_err());
    assert_eq!(Color::PURPLE.to_string(), "#af52de");
  }

  #[test]
  fn merge_overrides_only_set_fields() {
    let mut attrs = AttributeSet {
      bold: Some(true),
      foreground: Some(Color::RED),
      ..AttributeSet::base()
    };
    attrs.merge(&AttributeSet {
      foreground: Some(Color::BLUE),
      ..AttributeSet::base()
    });
    assert_eq!(attrs.bold, Some(true));
    assert_eq!(attrs.foreground, Some(Color::BLUE));
  }

  #[test]
  fn seen_names_do_not_change_lookup() {
    let styles = StyleMap::default();
    let seen = SeenTokenNames::new();
    let before = styles.attributes_for_name("text.strong").1.clone();
    seen.token_observed("text.strong", TokenKind::Strong);
    seen.token_observed("text.strong", TokenKind::Strong);
    assert_eq!(styles.attributes_for_name("text.strong").1, &before);
    assert_eq!(seen.names(), vec!["text.strong".to_string()]);
  }
}
