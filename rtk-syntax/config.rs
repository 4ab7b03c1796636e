//! TOML configuration: parse budget, code languages, theme and pattern rules.
//!
//! ```toml
//! parse-timeout-ms = 250
//! root-language = "markdown"
//!
//! [[language]]
//! name = "rust"
//! aliases = ["rs"]
//! keywords = ["fn", "let", "match"]
//! line-comment = "//"
//!
//! [theme]
//! "text.title" = { bold = true, scale = 150 }
//! "keyword" = { foreground = "#af52de" }
//!
//! [[pattern]]
//! regex = "TODO"
//! name = "comment"
//! ```

use std::{
  collections::BTreeMap,
  path::Path,
  time::Duration,
};

use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;

use crate::{
  resolver::PatternRule,
  style::{
    AttributeSet,
    StyleError,
    StyleMap,
  },
  syntax::{
    MAX_INJECTION_DEPTH,
    PARSE_TIMEOUT,
    ParseOptions,
    code::CodeGrammar,
    grammar::Loader,
  },
};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config: {0}")]
  Io(#[from] std::io::Error),
  #[error("invalid config: {0}")]
  Toml(#[from] toml::de::Error),
  #[error(transparent)]
  Style(#[from] StyleError),
  #[error("invalid pattern '{pattern}': {source}")]
  Pattern {
    pattern: String,
    #[source]
    source:  regex::Error,
  },
  #[error("root language '{0}' has no grammar")]
  UnknownRootLanguage(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
  pub parse_timeout_ms:    u64,
  pub injections:          bool,
  pub max_injection_depth: usize,
  pub root_language:       String,
  #[serde(rename = "language")]
  pub languages:           Vec<LanguageConfig>,
  /// Scope name to attributes, replacing the default style of that scope.
  pub theme:               BTreeMap<String, AttributeSet>,
  #[serde(rename = "pattern")]
  pub patterns:            Vec<PatternConfig>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      parse_timeout_ms:    PARSE_TIMEOUT.as_millis() as u64,
      injections:          true,
      max_injection_depth: MAX_INJECTION_DEPTH,
      root_language:       "markdown".to_string(),
      languages:           Vec::new(),
      theme:               BTreeMap::new(),
      patterns:            Vec::new(),
    }
  }
}

/// A keyword/comment/string line grammar for fenced code blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LanguageConfig {
  pub name:              String,
  #[serde(default)]
  pub aliases:           Vec<String>,
  #[serde(default)]
  pub keywords:          Vec<String>,
  #[serde(default)]
  pub line_comment:      Option<String>,
  #[serde(default = "default_string_delimiters")]
  pub string_delimiters: Vec<char>,
}

fn default_string_delimiters() -> Vec<char> {
  vec!['"']
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternConfig {
  pub regex: String,
  pub name:  String,
}

impl Config {
  pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(source)?)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let source = std::fs::read_to_string(path)?;
    Self::from_toml(&source)
  }

  pub fn parse_options(&self) -> ParseOptions {
    ParseOptions {
      timeout:             Duration::from_millis(self.parse_timeout_ms),
      injections:          self.injections,
      max_injection_depth: self.max_injection_depth,
    }
  }

  /// The markdown grammars plus every configured code language.
  pub fn loader(&self) -> Result<Loader, ConfigError> {
    let mut loader = Loader::markdown();
    for language in &self.languages {
      let grammar = CodeGrammar::new(
        language.keywords.iter().cloned(),
        language.line_comment.as_deref(),
        language.string_delimiters.iter().copied(),
      );
      loader.register_code(&language.name, grammar);
      for alias in &language.aliases {
        loader.alias(alias, &language.name);
      }
    }
    loader.set_root(&self.root_language);
    if loader.root_language().is_none() {
      return Err(ConfigError::UnknownRootLanguage(self.root_language.clone()));
    }
    Ok(loader)
  }

  pub fn style_map(&self) -> Result<StyleMap, ConfigError> {
    Ok(StyleMap::from_theme(&self.theme)?)
  }

  pub fn pattern_rules(&self) -> Result<Vec<PatternRule>, ConfigError> {
    self
      .patterns
      .iter()
      .map(|pattern| {
        PatternRule::new(&pattern.regex, pattern.name.clone()).map_err(|source| {
          ConfigError::Pattern {
            pattern: pattern.regex.clone(),
            source,
          }
        })
      })
      .collect()
  }
}
