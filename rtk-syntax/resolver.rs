//! Token resolution: character range in, named spans out.
//!
//! Resolvers run on worker contexts, so everything they touch is reached
//! through weak references and an abandoned document shows up as
//! [`ResolveError::StateInvalid`] instead of keeping it alive.

use std::{
  borrow::Cow,
  ops::Range,
  sync::{
    Arc,
    Weak,
  },
};

use futures_util::{
  FutureExt,
  future::BoxFuture,
};
use regex::Regex;
use rtk_event::TaskHandle;
use thiserror::Error;

use crate::{
  buffer::HostBuffer,
  syntax::{
    NamedRange,
    SyntaxError,
    SyntaxState,
    WeakSyntaxState,
  },
};

/// How a token application treats the parts of its range no token covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenAction {
  /// Uncovered text goes back to base attributes.
  #[default]
  Replace,
  /// Uncovered text keeps whatever it has.
  Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenApplication {
  pub tokens:  Vec<NamedRange>,
  pub action:  TokenAction,
  /// The requested range.
  pub range:   Range<usize>,
  /// Version of the source the tokens were computed from.
  pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
  #[error("the document this resolver served has been torn down")]
  StateInvalid,
  #[error("token request was canceled")]
  Canceled,
  #[error(transparent)]
  Syntax(#[from] SyntaxError),
}

pub type ResolveFuture = BoxFuture<'static, Result<TokenApplication, ResolveError>>;

pub trait TokenResolver: Send + Sync {
  /// Resolves the tokens of `range`. Implementations check `handle` before
  /// doing any work.
  fn resolve(&self, range: Range<usize>, handle: TaskHandle) -> ResolveFuture;
}

/// Tokens from the parse tree's highlight captures.
#[derive(Debug, Clone)]
pub struct SyntaxTokenResolver {
  state: WeakSyntaxState,
}

impl SyntaxTokenResolver {
  pub fn new(state: &SyntaxState) -> Self {
    Self {
      state: state.downgrade(),
    }
  }
}

impl TokenResolver for SyntaxTokenResolver {
  fn resolve(&self, range: Range<usize>, handle: TaskHandle) -> ResolveFuture {
    let state = self.state.clone();
    async move {
      if handle.is_canceled() {
        return Err(ResolveError::Canceled);
      }
      let state = state.upgrade().ok_or(ResolveError::StateInvalid)?;
      let (tokens, version) = {
        let syntax = state.syntax();
        (syntax.highlights(range.clone())?, syntax.version())
      };
      Ok(TokenApplication {
        tokens,
        action: TokenAction::Replace,
        range,
        version,
      })
    }
    .boxed()
  }
}

/// Names every match of `regex` with `name`.
#[derive(Debug, Clone)]
pub struct PatternRule {
  pub regex: Regex,
  pub name:  Cow<'static, str>,
}

impl PatternRule {
  pub fn new(pattern: &str, name: impl Into<Cow<'static, str>>) -> Result<Self, regex::Error> {
    Ok(Self {
      regex: Regex::new(pattern)?,
      name:  name.into(),
    })
  }
}

/// Tokens from regular expressions run over the buffer text.
#[derive(Clone)]
pub struct PatternTokenResolver {
  rules:  Arc<[PatternRule]>,
  buffer: Weak<dyn HostBuffer>,
  action: TokenAction,
}

impl PatternTokenResolver {
  pub fn new(buffer: &Arc<dyn HostBuffer>, rules: Vec<PatternRule>) -> Self {
    Self {
      rules:  rules.into(),
      buffer: Arc::downgrade(buffer),
      action: TokenAction::Replace,
    }
  }

  pub fn with_action(mut self, action: TokenAction) -> Self {
    self.action = action;
    self
  }
}

impl TokenResolver for PatternTokenResolver {
  fn resolve(&self, range: Range<usize>, handle: TaskHandle) -> ResolveFuture {
    let rules = self.rules.clone();
    let buffer = self.buffer.clone();
    let action = self.action;
    async move {
      if handle.is_canceled() {
        return Err(ResolveError::Canceled);
      }
      let buffer = buffer.upgrade().ok_or(ResolveError::StateInvalid)?;
      let len = buffer.len_chars();
      let range = range.start.min(len)..range.end.min(len);
      let text = buffer.substring(range.clone());

      let mut tokens = Vec::new();
      for rule in rules.iter() {
        // matches come in order, so byte offsets convert incrementally
        let (mut byte, mut at) = (0, range.start);
        for found in rule.regex.find_iter(&text) {
          if found.is_empty() {
            continue;
          }
          at += text[byte..found.start()].chars().count();
          let start = at;
          at += found.as_str().chars().count();
          byte = found.end();
          tokens.push(NamedRange::new(rule.name.clone(), start..at));
        }
      }
      Ok(TokenApplication {
        tokens,
        action,
        range,
        version: 0,
      })
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use futures_executor::block_on;
  use ropey::Rope;

  use super::*;
  use crate::{
    buffer::SharedText,
    syntax::{
      ParseOptions,
      SyntaxTree,
      grammar::Loader,
    },
  };

  fn state(text: &str) -> SyntaxState {
    let state = SyntaxState::new(SyntaxTree::new(
      Rope::from_str(text),
      Arc::new(Loader::markdown()),
      ParseOptions::default(),
    ));
    state.parse().unwrap();
    state
  }

  #[test]
  fn syntax_tokens_for_range() {
    let state = state("# Title\n");
    let resolver = SyntaxTokenResolver::new(&state);
    let app = block_on(resolver.resolve(0..8, TaskHandle::new())).unwrap();
    assert_eq!(app.action, TokenAction::Replace);
    assert_eq!(app.range, 0..8);
    assert_eq!(app.tokens, vec![
      NamedRange::new("punctuation.special", 0..1),
      NamedRange::new("text.title", 2..7),
    ]);
  }

  #[test]
  fn dropped_state_is_invalid() {
    let resolver = SyntaxTokenResolver::new(&state("text"));
    assert_eq!(
      block_on(resolver.resolve(0..4, TaskHandle::new())),
      Err(ResolveError::StateInvalid)
    );
  }

  #[test]
  fn canceled_handle_short_circuits() {
    let state = state("text");
    let resolver = SyntaxTokenResolver::new(&state);
    let handle = TaskHandle::new();
    handle.cancel();
    assert_eq!(
      block_on(resolver.resolve(0..4, handle)),
      Err(ResolveError::Canceled)
    );
  }

  #[test]
  fn unparsed_state_reports_no_root() {
    let state = SyntaxState::new(SyntaxTree::new(
      Rope::from_str("text"),
      Arc::new(Loader::markdown()),
      ParseOptions::default(),
    ));
    let resolver = SyntaxTokenResolver::new(&state);
    assert_eq!(
      block_on(resolver.resolve(0..4, TaskHandle::new())),
      Err(ResolveError::Syntax(SyntaxError::NoRootNode))
    );
  }

  #[test]
  fn pattern_tokens_use_char_offsets() {
    let buffer: Arc<dyn HostBuffer> = Arc::new(SharedText::new("héllo wörld  x"));
    let rule = PatternRule::new(r"[^\s]+\s{0,1}", "paintItBlack").unwrap();
    let resolver = PatternTokenResolver::new(&buffer, vec![rule]);
    let app = block_on(resolver.resolve(0..100, TaskHandle::new())).unwrap();
    let ranges: Vec<_> = app.tokens.iter().map(|t| t.range.clone()).collect();
    assert_eq!(ranges, vec![0..6, 6..12, 13..14]);
    assert_eq!(app.range, 0..14);

    let app = block_on(resolver.resolve(6..11, TaskHandle::new())).unwrap();
    assert_eq!(app.tokens, vec![NamedRange::new("paintItBlack", 6..11)]);
  }

  #[test]
  fn pattern_resolver_outlived_by_buffer() {
    let buffer: Arc<dyn HostBuffer> = Arc::new(SharedText::new("abc"));
    let resolver = PatternTokenResolver::new(&buffer, Vec::new());
    drop(buffer);
    assert_eq!(
      block_on(resolver.resolve(0..3, TaskHandle::new())),
      Err(ResolveError::StateInvalid)
    );
  }
}
