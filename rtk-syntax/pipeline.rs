//! One document's highlighting session: edit tracking, parse tree and
//! highlighter wired to a host buffer.

use std::{
  ops::Range,
  sync::Arc,
};

use ropey::Rope;
use rtk_event::{
  Executor,
  Scheduler,
};
use thiserror::Error;

use crate::{
  buffer::HostBuffer,
  edit::{
    ContentChange,
    EditError,
    EditTracker,
  },
  highlighter::{
    Highlighter,
    TextTarget,
  },
  resolver::SyntaxTokenResolver,
  style::{
    DiagnosticsSink,
    NullDiagnostics,
    StyleMap,
  },
  syntax::{
    ParseOptions,
    SyntaxError,
    SyntaxState,
    SyntaxTree,
    grammar::Loader,
  },
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Edit(#[from] EditError),
  #[error(transparent)]
  Syntax(#[from] SyntaxError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug)]
pub struct Pipeline {
  buffer:      Arc<dyn HostBuffer>,
  loader:      Arc<Loader>,
  options:     ParseOptions,
  tracker:     EditTracker,
  syntax:      SyntaxState,
  highlighter: Highlighter,
}

impl Pipeline {
  /// Builds the session over the current buffer contents and parses it. The
  /// parse invalidates the whole document, the first styling happens on the
  /// next scheduler turn.
  pub fn new(
    buffer: Arc<dyn HostBuffer>,
    loader: Arc<Loader>,
    styles: StyleMap,
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn Executor>,
    options: ParseOptions,
  ) -> Result<Self> {
    Self::with_diagnostics(
      buffer,
      loader,
      styles,
      scheduler,
      executor,
      options,
      Arc::new(NullDiagnostics),
    )
  }

  pub fn with_diagnostics(
    buffer: Arc<dyn HostBuffer>,
    loader: Arc<Loader>,
    styles: StyleMap,
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn Executor>,
    options: ParseOptions,
    diagnostics: Arc<dyn DiagnosticsSink>,
  ) -> Result<Self> {
    let len = buffer.len_chars();
    let syntax = new_syntax(&*buffer, &loader, &options);
    let highlighter = Highlighter::new(
      buffer.clone(),
      Arc::new(SyntaxTokenResolver::new(&syntax)),
      styles,
      diagnostics,
      scheduler,
      executor,
    );
    connect(&syntax, &highlighter);
    syntax.parse()?;
    Ok(Self {
      buffer,
      loader,
      options,
      tracker: EditTracker::new(len),
      syntax,
      highlighter,
    })
  }

  pub fn syntax(&self) -> &SyntaxState {
    &self.syntax
  }

  pub fn highlighter(&self) -> &Highlighter {
    &self.highlighter
  }

  pub fn buffer(&self) -> &Arc<dyn HostBuffer> {
    &self.buffer
  }

  pub fn tracker(&self) -> &EditTracker {
    &self.tracker
  }

  /// The host is about to replace `range`.
  pub fn will_change(&mut self, range: Range<usize>) -> Result<()> {
    if let Err(err) = self.tracker.will_change(range) {
      self.recover(&err);
      return Err(err.into());
    }
    Ok(())
  }

  /// The host replaced `change.range` with `change.text`.
  pub fn did_change(&mut self, change: &ContentChange) -> Result<()> {
    let edit = match self.tracker.did_change(change) {
      Ok(edit) => edit,
      Err(err) => {
        self.recover(&err);
        return Err(err.into());
      },
    };
    self.highlighter.did_change_content(&edit);
    let result = self.syntax.apply_edit(&edit, &change.text);
    self.parsed(result)
  }

  /// Re-reads the whole buffer, for hosts that swap the text out wholesale.
  pub fn replace_content(&mut self) -> Result<()> {
    let len = self.buffer.len_chars();
    let text = self.buffer.substring(0..len);
    self.tracker.reset(len);
    // offsets of outstanding results refer to the old text
    self.highlighter.cancel_requests();
    let result = self.syntax.replace_content(&text);
    self.parsed(result)
  }

  pub fn invalidate(&self, target: TextTarget) {
    self.highlighter.invalidate(target);
  }

  /// Starts over from the buffer contents: fresh tracker and syntax state,
  /// base attributes everywhere, then a full parse. Resolvers holding the
  /// old state fail with `StateInvalid` from now on.
  pub fn reset(&mut self) -> Result<()> {
    let len = self.buffer.len_chars();
    self.tracker = EditTracker::new(len);
    let syntax = new_syntax(&*self.buffer, &self.loader, &self.options);
    self
      .highlighter
      .set_resolver(Arc::new(SyntaxTokenResolver::new(&syntax)));
    connect(&syntax, &self.highlighter);
    self.syntax = syntax;
    self.highlighter.revert_to_base(TextTarget::All);
    self.syntax.parse()?;
    Ok(())
  }

  fn parsed(&self, result: std::result::Result<(), SyntaxError>) -> Result<()> {
    match result {
      Ok(()) => Ok(()),
      Err(err @ SyntaxError::ParseTimeout { .. }) => {
        tracing::warn!(%err, "dropping highlights");
        self.highlighter.revert_to_base(TextTarget::All);
        Err(err.into())
      },
      Err(err) => Err(err.into()),
    }
  }

  fn recover(&mut self, err: &EditError) {
    tracing::error!(%err, "edit notifications out of sync, resetting the session");
    if let Err(err) = self.reset() {
      tracing::error!(%err, "reset failed");
    }
  }
}

fn new_syntax(buffer: &dyn HostBuffer, loader: &Arc<Loader>, options: &ParseOptions) -> SyntaxState {
  let text = buffer.substring(0..buffer.len_chars());
  SyntaxState::new(SyntaxTree::new(
    Rope::from_str(&text),
    loader.clone(),
    options.clone(),
  ))
}

fn connect(syntax: &SyntaxState, highlighter: &Highlighter) {
  let highlighter = highlighter.clone();
  syntax.set_invalidation_handler(move |set| highlighter.invalidate(TextTarget::Set(set)));
}
