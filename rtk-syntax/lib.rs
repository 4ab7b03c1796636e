//! Incremental syntax highlighting for a rich text buffer.
//!
//! Edits flow through [`edit::EditTracker`] into the layered parse tree in
//! [`syntax`], which reports the character ranges it re-parsed. The
//! [`highlighter::Highlighter`] collects those ranges, resolves tokens for
//! them off the serial context and writes [`style::AttributeSet`]s back to
//! the host buffer. [`pipeline::Pipeline`] wires everything to one document.

pub mod buffer;
pub mod config;
pub mod edit;
pub mod highlighter;
pub mod invalidation;
pub mod pipeline;
pub mod resolver;
pub mod style;
pub mod syntax;

pub use buffer::{
  AttributeSink,
  HostBuffer,
  SharedText,
  StyledText,
  TextSource,
};
pub use edit::{
  ContentChange,
  EditError,
  EditRecord,
  EditTracker,
};
pub use highlighter::{
  Highlighter,
  TextTarget,
};
pub use pipeline::{
  Pipeline,
  PipelineError,
};
pub use style::{
  AttributeSet,
  StyleMap,
  TokenKind,
};
pub use syntax::{
  NamedRange,
  SyntaxError,
  SyntaxState,
  SyntaxTree,
};
