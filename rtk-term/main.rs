//! Command-line harness for the highlighting pipeline.
//!
//! Loads a markdown file into a reference buffer, styles it, replays edits
//! through the same notifications a text view would send and prints what
//! came out:
//! - `tokens`: the named spans of the parse tree
//! - `runs`: the attribute runs on the buffer
//! - `layers`: the language layers and their byte ranges

mod dump;

use std::{
  ops::Range,
  path::PathBuf,
  sync::Arc,
};

use anyhow::{
  Context,
  Result,
  bail,
};
use clap::{
  Parser,
  ValueEnum,
};
use rtk_event::{
  ManualExecutor,
  ManualScheduler,
  run_until_idle,
};
use rtk_syntax::{
  HostBuffer,
  Pipeline,
  SharedText,
  TextSource,
  config::Config,
  highlighter::TextTarget,
  resolver::{
    PatternRule,
    PatternTokenResolver,
    TokenAction,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Dump {
  Tokens,
  Runs,
  Layers,
}

#[derive(Debug, Parser)]
#[command(name = "rtk-term")]
#[command(about = "Replays edits through the incremental highlighter and prints the result")]
struct Cli {
  /// Markdown file to load
  file: PathBuf,

  /// TOML configuration (languages, theme, parse budget)
  #[arg(long, short)]
  config: Option<PathBuf>,

  /// Edit to apply, as START:END:TEXT in character offsets. `\n` and `\t`
  /// in TEXT are unescaped. May be repeated.
  #[arg(long = "edit", short, value_parser = parse_edit)]
  edits: Vec<EditArg>,

  /// Extra REGEX=NAME token rule merged over the syntax styling. May be
  /// repeated.
  #[arg(long = "pattern", short, value_parser = parse_pattern)]
  patterns: Vec<PatternArg>,

  /// What to print after the last edit
  #[arg(long, value_enum, default_value = "runs")]
  dump: Dump,

  /// Print parse and highlighter counters
  #[arg(long)]
  stats: bool,
}

#[derive(Debug, Clone)]
struct EditArg {
  range: Range<usize>,
  text:  String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PatternArg {
  regex: String,
  name:  String,
}

fn parse_edit(arg: &str) -> std::result::Result<EditArg, String> {
  let mut parts = arg.splitn(3, ':');
  let (Some(start), Some(end), Some(text)) = (parts.next(), parts.next(), parts.next()) else {
    return Err(format!("expected START:END:TEXT, got '{arg}'"));
  };
  let start: usize = start
    .parse()
    .map_err(|err| format!("bad start '{start}': {err}"))?;
  let end: usize = end.parse().map_err(|err| format!("bad end '{end}': {err}"))?;
  if end < start {
    return Err(format!("edit range {start}..{end} is reversed"));
  }
  Ok(EditArg {
    range: start..end,
    text:  unescape(text),
  })
}

fn parse_pattern(arg: &str) -> std::result::Result<PatternArg, String> {
  match arg.rsplit_once('=') {
    Some((regex, name)) if !regex.is_empty() && !name.is_empty() => {
      Ok(PatternArg {
        regex: regex.to_string(),
        name:  name.to_string(),
      })
    },
    _ => Err(format!("expected REGEX=NAME, got '{arg}'")),
  }
}

fn unescape(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut chars = text.chars();
  while let Some(ch) = chars.next() {
    if ch != '\\' {
      out.push(ch);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some('\\') => out.push('\\'),
      Some(other) => {
        out.push('\\');
        out.push(other);
      },
      None => out.push('\\'),
    }
  }
  out
}

fn main() -> Result<()> {
  env_logger::init();
  let cli = Cli::parse();

  let config = match &cli.config {
    Some(path) => {
      Config::load(path).with_context(|| format!("loading config {}", path.display()))?
    },
    None => Config::default(),
  };
  let loader = Arc::new(config.loader()?);
  let styles = config.style_map()?;
  let mut rules = config.pattern_rules()?;
  for pattern in &cli.patterns {
    let rule = PatternRule::new(&pattern.regex, pattern.name.clone())
      .with_context(|| format!("pattern '{}'", pattern.regex))?;
    rules.push(rule);
  }

  let source = std::fs::read_to_string(&cli.file)
    .with_context(|| format!("reading {}", cli.file.display()))?;
  let text = Arc::new(SharedText::new(&source));
  let scheduler = ManualScheduler::new();
  let executor = ManualExecutor::new();
  let mut pipeline = Pipeline::new(
    text.clone(),
    loader,
    styles,
    Arc::new(scheduler.clone()),
    Arc::new(executor.clone()),
    config.parse_options(),
  )?;
  run_until_idle(&scheduler, &executor);
  log::info!("styled {} chars", text.len_chars());

  for edit in &cli.edits {
    let len = text.len_chars();
    if edit.range.end > len {
      bail!("edit {:?} is outside a buffer of {len} chars", edit.range);
    }
    pipeline.will_change(edit.range.clone())?;
    let change = text.replace(edit.range.clone(), &edit.text);
    if let Err(err) = pipeline.did_change(&change) {
      log::warn!("edit {:?}: {err}", edit.range);
    }
    run_until_idle(&scheduler, &executor);
  }

  if !rules.is_empty() {
    let buffer: Arc<dyn HostBuffer> = text.clone();
    let resolver = PatternTokenResolver::new(&buffer, rules).with_action(TokenAction::Merge);
    pipeline.highlighter().set_resolver(Arc::new(resolver));
    pipeline.invalidate(TextTarget::All);
    run_until_idle(&scheduler, &executor);
  }

  let mut out = std::io::stdout().lock();
  match cli.dump {
    Dump::Tokens => dump::tokens(&mut out, &pipeline, &text)?,
    Dump::Runs => dump::runs(&mut out, &text)?,
    Dump::Layers => dump::layers(&mut out, &pipeline)?,
  }
  if cli.stats {
    dump::stats(&mut out, &pipeline)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn edit_arguments() {
    let edit = parse_edit("3:5:a\\nb:c").unwrap();
    assert_eq!(edit.range, 3..5);
    assert_eq!(edit.text, "a\nb:c");
    assert_eq!(parse_edit("4:4:").unwrap().text, "");
    assert!(parse_edit("4:2:x").is_err());
    assert!(parse_edit("4:x").is_err());
  }

  #[test]
  fn pattern_arguments() {
    assert_eq!(parse_pattern("a=b=name").unwrap(), PatternArg {
      regex: "a=b".to_string(),
      name:  "name".to_string(),
    });
    assert!(parse_pattern("=name").is_err());
    assert!(parse_pattern("regex").is_err());
  }
}
