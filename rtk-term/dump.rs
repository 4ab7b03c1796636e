use std::io::{
  self,
  Write,
};

use rtk_syntax::{
  Pipeline,
  SharedText,
  TextSource,
  style::AttributeSet,
};

pub fn tokens(out: &mut impl Write, pipeline: &Pipeline, text: &SharedText) -> io::Result<()> {
  let len = text.len_chars();
  let spans = match pipeline.syntax().highlights(0..len) {
    Ok(spans) => spans,
    Err(err) => {
      writeln!(out, "no tokens: {err}")?;
      return Ok(());
    },
  };
  for span in spans {
    let snippet = text.substring(span.range.clone());
    writeln!(
      out,
      "{:>6}..{:<6} {:<24} {:?}",
      span.range.start, span.range.end, span.name, snippet
    )?;
  }
  Ok(())
}

pub fn runs(out: &mut impl Write, text: &SharedText) -> io::Result<()> {
  let snapshot = text.snapshot();
  for run in snapshot.runs() {
    let snippet = text.substring(run.range.clone());
    writeln!(
      out,
      "{:>6}..{:<6} {:<32} {:?}",
      run.range.start,
      run.range.end,
      describe(&run.attrs),
      snippet
    )?;
  }
  Ok(())
}

pub fn layers(out: &mut impl Write, pipeline: &Pipeline) -> io::Result<()> {
  let layers = pipeline.syntax().syntax().layers();
  for (language, range) in layers {
    writeln!(out, "{language:<16} {range:?}")?;
  }
  Ok(())
}

pub fn stats(out: &mut impl Write, pipeline: &Pipeline) -> io::Result<()> {
  let parse = pipeline.syntax().syntax().stats().clone();
  let highlight = pipeline.highlighter().stats();
  writeln!(out, "parse: {parse:?}")?;
  writeln!(out, "highlight: {highlight:?}")
}

fn describe(attrs: &AttributeSet) -> String {
  if attrs.is_base() {
    return "base".to_string();
  }
  let mut parts = Vec::new();
  if let Some(color) = attrs.foreground {
    parts.push(format!("fg={color}"));
  }
  if let Some(color) = attrs.background {
    parts.push(format!("bg={color}"));
  }
  for (flag, name) in [
    (attrs.bold, "bold"),
    (attrs.italic, "italic"),
    (attrs.underline, "underline"),
    (attrs.monospace, "mono"),
    (attrs.link, "link"),
  ] {
    match flag {
      Some(true) => parts.push(name.to_string()),
      Some(false) => parts.push(format!("-{name}")),
      None => {},
    }
  }
  if let Some(scale) = attrs.scale {
    parts.push(format!("{scale}%"));
  }
  parts.join(" ")
}
