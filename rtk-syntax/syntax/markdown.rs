//! Block level markdown.
//!
//! Every unit is one block and starts at the beginning of a line. Whether a
//! block ends only depends on the lines it covers plus the first line of the
//! block after it, which is what lets [`super::tree::Tree`] re-parse from the
//! block before an edit and rejoin the old tree afterwards.

use std::ops::Range;

use super::{
  grammar::{
    Grammar,
    Injection,
    MARKDOWN_INLINE,
  },
  line_end,
  tree::Node,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownGrammar;

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
  start:       usize,
  /// End including the line break.
  end:         usize,
  content_end: usize,
  text:        &'a str,
}

impl<'a> Line<'a> {
  fn at(source: &'a str, start: usize, end: usize) -> Self {
    let stop = line_end(source, start, end);
    let mut content_end = stop;
    if source[start..content_end].ends_with('\n') {
      content_end -= 1;
    }
    if source[start..content_end].ends_with('\r') {
      content_end -= 1;
    }
    Self {
      start,
      end: stop,
      content_end,
      text: &source[start..content_end],
    }
  }

  fn is_blank(&self) -> bool {
    self.text.trim().is_empty()
  }

  /// Leading indentation as (columns, bytes).
  fn indent(&self) -> (usize, usize) {
    let mut cols = 0;
    let mut bytes = 0;
    for b in self.text.bytes() {
      match b {
        b' ' => cols += 1,
        b'\t' => cols += 4 - cols % 4,
        _ => break,
      }
      bytes += 1;
    }
    (cols, bytes)
  }

  /// Byte offset of the first non-blank character when indented by at most
  /// three columns.
  fn block_start(&self) -> Option<usize> {
    let (cols, bytes) = self.indent();
    (cols < 4).then_some(bytes)
  }

  fn abs(&self, range: Range<usize>) -> Range<usize> {
    self.start + range.start..self.start + range.end
  }

  fn trimmed_end(&self) -> usize {
    self.start + self.text.trim_end().len()
  }

  fn is_interrupt(&self) -> bool {
    self.atx().is_some()
      || self.fence().is_some()
      || self.thematic_break().is_some()
      || self.quote_marker().is_some()
      || self.list_marker().is_some_and(|(_, content)| content < self.content_end)
  }

  fn atx(&self) -> Option<Range<usize>> {
    let i = self.block_start()?;
    let hashes = self.text[i..].bytes().take_while(|&b| b == b'#').count();
    if !(1..=6).contains(&hashes) {
      return None;
    }
    match self.text.as_bytes().get(i + hashes) {
      None | Some(b' ' | b'\t') => Some(self.abs(i..i + hashes)),
      _ => None,
    }
  }

  /// Fence character, run length and marker range.
  fn fence(&self) -> Option<(u8, usize, Range<usize>)> {
    let i = self.block_start()?;
    let ch = *self.text.as_bytes().get(i)?;
    if ch != b'`' && ch != b'~' {
      return None;
    }
    let run = self.text[i..].bytes().take_while(|&b| b == ch).count();
    if run < 3 {
      return None;
    }
    if ch == b'`' && self.text[i + run..].contains('`') {
      return None;
    }
    Some((ch, run, self.abs(i..i + run)))
  }

  fn closes_fence(&self, ch: u8, len: usize) -> Option<Range<usize>> {
    let i = self.block_start()?;
    let run = self.text[i..].bytes().take_while(|&b| b == ch).count();
    (run >= len && self.text[i + run..].trim().is_empty()).then(|| self.abs(i..i + run))
  }

  fn thematic_break(&self) -> Option<Range<usize>> {
    let i = self.block_start()?;
    let ch = *self.text.as_bytes().get(i)?;
    if !matches!(ch, b'*' | b'-' | b'_') {
      return None;
    }
    let rest = &self.text[i..];
    let marks = rest.bytes().filter(|&b| b == ch).count();
    let clean = rest.bytes().all(|b| b == ch || b == b' ' || b == b'\t');
    (clean && marks >= 3).then(|| self.abs(i..self.text.trim_end().len()))
  }

  fn setext_underline(&self) -> Option<Range<usize>> {
    let i = self.block_start()?;
    let ch = *self.text.as_bytes().get(i)?;
    if ch != b'=' && ch != b'-' {
      return None;
    }
    let run = self.text[i..].bytes().take_while(|&b| b == ch).count();
    self.text[i + run..]
      .trim()
      .is_empty()
      .then(|| self.abs(i..i + run))
  }

  fn quote_marker(&self) -> Option<usize> {
    let i = self.block_start()?;
    (self.text.as_bytes().get(i) == Some(&b'>')).then_some(self.start + i)
  }

  /// Marker range and the absolute start of the item content.
  fn list_marker(&self) -> Option<(Range<usize>, usize)> {
    let i = self.block_start()?;
    let bytes = self.text.as_bytes();
    let marker_end = match *bytes.get(i)? {
      b'-' | b'+' | b'*' => i + 1,
      b'0'..=b'9' => {
        let digits = bytes[i..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits > 9 || !matches!(bytes.get(i + digits), Some(b'.' | b')')) {
          return None;
        }
        i + digits + 1
      },
      _ => return None,
    };
    match bytes.get(marker_end) {
      None => Some((self.abs(i..marker_end), self.content_end)),
      Some(b' ' | b'\t') => {
        let gap = bytes[marker_end..]
          .iter()
          .take_while(|&&b| b == b' ' || b == b'\t')
          .count();
        Some((self.abs(i..marker_end), self.start + marker_end + gap))
      },
      _ => None,
    }
  }
}

fn push_inline(children: &mut Vec<Node>, kind: &'static str, range: Range<usize>) {
  if range.start < range.end {
    children.push(Node::leaf(kind, range));
  }
}

impl MarkdownGrammar {
  fn blank_lines(&self, source: &str, first: Line, end: usize) -> Node {
    let mut stop = first.end;
    while stop < end {
      let line = Line::at(source, stop, end);
      if !line.is_blank() {
        break;
      }
      stop = line.end;
    }
    Node::leaf("blank_lines", first.start..stop)
  }

  fn indented_code(&self, source: &str, first: Line, end: usize) -> Node {
    let mut stop = first.end;
    while stop < end {
      let line = Line::at(source, stop, end);
      if line.is_blank() || line.indent().0 < 4 {
        break;
      }
      stop = line.end;
    }
    Node::leaf("indented_code", first.start..stop)
  }

  fn atx_heading(&self, line: Line, marker: Range<usize>) -> Node {
    let mut children = vec![Node::leaf("atx_marker", marker.clone())];
    let content_start = marker.end + line_gap(&line.text[marker.end - line.start..]);
    let mut content_end = line.trimmed_end().max(content_start);

    // optional closing sequence, which needs a space before it
    let content = &line.text[content_start - line.start..content_end - line.start];
    let without_hashes = content.trim_end_matches('#');
    let mut closing = None;
    if without_hashes.len() < content.len()
      && (without_hashes.is_empty() || without_hashes.ends_with([' ', '\t']))
    {
      closing = Some(content_start + without_hashes.len()..content_end);
      content_end = content_start + without_hashes.trim_end().len();
    }

    push_inline(&mut children, "heading_content", content_start..content_end);
    if let Some(closing) = closing {
      children.push(Node::leaf("atx_marker", closing));
    }
    Node::with_children("atx_heading", line.start..line.end, children)
  }

  fn fenced_code(
    &self,
    source: &str,
    open: Line,
    fence: (u8, usize, Range<usize>),
    end: usize,
  ) -> Node {
    let (ch, len, marker) = fence;
    let mut children = vec![Node::leaf("fence_delimiter", marker.clone())];
    let info_start = marker.end + line_gap(&open.text[marker.end - open.start..]);
    push_inline(
      &mut children,
      "info_string",
      info_start..open.trimmed_end().max(info_start),
    );

    let mut stop = open.end;
    let mut closing = None;
    while stop < end {
      let line = Line::at(source, stop, end);
      if let Some(close) = line.closes_fence(ch, len) {
        closing = Some((line, close));
        break;
      }
      stop = line.end;
    }

    push_inline(&mut children, "code_content", open.end..stop);
    let unit_end = match closing {
      Some((line, close)) => {
        children.push(Node::leaf("fence_delimiter", close));
        line.end
      },
      None => stop,
    };
    Node::with_children("fenced_code", open.start..unit_end, children)
  }

  fn block_quote(&self, source: &str, first: Line, end: usize) -> Node {
    let mut children = Vec::new();
    let mut line = first;
    loop {
      let Some(marker) = line.quote_marker() else {
        break;
      };
      children.push(Node::leaf("quote_marker", marker..marker + 1));
      let mut content = marker + 1;
      if source.as_bytes().get(content) == Some(&b' ') && content < line.content_end {
        content += 1;
      }
      push_inline(&mut children, "inline", content..line.trimmed_end().max(content));
      if line.end >= end {
        break;
      }
      let next = Line::at(source, line.end, end);
      if next.quote_marker().is_none() {
        break;
      }
      line = next;
    }
    Node::with_children("block_quote", first.start..line.end, children)
  }

  fn list_item(
    &self,
    source: &str,
    first: Line,
    marker: Range<usize>,
    content: usize,
    end: usize,
  ) -> Node {
    let mut last = first;
    while last.end < end {
      let next = Line::at(source, last.end, end);
      if next.is_blank() || next.is_interrupt() {
        break;
      }
      last = next;
    }
    let mut children = vec![Node::leaf("list_marker", marker)];
    push_inline(&mut children, "inline", content..last.trimmed_end().max(content));
    Node::with_children("list_item", first.start..last.end, children)
  }

  fn paragraph(&self, source: &str, first: Line, content: usize, end: usize) -> Node {
    let mut last = first;
    while last.end < end {
      let next = Line::at(source, last.end, end);
      if next.is_blank() {
        break;
      }
      if let Some(underline) = next.setext_underline() {
        let children = vec![
          Node::leaf("heading_content", content..last.trimmed_end().max(content)),
          Node::leaf("setext_underline", underline),
        ];
        return Node::with_children("setext_heading", first.start..next.end, children);
      }
      if next.is_interrupt() {
        break;
      }
      last = next;
    }
    let mut children = Vec::new();
    push_inline(&mut children, "inline", content..last.trimmed_end().max(content));
    Node::with_children("paragraph", first.start..last.end, children)
  }
}

fn line_gap(text: &str) -> usize {
  text
    .bytes()
    .take_while(|&b| b == b' ' || b == b'\t')
    .count()
}

impl Grammar for MarkdownGrammar {
  fn parse_unit(&self, source: &str, start: usize, end: usize) -> Node {
    let line = Line::at(source, start, end);
    if line.is_blank() {
      return self.blank_lines(source, line, end);
    }
    let Some(indent) = line.block_start() else {
      return self.indented_code(source, line, end);
    };
    if let Some(marker) = line.atx() {
      return self.atx_heading(line, marker);
    }
    if let Some(fence) = line.fence() {
      return self.fenced_code(source, line, fence, end);
    }
    if let Some(marker) = line.thematic_break() {
      return Node::with_children("thematic_break", line.start..line.end, vec![
        Node::leaf("break_marker", marker),
      ]);
    }
    if line.quote_marker().is_some() {
      return self.block_quote(source, line, end);
    }
    if let Some((marker, content)) = line.list_marker() {
      return self.list_item(source, line, marker, content, end);
    }
    self.paragraph(source, line, line.start + indent, end)
  }

  fn capture(&self, kind: &str) -> Option<&'static str> {
    match kind {
      "atx_marker" | "setext_underline" | "break_marker" | "quote_marker" | "list_marker" => {
        Some("punctuation.special")
      },
      "heading_content" => Some("text.title"),
      "fence_delimiter" => Some("punctuation.delimiter"),
      "info_string" => Some("label"),
      "code_content" | "indented_code" => Some("text.literal"),
      _ => None,
    }
  }

  fn injections(&self, unit: &Node, offset: usize, source: &str, out: &mut Vec<Injection>) {
    if unit.kind == "fenced_code" {
      let language = unit.child("info_string").and_then(|info| {
        source[info.range.start + offset..info.range.end + offset]
          .split_whitespace()
          .next()
      });
      if let (Some(language), Some(content)) = (language, unit.child("code_content")) {
        out.push(Injection {
          language: language.to_string(),
          range:    content.range.start + offset..content.range.end + offset,
        });
      }
      return;
    }
    for child in &unit.children {
      if matches!(child.kind, "inline" | "heading_content") && !child.is_empty() {
        out.push(Injection {
          language: MARKDOWN_INLINE.to_string(),
          range:    child.range.start + offset..child.range.end + offset,
        });
      }
    }
  }
}
