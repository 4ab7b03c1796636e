//! Inline markdown: escapes, code spans, autolinks, links, images and
//! emphasis.
//!
//! A layer of this grammar covers one block's inline content and is parsed as
//! a single unit. Spans are collected flat while scanning and nested by
//! containment at the end.

use std::{
  cmp::Reverse,
  ops::Range,
};

use super::{
  grammar::{
    Grammar,
    Injection,
  },
  tree::Node,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct InlineGrammar;

#[derive(Debug)]
struct Span {
  kind:  &'static str,
  range: Range<usize>,
  seq:   usize,
}

#[derive(Debug)]
struct Delimiter {
  ch:        u8,
  start:     usize,
  count:     usize,
  original:  usize,
  can_open:  bool,
  can_close: bool,
}

#[derive(Debug)]
struct Bracket {
  /// Position of `[`, or of `!` for images.
  start:     usize,
  image:     bool,
  /// Delimiter stack height when the bracket was pushed.
  delimiter: usize,
  active:    bool,
}

struct Scanner<'a> {
  text:       &'a str,
  bytes:      &'a [u8],
  start:      usize,
  end:        usize,
  spans:      Vec<Span>,
  delimiters: Vec<Delimiter>,
  brackets:   Vec<Bracket>,
}

fn is_punct(ch: char) -> bool {
  ch.is_ascii_punctuation() || (!ch.is_ascii() && !ch.is_alphanumeric() && !ch.is_whitespace())
}

impl<'a> Scanner<'a> {
  fn new(source: &'a str, start: usize, end: usize) -> Self {
    Self {
      text: source,
      bytes: source.as_bytes(),
      start,
      end,
      spans: Vec::new(),
      delimiters: Vec::new(),
      brackets: Vec::new(),
    }
  }

  fn push(&mut self, kind: &'static str, range: Range<usize>) {
    let seq = self.spans.len();
    self.spans.push(Span { kind, range, seq });
  }

  fn char_before(&self, pos: usize) -> Option<char> {
    if pos <= self.start {
      return None;
    }
    self.text[self.start..pos].chars().next_back()
  }

  fn char_at(&self, pos: usize) -> Option<char> {
    if pos >= self.end {
      return None;
    }
    self.text[pos..self.end].chars().next()
  }

  fn run(mut self) -> Vec<Span> {
    let mut pos = self.start;
    while pos < self.end {
      pos = match self.bytes[pos] {
        b'\\' => self.escape(pos),
        b'`' => self.code_span(pos),
        b'<' => self.autolink(pos),
        b'*' | b'_' => self.delimiter_run(pos),
        b'!' if self.bytes.get(pos + 1) == Some(&b'[') && pos + 1 < self.end => {
          self.brackets.push(Bracket {
            start:     pos,
            image:     true,
            delimiter: self.delimiters.len(),
            active:    true,
          });
          pos + 2
        },
        b'[' => {
          self.brackets.push(Bracket {
            start:     pos,
            image:     false,
            delimiter: self.delimiters.len(),
            active:    true,
          });
          pos + 1
        },
        b']' => self.close_bracket(pos),
        _ => pos + self.char_at(pos).map_or(1, char::len_utf8),
      };
    }
    self.process_emphasis(0);
    self.spans
  }

  fn escape(&mut self, pos: usize) -> usize {
    match self.char_at(pos + 1) {
      Some(ch) if ch.is_ascii_punctuation() => {
        self.push("escape", pos..pos + 2);
        pos + 2
      },
      _ => pos + 1,
    }
  }

  fn code_span(&mut self, pos: usize) -> usize {
    let run = self.bytes[pos..self.end]
      .iter()
      .take_while(|&&b| b == b'`')
      .count();
    let mut search = pos + run;
    while search < self.end {
      let Some(offset) = self.text[search..self.end].find('`') else {
        break;
      };
      let close = search + offset;
      let close_run = self.bytes[close..self.end]
        .iter()
        .take_while(|&&b| b == b'`')
        .count();
      if close_run == run {
        self.push("code_span", pos..close + run);
        self.push("code_span_delimiter", pos..pos + run);
        self.push("code_span_content", pos + run..close);
        self.push("code_span_delimiter", close..close + run);
        return close + run;
      }
      search = close + close_run;
    }
    pos + run
  }

  fn autolink(&mut self, pos: usize) -> usize {
    let rest = &self.text[pos + 1..self.end];
    let Some(len) = rest.find(|c: char| c == '>' || c == '<' || c.is_whitespace()) else {
      return pos + 1;
    };
    if rest.as_bytes()[len] != b'>' || len == 0 {
      return pos + 1;
    }
    let target = &rest[..len];
    let scheme = target
      .split_once(':')
      .is_some_and(|(scheme, _)| {
        (2..=32).contains(&scheme.len())
          && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
          && scheme
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'.' | b'-'))
      });
    let email = !scheme && target.contains('@') && !target.contains(['\\', ':']);
    if !scheme && !email {
      return pos + 1;
    }
    let close = pos + 1 + len;
    self.push("autolink", pos..close + 1);
    self.push("autolink_delimiter", pos..pos + 1);
    self.push("autolink_uri", pos + 1..close);
    self.push("autolink_delimiter", close..close + 1);
    close + 1
  }

  fn delimiter_run(&mut self, pos: usize) -> usize {
    let ch = self.bytes[pos];
    let count = self.bytes[pos..self.end]
      .iter()
      .take_while(|&&b| b == ch)
      .count();
    let before = self.char_before(pos);
    let after = self.char_at(pos + count);
    let space_before = before.is_none_or(char::is_whitespace);
    let space_after = after.is_none_or(char::is_whitespace);
    let punct_before = before.is_some_and(is_punct);
    let punct_after = after.is_some_and(is_punct);

    let left = !space_after && (!punct_after || space_before || punct_before);
    let right = !space_before && (!punct_before || space_after || punct_after);
    let (can_open, can_close) = if ch == b'*' {
      (left, right)
    } else {
      (left && (!right || punct_before), right && (!left || punct_after))
    };

    if can_open || can_close {
      self.delimiters.push(Delimiter {
        ch,
        start: pos,
        count,
        original: count,
        can_open,
        can_close,
      });
    }
    pos + count
  }

  fn close_bracket(&mut self, pos: usize) -> usize {
    let Some(opener) = self.brackets.pop() else {
      return pos + 1;
    };
    if !opener.active {
      return pos + 1;
    }
    let Some((dest, title, close)) = self.destination(pos + 1) else {
      return pos + 1;
    };

    let text_start = opener.start + if opener.image { 2 } else { 1 };
    self.process_emphasis(opener.delimiter);
    self.delimiters.truncate(opener.delimiter);

    let kind = if opener.image { "image" } else { "link" };
    self.push(kind, opener.start..close + 1);
    if opener.image {
      self.push("image_marker", opener.start..opener.start + 1);
    }
    self.push("link_delimiter", text_start - 1..text_start);
    self.push("link_text", text_start..pos);
    self.push("link_delimiter", pos..pos + 2);
    self.push("link_destination", dest);
    if let Some(title) = title {
      self.push("link_title", title);
    }
    self.push("link_delimiter", close..close + 1);

    // no links inside links
    if !opener.image {
      for bracket in &mut self.brackets {
        if !bracket.image {
          bracket.active = false;
        }
      }
    }
    close + 1
  }

  /// `(destination "title")` starting at `pos`. Returns the destination
  /// range, the optional title range and the position of `)`.
  fn destination(&self, pos: usize) -> Option<(Range<usize>, Option<Range<usize>>, usize)> {
    if self.bytes.get(pos) != Some(&b'(') || pos >= self.end {
      return None;
    }
    let skip_space = |mut at: usize| {
      while at < self.end && self.bytes[at].is_ascii_whitespace() {
        at += 1;
      }
      at
    };

    let dest_start = skip_space(pos + 1);
    let mut at = dest_start;
    let mut depth = 0usize;
    while at < self.end {
      match self.bytes[at] {
        b'(' => depth += 1,
        b')' if depth == 0 => break,
        b')' => depth -= 1,
        b'\\' => at += 1,
        b if b.is_ascii_whitespace() => break,
        _ => {},
      }
      at += 1;
    }
    let at_end = at.min(self.end);
    let dest = dest_start..at_end;

    let mut at = skip_space(at_end);
    let mut title = None;
    if let Some(&quote) = self.bytes.get(at).filter(|_| at < self.end)
      && matches!(quote, b'"' | b'\'')
    {
      let close = self.text[at + 1..self.end].find(quote as char)? + at + 1;
      title = Some(at..close + 1);
      at = skip_space(close + 1);
    }
    (at < self.end && self.bytes[at] == b')').then_some((dest, title, at))
  }

  /// Pairs openers and closers above `bottom` on the delimiter stack.
  fn process_emphasis(&mut self, bottom: usize) {
    let mut closer = bottom;
    while closer < self.delimiters.len() {
      if !self.delimiters[closer].can_close {
        closer += 1;
        continue;
      }
      let Some(opener) = self.find_opener(bottom, closer) else {
        closer += 1;
        continue;
      };

      let (o, c) = (&self.delimiters[opener], &self.delimiters[closer]);
      let used = if o.count >= 2 && c.count >= 2 { 2 } else { 1 };
      let open_end = o.start + o.count;
      let open_start = open_end - used;
      let close_start = c.start;
      let close_end = close_start + used;
      let (kind, content) = if used == 2 {
        ("strong", "strong_content")
      } else {
        ("emphasis", "emphasis_content")
      };
      self.push(kind, open_start..close_end);
      self.push("emphasis_delimiter", open_start..open_end);
      self.push(content, open_end..close_start);
      self.push("emphasis_delimiter", close_start..close_end);

      self.delimiters[opener].count -= used;
      let c = &mut self.delimiters[closer];
      c.start += used;
      c.count -= used;

      self.delimiters.drain(opener + 1..closer);
      closer = opener + 1;
      if self.delimiters[opener].count == 0 {
        self.delimiters.remove(opener);
        closer -= 1;
      }
      if self.delimiters[closer].count == 0 {
        self.delimiters.remove(closer);
      }
    }
  }

  fn find_opener(&self, bottom: usize, closer: usize) -> Option<usize> {
    let c = &self.delimiters[closer];
    (bottom..closer).rev().find(|&idx| {
      let o = &self.delimiters[idx];
      if o.ch != c.ch || !o.can_open || o.count == 0 {
        return false;
      }
      let odd_match = (o.can_close || c.can_open)
        && (o.original + c.original) % 3 == 0
        && !(o.original % 3 == 0 && c.original % 3 == 0);
      !odd_match
    })
  }
}

/// Builds a tree out of properly nested spans.
fn nest(mut spans: Vec<Span>) -> Vec<Node> {
  spans.sort_by_key(|span| (span.range.start, Reverse(span.range.end), Reverse(span.seq)));
  let mut roots = Vec::new();
  let mut stack: Vec<Node> = Vec::new();

  fn close(stack: &mut Vec<Node>, roots: &mut Vec<Node>) {
    if let Some(done) = stack.pop() {
      match stack.last_mut() {
        Some(parent) => parent.children.push(done),
        None => roots.push(done),
      }
    }
  }

  for span in spans {
    while let Some(top) = stack.last() {
      if top.range.start <= span.range.start && span.range.end <= top.range.end {
        break;
      }
      close(&mut stack, &mut roots);
    }
    stack.push(Node::leaf(span.kind, span.range));
  }
  while !stack.is_empty() {
    close(&mut stack, &mut roots);
  }
  roots
}

impl Grammar for InlineGrammar {
  fn parse_unit(&self, source: &str, start: usize, end: usize) -> Node {
    let spans = Scanner::new(source, start, end).run();
    Node::with_children("inline", start..end, nest(spans))
  }

  fn capture(&self, kind: &str) -> Option<&'static str> {
    match kind {
      "escape" => Some("string.escape"),
      "code_span_content" => Some("text.literal"),
      "code_span_delimiter" | "autolink_delimiter" | "link_delimiter" | "emphasis_delimiter" => {
        Some("punctuation.delimiter")
      },
      "autolink_uri" | "link_destination" => Some("text.uri"),
      "link_text" => Some("text.reference"),
      "link_title" => Some("string"),
      "image_marker" => Some("punctuation.special"),
      "emphasis_content" => Some("text.emphasis"),
      "strong_content" => Some("text.strong"),
      _ => None,
    }
  }

  fn injections(&self, _unit: &Node, _offset: usize, _source: &str, _out: &mut Vec<Injection>) {}
}
