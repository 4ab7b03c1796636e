//! Line based grammar for fenced code languages declared in configuration.

use std::collections::HashSet;

use super::{
  grammar::{
    Grammar,
    Injection,
  },
  line_end,
  tree::Node,
};

#[derive(Debug, Clone, Default)]
pub struct CodeGrammar {
  keywords:          HashSet<String>,
  line_comment:      Option<String>,
  string_delimiters: Vec<char>,
}

impl CodeGrammar {
  pub fn new<K, S>(
    keywords: K,
    line_comment: Option<&str>,
    string_delimiters: impl IntoIterator<Item = char>,
  ) -> Self
  where
    K: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      keywords:          keywords.into_iter().map(Into::into).collect(),
      line_comment:      line_comment.filter(|c| !c.is_empty()).map(str::to_string),
      string_delimiters: string_delimiters.into_iter().collect(),
    }
  }

  fn string_end(&self, source: &str, start: usize, end: usize, quote: char) -> usize {
    let mut chars = source[start..end].char_indices().skip(1);
    while let Some((i, ch)) = chars.next() {
      if ch == '\\' {
        chars.next();
      } else if ch == quote {
        return start + i + ch.len_utf8();
      }
    }
    end
  }
}

fn is_word(ch: char) -> bool {
  ch.is_alphanumeric() || ch == '_'
}

impl Grammar for CodeGrammar {
  fn parse_unit(&self, source: &str, start: usize, end: usize) -> Node {
    let stop = line_end(source, start, end);
    let content_end = if source[..stop].ends_with('\n') {
      stop - 1
    } else {
      stop
    };

    let mut children = Vec::new();
    let mut pos = start;
    while pos < content_end {
      let rest = &source[pos..content_end];
      if let Some(comment) = &self.line_comment
        && rest.starts_with(comment.as_str())
      {
        children.push(Node::leaf("comment", pos..content_end));
        break;
      }
      let Some(ch) = rest.chars().next() else {
        break;
      };

      if self.string_delimiters.contains(&ch) {
        let close = self.string_end(source, pos, content_end, ch);
        children.push(Node::leaf("string", pos..close));
        pos = close;
      } else if ch.is_ascii_digit() {
        let len = rest
          .find(|c: char| !(is_word(c) || c == '.'))
          .unwrap_or(rest.len());
        children.push(Node::leaf("number", pos..pos + len));
        pos += len;
      } else if is_word(ch) {
        let len = rest.find(|c: char| !is_word(c)).unwrap_or(rest.len());
        if self.keywords.contains(&rest[..len]) {
          children.push(Node::leaf("keyword", pos..pos + len));
        }
        pos += len;
      } else {
        pos += ch.len_utf8();
      }
    }

    Node::with_children("line", start..stop, children)
  }

  fn capture(&self, kind: &str) -> Option<&'static str> {
    match kind {
      "keyword" => Some("keyword"),
      "string" => Some("string"),
      "comment" => Some("comment"),
      "number" => Some("number"),
      _ => None,
    }
  }

  fn injections(&self, _unit: &Node, _offset: usize, _source: &str, _out: &mut Vec<Injection>) {}
}
