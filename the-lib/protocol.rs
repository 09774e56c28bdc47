//! The reserved text protocol of the overlay buffer.
//!
//! The overlay "UI" is a plain text document, so its layout doubles as a wire
//! format. From top to bottom the buffer holds:
//!
//! - zero or more result lines, `"{prefix}{path}:{line}: {text}"`, where the
//!   prefix is [`MARKER`] for the highlighted result and [`UNSELECTED`]
//!   otherwise,
//! - a single blank separator line (absent in a freshly opened overlay),
//! - the input line, `"> {query}"`.

use std::borrow::Cow;

use crate::search::Match;

/// Prefix of the input line and of the highlighted result line.
pub const MARKER: &str = "> ";
/// Prefix of every result line that is not highlighted.
pub const UNSELECTED: &str = "  ";
/// Width of [`MARKER`] in chars. The cursor never sits left of this column on
/// the input line.
pub const MARKER_WIDTH: usize = 2;

pub fn has_marker(line: &str) -> bool {
  line.starts_with(MARKER)
}

/// Rewrite `line` so it starts with [`MARKER`]. A lone `>` gets its space
/// back; anything else has the whole marker prepended.
pub fn restore_marker(line: &str) -> Cow<'_, str> {
  if has_marker(line) {
    Cow::Borrowed(line)
  } else if let Some(rest) = line.strip_prefix('>') {
    Cow::Owned(format!("{MARKER}{rest}"))
  } else {
    Cow::Owned(format!("{MARKER}{line}"))
  }
}

/// The query typed into `input_line`: the text after the marker, trimmed. A
/// line without the marker carries no query.
pub fn extract_query(input_line: &str) -> &str {
  input_line
    .strip_prefix(MARKER)
    .map(str::trim)
    .unwrap_or_default()
}

/// Chars a text buffer may treat as a line break.
pub fn is_line_break(ch: char) -> bool {
  matches!(
    ch,
    '\n' | '\r' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}'
  )
}

/// Render `result` as one buffer line. Line breaks inside the match become
/// spaces so the result never spans more than one line.
pub fn result_line(result: &Match, selected: bool) -> String {
  let prefix = if selected { MARKER } else { UNSELECTED };
  format!("{prefix}{result}")
    .chars()
    .map(|ch| if is_line_break(ch) { ' ' } else { ch })
    .collect()
}

/// A rendered overlay body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
  pub text:       String,
  /// 0-based line index of the input line within `text`.
  pub input_line: usize,
}

/// Lay out `results` above a blank separator and `input_line`, highlighting
/// the result at `selected`.
pub fn render_body(results: &[Match], selected: usize, input_line: &str) -> Body {
  let mut lines: Vec<String> = results
    .iter()
    .enumerate()
    .map(|(index, result)| result_line(result, index == selected))
    .collect();
  let input_index = lines.len() + 1;
  lines.push(String::new());
  lines.push(input_line.to_string());

  Body {
    text:       lines.join("\n"),
    input_line: input_index,
  }
}

/// A result line read back from the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLine<'a> {
  pub selected:  bool,
  pub file_path: &'a str,
  pub line:      usize,
  pub text:      &'a str,
}

/// Parse a line produced by [`result_line`]. File paths may themselves contain
/// `:`; the first `:{digits}: ` sequence ends the path.
pub fn parse_result_line(line: &str) -> Option<ResultLine<'_>> {
  let (selected, rest) = if let Some(rest) = line.strip_prefix(MARKER) {
    (true, rest)
  } else {
    (false, line.strip_prefix(UNSELECTED)?)
  };

  for (colon, _) in rest.match_indices(':') {
    let path = &rest[..colon];
    let tail = &rest[colon + 1..];
    let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
    if path.is_empty() || digits == 0 {
      continue;
    }
    let Some(text) = tail[digits..].strip_prefix(": ") else {
      continue;
    };
    let Ok(line) = tail[..digits].parse() else {
      continue;
    };
    return Some(ResultLine {
      selected,
      file_path: path,
      line,
      text,
    });
  }
  None
}
