//! The editing-surface seam.
//!
//! The overlay never touches a real editor directly. Everything it needs from
//! the host (a transient document, atomic edits, line and cursor accessors,
//! navigation and change notifications) goes through [`Host`]. Positions are
//! 0-based lines and 0-based char columns.

use std::{
  fmt,
  num::NonZeroUsize,
  path::PathBuf,
};

use async_trait::async_trait;
use the_telescope_event::ListenerId;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(NonZeroUsize);

impl DocumentId {
  pub const fn new(id: NonZeroUsize) -> Self {
    Self(id)
  }

  pub const fn get(self) -> NonZeroUsize {
    self.0
  }
}

impl From<NonZeroUsize> for DocumentId {
  fn from(value: NonZeroUsize) -> Self {
    Self::new(value)
  }
}

impl fmt::Display for DocumentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "doc#{}", self.0)
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
  pub line:   usize,
  pub column: usize,
}

impl Position {
  pub const fn new(line: usize, column: usize) -> Self {
    Self { line, column }
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRange {
  pub start: Position,
  pub end:   Position,
}

impl TextRange {
  pub const fn new(start: Position, end: Position) -> Self {
    Self { start, end }
  }

  pub const fn point(position: Position) -> Self {
    Self::new(position, position)
  }

  /// Whether `line` falls within the lines this range spans.
  pub fn spans_line(&self, line: usize) -> bool {
    self.start.line <= line && line <= self.end.line
  }
}

/// One replaced range of a document edit, in pre-edit coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
  pub range: TextRange,
  pub text:  String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
  pub document: DocumentId,
  pub changes:  Vec<ContentChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionChange {
  pub document: DocumentId,
  pub cursor:   Position,
}

/// Handle to a listener installed with [`Host::on_document_change`] or
/// [`Host::on_selection_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscription {
  DocumentChange(ListenerId),
  SelectionChange(ListenerId),
}

#[derive(Debug, Error)]
pub enum HostError {
  #[error("{0} is not open")]
  DocumentClosed(DocumentId),
  #[error("range {range:?} is outside {document}")]
  InvalidRange {
    document: DocumentId,
    range:    TextRange,
  },
  #[error("failed to open {}: {source}", path.display())]
  Open {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("no workspace is open")]
  NoWorkspace,
}

pub type DocumentListener = Box<dyn Fn(&DocumentChange)>;
pub type SelectionListener = Box<dyn Fn(&SelectionChange)>;

#[async_trait(?Send)]
pub trait Host {
  /// Create a document with a fresh identity holding `content`, make it the
  /// active editor and hide its line numbers.
  async fn open_transient(&self, content: &str) -> Result<DocumentId, HostError>;

  /// Discard any edits to `document` and close its editor.
  async fn close_transient(&self, document: DocumentId) -> Result<(), HostError>;

  /// Replace `range` with `text` as a single atomic edit.
  async fn replace(
    &self,
    document: DocumentId,
    range: TextRange,
    text: &str,
  ) -> Result<(), HostError>;

  fn line_count(&self, document: DocumentId) -> Option<usize>;

  /// Text of `line` without its line ending.
  fn line(&self, document: DocumentId, line: usize) -> Option<String>;

  fn cursor(&self, document: DocumentId) -> Option<Position>;

  fn set_cursor(&self, document: DocumentId, position: Position);

  /// Open the workspace file at `file_path`, put the cursor at column 0 of the
  /// 0-based `line` and scroll it into view.
  async fn open_location(&self, file_path: &str, line: usize) -> Result<(), HostError>;

  /// Show a non-blocking error message to the user.
  fn show_error(&self, message: &str);

  fn on_document_change(&self, listener: DocumentListener) -> Subscription;

  fn on_selection_change(&self, listener: SelectionListener) -> Subscription;

  /// Remove a listener. Unknown or already removed subscriptions are ignored.
  fn unsubscribe(&self, subscription: Subscription);

  fn line_len(&self, document: DocumentId, line: usize) -> Option<usize> {
    self.line(document, line).map(|text| text.chars().count())
  }

  /// The range covering the whole document.
  fn full_range(&self, document: DocumentId) -> Option<TextRange> {
    let last = self.line_count(document)?.checked_sub(1)?;
    let end = Position::new(last, self.line_len(document, last)?);
    Some(TextRange::new(Position::default(), end))
  }
}
