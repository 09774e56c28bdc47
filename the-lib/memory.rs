//! An in-memory [`Host`] backed by ropes.
//!
//! `MemoryHost` behaves like a minimal editor: it owns transient documents,
//! tracks one active editor with a single cursor, resolves workspace files
//! against a root directory and notifies listeners synchronously. Every
//! asynchronous operation yields once before touching state, so other local
//! tasks get a chance to run in between, much as with a real host round trip.
//!
//! The `type_text`, `backspace`, `replace_range` and `move_cursor` helpers
//! simulate user input. They emit the same events a keystroke would.

use std::{
  cell::RefCell,
  collections::HashMap,
  num::NonZeroUsize,
  path::PathBuf,
};

use async_trait::async_trait;
use ropey::Rope;
use the_telescope_event::Listeners;

use crate::host::{
  ContentChange,
  DocumentChange,
  DocumentId,
  DocumentListener,
  Host,
  HostError,
  Position,
  SelectionChange,
  SelectionListener,
  Subscription,
  TextRange,
};

/// Where navigation landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedLocation {
  pub path:   PathBuf,
  pub cursor: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ActiveEditor {
  Transient(DocumentId),
  File(OpenedLocation),
}

#[derive(Debug)]
struct Buffer {
  text:   Rope,
  cursor: Position,
}

#[derive(Debug, Default)]
struct State {
  next_id: usize,
  buffers: HashMap<DocumentId, Buffer>,
  active:  Option<ActiveEditor>,
  opened:  Vec<OpenedLocation>,
  errors:  Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryHost {
  root:      Option<PathBuf>,
  state:     RefCell<State>,
  documents: Listeners<DocumentChange>,
  cursors:   Listeners<SelectionChange>,
}

impl MemoryHost {
  pub fn new(root: Option<PathBuf>) -> Self {
    Self {
      root,
      ..Self::default()
    }
  }

  pub fn root(&self) -> Option<&std::path::Path> {
    self.root.as_deref()
  }

  pub fn active_document(&self) -> Option<DocumentId> {
    match self.state.borrow().active {
      Some(ActiveEditor::Transient(id)) => Some(id),
      _ => None,
    }
  }

  /// The file editor that navigation opened last, if it is the active editor.
  pub fn active_location(&self) -> Option<OpenedLocation> {
    match &self.state.borrow().active {
      Some(ActiveEditor::File(location)) => Some(location.clone()),
      _ => None,
    }
  }

  /// Transient documents are shown without line numbers.
  pub fn line_numbers_visible(&self) -> bool {
    !matches!(self.state.borrow().active, Some(ActiveEditor::Transient(_)))
  }

  pub fn is_open(&self, document: DocumentId) -> bool {
    self.state.borrow().buffers.contains_key(&document)
  }

  pub fn text(&self, document: DocumentId) -> Option<String> {
    self
      .state
      .borrow()
      .buffers
      .get(&document)
      .map(|buffer| buffer.text.to_string())
  }

  pub fn lines(&self, document: DocumentId) -> Vec<String> {
    let state = self.state.borrow();
    let Some(buffer) = state.buffers.get(&document) else {
      return Vec::new();
    };
    (0..buffer.text.len_lines())
      .map(|line| line_text(&buffer.text, line))
      .collect()
  }

  pub fn opened(&self) -> Vec<OpenedLocation> {
    self.state.borrow().opened.clone()
  }

  pub fn errors(&self) -> Vec<String> {
    self.state.borrow().errors.clone()
  }

  pub fn listener_count(&self) -> usize {
    self.documents.len() + self.cursors.len()
  }

  /// Type `text` at the cursor of the active transient document.
  pub fn type_text(&self, text: &str) {
    let Some((document, cursor)) = self.active_cursor() else {
      return;
    };
    let inserted = Rope::from_str(text);
    let last_line = inserted.len_lines() - 1;
    let after = if last_line == 0 {
      Position::new(cursor.line, cursor.column + inserted.len_chars())
    } else {
      Position::new(
        cursor.line + last_line,
        inserted.len_chars() - inserted.line_to_char(last_line),
      )
    };
    self.user_edit(document, TextRange::point(cursor), text, after);
  }

  /// Delete the char before the cursor, joining lines at column 0.
  pub fn backspace(&self) {
    let Some((document, cursor)) = self.active_cursor() else {
      return;
    };
    let start = if cursor.column > 0 {
      Position::new(cursor.line, cursor.column - 1)
    } else if cursor.line > 0 {
      let Some(len) = self.line_len(document, cursor.line - 1) else {
        return;
      };
      Position::new(cursor.line - 1, len)
    } else {
      return;
    };
    self.user_edit(document, TextRange::new(start, cursor), "", start);
  }

  /// Replace an arbitrary range of the active transient document, leaving the
  /// cursor at the end of the inserted text.
  pub fn replace_range(&self, range: TextRange, text: &str) {
    let Some(document) = self.active_document() else {
      return;
    };
    let inserted = Rope::from_str(text);
    let last_line = inserted.len_lines() - 1;
    let after = if last_line == 0 {
      Position::new(range.start.line, range.start.column + inserted.len_chars())
    } else {
      Position::new(
        range.start.line + last_line,
        inserted.len_chars() - inserted.line_to_char(last_line),
      )
    };
    self.user_edit(document, range, text, after);
  }

  /// Apply several edits as one multi-cursor change, delivered to listeners
  /// as a single event. Ranges are in pre-edit coordinates and must not
  /// overlap. The cursor is mapped through the edits.
  pub fn replace_ranges(&self, edits: &[(TextRange, &str)]) {
    let Some(document) = self.active_document() else {
      return;
    };
    let changes = edits
      .iter()
      .map(|(range, text)| {
        ContentChange {
          range: *range,
          text:  text.to_string(),
        }
      })
      .collect();
    if let Err(err) = self.apply_changes(document, changes, None) {
      log::warn!("ignoring user edit: {err}");
    }
  }

  /// Move the cursor as if the user clicked or used arrow keys.
  pub fn move_cursor(&self, position: Position) {
    if let Some(document) = self.active_document() {
      self.set_cursor(document, position);
    }
  }

  fn active_cursor(&self) -> Option<(DocumentId, Position)> {
    let document = self.active_document()?;
    let cursor = self.cursor(document)?;
    Some((document, cursor))
  }

  fn user_edit(&self, document: DocumentId, range: TextRange, text: &str, cursor: Position) {
    if let Err(err) = self.apply_edit(document, range, text, Some(cursor)) {
      log::warn!("ignoring user edit: {err}");
    }
  }

  fn apply_edit(
    &self,
    document: DocumentId,
    range: TextRange,
    text: &str,
    cursor: Option<Position>,
  ) -> Result<(), HostError> {
    let change = ContentChange {
      range,
      text: text.to_string(),
    };
    self.apply_changes(document, vec![change], cursor)
  }

  /// Apply `changes`, then notify document listeners once and, if the cursor
  /// moved, selection listeners. Without an explicit `cursor` the old cursor
  /// is mapped through the edits.
  fn apply_changes(
    &self,
    document: DocumentId,
    changes: Vec<ContentChange>,
    cursor: Option<Position>,
  ) -> Result<(), HostError> {
    let moved = {
      let mut state = self.state.borrow_mut();
      let buffer = state
        .buffers
        .get_mut(&document)
        .ok_or(HostError::DocumentClosed(document))?;

      let mut spans = Vec::with_capacity(changes.len());
      for change in &changes {
        let range = change.range;
        let invalid = || HostError::InvalidRange { document, range };
        let start = char_index(&buffer.text, range.start).ok_or_else(invalid)?;
        let end = char_index(&buffer.text, range.end).ok_or_else(invalid)?;
        if end < start {
          return Err(invalid());
        }
        spans.push((start, end, change.text.as_str(), range));
      }
      // Back to front, so earlier char indices stay valid.
      spans.sort_by(|a, b| b.0.cmp(&a.0));
      if let Some(window) = spans.windows(2).find(|pair| pair[1].1 > pair[0].0) {
        let range = window[1].3;
        return Err(HostError::InvalidRange { document, range });
      }

      let mut mapped = char_index(&buffer.text, buffer.cursor).unwrap_or(0);
      for &(start, end, text, _) in &spans {
        buffer.text.remove(start..end);
        buffer.text.insert(start, text);
        let inserted = text.chars().count();
        if mapped >= end {
          mapped = mapped - (end - start) + inserted;
        } else if mapped > start {
          mapped = start + inserted;
        }
      }

      let new_cursor = match cursor {
        Some(position) => clamp(&buffer.text, position),
        None => position_of(&buffer.text, mapped),
      };
      let moved = new_cursor != buffer.cursor;
      buffer.cursor = new_cursor;
      moved.then_some(new_cursor)
    };

    self.documents.emit(&DocumentChange { document, changes });
    if let Some(cursor) = moved {
      self.cursors.emit(&SelectionChange { document, cursor });
    }
    Ok(())
  }
}

#[async_trait(?Send)]
impl Host for MemoryHost {
  async fn open_transient(&self, content: &str) -> Result<DocumentId, HostError> {
    tokio::task::yield_now().await;
    let mut state = self.state.borrow_mut();
    let id = DocumentId::new(NonZeroUsize::MIN.saturating_add(state.next_id));
    state.next_id += 1;
    state.buffers.insert(
      id,
      Buffer {
        text:   Rope::from_str(content),
        cursor: Position::default(),
      },
    );
    state.active = Some(ActiveEditor::Transient(id));
    Ok(id)
  }

  async fn close_transient(&self, document: DocumentId) -> Result<(), HostError> {
    tokio::task::yield_now().await;
    let mut state = self.state.borrow_mut();
    state
      .buffers
      .remove(&document)
      .ok_or(HostError::DocumentClosed(document))?;
    if state.active == Some(ActiveEditor::Transient(document)) {
      state.active = None;
    }
    Ok(())
  }

  async fn replace(
    &self,
    document: DocumentId,
    range: TextRange,
    text: &str,
  ) -> Result<(), HostError> {
    tokio::task::yield_now().await;
    self.apply_edit(document, range, text, None)
  }

  fn line_count(&self, document: DocumentId) -> Option<usize> {
    let state = self.state.borrow();
    state
      .buffers
      .get(&document)
      .map(|buffer| buffer.text.len_lines())
  }

  fn line(&self, document: DocumentId, line: usize) -> Option<String> {
    let state = self.state.borrow();
    let buffer = state.buffers.get(&document)?;
    (line < buffer.text.len_lines()).then(|| line_text(&buffer.text, line))
  }

  fn cursor(&self, document: DocumentId) -> Option<Position> {
    let state = self.state.borrow();
    state.buffers.get(&document).map(|buffer| buffer.cursor)
  }

  fn set_cursor(&self, document: DocumentId, position: Position) {
    let cursor = {
      let mut state = self.state.borrow_mut();
      let Some(buffer) = state.buffers.get_mut(&document) else {
        return;
      };
      let cursor = clamp(&buffer.text, position);
      if cursor == buffer.cursor {
        return;
      }
      buffer.cursor = cursor;
      cursor
    };
    self.cursors.emit(&SelectionChange { document, cursor });
  }

  async fn open_location(&self, file_path: &str, line: usize) -> Result<(), HostError> {
    tokio::task::yield_now().await;
    let root = self.root.as_ref().ok_or(HostError::NoWorkspace)?;
    let path = root.join(file_path);
    let contents = tokio::fs::read_to_string(&path)
      .await
      .map_err(|source| {
        HostError::Open {
          path: path.clone(),
          source,
        }
      })?;

    let text = Rope::from_str(&contents);
    let line = line.min(text.len_lines().saturating_sub(1));
    let location = OpenedLocation {
      path,
      cursor: Position::new(line, 0),
    };

    let mut state = self.state.borrow_mut();
    state.opened.push(location.clone());
    state.active = Some(ActiveEditor::File(location));
    Ok(())
  }

  fn show_error(&self, message: &str) {
    log::error!("{message}");
    self.state.borrow_mut().errors.push(message.to_string());
  }

  fn on_document_change(&self, listener: DocumentListener) -> Subscription {
    Subscription::DocumentChange(self.documents.subscribe(listener))
  }

  fn on_selection_change(&self, listener: SelectionListener) -> Subscription {
    Subscription::SelectionChange(self.cursors.subscribe(listener))
  }

  fn unsubscribe(&self, subscription: Subscription) {
    match subscription {
      Subscription::DocumentChange(id) => self.documents.unsubscribe(id),
      Subscription::SelectionChange(id) => self.cursors.unsubscribe(id),
    };
  }
}

fn line_text(text: &Rope, line: usize) -> String {
  let mut line = text.line(line).to_string();
  while line.ends_with(['\n', '\r']) {
    line.pop();
  }
  line
}

fn line_len(text: &Rope, line: usize) -> usize {
  line_text(text, line).chars().count()
}

fn char_index(text: &Rope, position: Position) -> Option<usize> {
  if position.line >= text.len_lines() || position.column > line_len(text, position.line) {
    return None;
  }
  Some(text.line_to_char(position.line) + position.column)
}

fn clamp(text: &Rope, position: Position) -> Position {
  let line = position.line.min(text.len_lines().saturating_sub(1));
  Position::new(line, position.column.min(line_len(text, line)))
}

fn position_of(text: &Rope, index: usize) -> Position {
  let index = index.min(text.len_chars());
  let line = text.char_to_line(index);
  Position::new(line, index - text.line_to_char(line))
}
