//! The telescope overlay: a transient document that is at once a query input,
//! a live result list and a surface the user edits directly.
//!
//! # Layout
//!
//! The document always ends with the input line (`"> query"`). Results are
//! rendered above it, followed by one blank separator line, so the input line
//! moves down as results appear. See [`crate::protocol`] for the exact format.
//!
//! # Reentrancy
//!
//! All work runs on one thread inside a [`tokio::task::LocalSet`]. The host
//! notifies listeners synchronously, including for edits the controller makes
//! itself, so three guards bracket every self-triggered host call:
//!
//! - `updating_results` and `preventing_edit` are held while a render
//!   replaces the document and moves the cursor.
//! - `preventing_edit` alone is held while a broken input line is repaired.
//! - `restoring_cursor` is held while the cursor is pushed back onto the
//!   input line.
//!
//! Listeners ignore events that arrive while the relevant guard is held.
//!
//! # Staleness
//!
//! Search dispatches are debounced. A dispatch that already started is never
//! cancelled. Its result is dropped before rendering if the overlay closed,
//! was reopened, or a newer dispatch started in the meantime.

use std::{
  cell::{
    Cell,
    RefCell,
  },
  rc::{
    Rc,
    Weak,
  },
};

use ropey::Rope;
use the_telescope_event::Debouncer;
use tokio::sync::Notify;

use crate::{
  config::{
    SelectionPolicy,
    TelescopeConfig,
  },
  host::{
    DocumentChange,
    DocumentId,
    Host,
    HostError,
    Position,
    SelectionChange,
    Subscription,
    TextRange,
  },
  protocol::{
    self,
    MARKER,
    MARKER_WIDTH,
  },
  search::{
    Match,
    SearchEngine,
  },
};

/// Session state, alive between `show` and close.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct OverlayState {
  document:       Option<DocumentId>,
  results:        Vec<Match>,
  selected_index: usize,
  input_line:     usize,
}

#[derive(Debug, Default)]
struct Guards {
  updating_results: Cell<bool>,
  preventing_edit:  Cell<bool>,
  restoring_cursor: Cell<bool>,
}

impl Guards {
  fn reset(&self) {
    self.updating_results.set(false);
    self.preventing_edit.set(false);
    self.restoring_cursor.set(false);
  }
}

struct Inner {
  host:          Rc<dyn Host>,
  engine:        Rc<dyn SearchEngine>,
  policy:        SelectionPolicy,
  state:         RefCell<OverlayState>,
  guards:        Guards,
  debounce:      RefCell<Debouncer>,
  subscriptions: RefCell<Vec<Subscription>>,
  /// Bumped by every `show`.
  epoch:         Cell<u64>,
  /// Bumped by every dispatch.
  generation:    Cell<u64>,
  in_flight:     Cell<usize>,
  /// Signalled whenever the controller may have become settled.
  settle:        Notify,
}

impl Inner {
  fn document(&self) -> Option<DocumentId> {
    self.state.borrow().document
  }

  fn release(&self) {
    self.debounce.borrow_mut().cancel();
    for subscription in self.subscriptions.borrow_mut().drain(..) {
      self.host.unsubscribe(subscription);
    }
    self.settle.notify_waiters();
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.release();
  }
}

/// Counts a dispatch as in flight until dropped.
struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
  fn enter(inner: &'a Inner) -> Self {
    inner.in_flight.set(inner.in_flight.get() + 1);
    Self(inner)
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    let in_flight = &self.0.in_flight;
    in_flight.set(in_flight.get().saturating_sub(1));
    self.0.settle.notify_waiters();
  }
}

/// Owns one overlay session at a time. Cloning yields another handle to the
/// same controller.
#[derive(Clone)]
pub struct OverlayController {
  inner: Rc<Inner>,
}

impl OverlayController {
  pub fn new(
    host: Rc<dyn Host>,
    engine: Rc<dyn SearchEngine>,
    config: &TelescopeConfig,
  ) -> Self {
    Self {
      inner: Rc::new(Inner {
        host,
        engine,
        policy: config.initial_selection,
        state: RefCell::new(OverlayState::default()),
        guards: Guards::default(),
        debounce: RefCell::new(Debouncer::new(config.debounce())),
        subscriptions: RefCell::new(Vec::new()),
        epoch: Cell::new(0),
        generation: Cell::new(0),
        in_flight: Cell::new(0),
        settle: Notify::new(),
      }),
    }
  }

  pub fn is_open(&self) -> bool {
    self.inner.document().is_some()
  }

  pub fn document(&self) -> Option<DocumentId> {
    self.inner.document()
  }

  pub fn results(&self) -> Vec<Match> {
    self.inner.state.borrow().results.clone()
  }

  pub fn selected_index(&self) -> usize {
    self.inner.state.borrow().selected_index
  }

  pub fn selected(&self) -> Option<Match> {
    let state = self.inner.state.borrow();
    state.results.get(state.selected_index).cloned()
  }

  /// Line index currently holding the input line.
  pub fn input_line(&self) -> usize {
    self.inner.state.borrow().input_line
  }

  /// No debounce timer is waiting, no dispatch is in flight and no
  /// self-triggered edit is underway.
  pub fn is_settled(&self) -> bool {
    let inner = &self.inner;
    !inner.debounce.borrow().is_pending()
      && inner.in_flight.get() == 0
      && !inner.guards.updating_results.get()
      && !inner.guards.preventing_edit.get()
  }

  /// Wait until [`is_settled`](Self::is_settled) holds.
  pub async fn settled(&self) {
    loop {
      // Registered before the check so a wakeup in between is not lost.
      let notified = self.inner.settle.notified();
      if self.is_settled() {
        return;
      }
      notified.await;
    }
  }

  /// Open a fresh overlay. Any previous session is torn down first and all
  /// session state starts over.
  pub async fn show(&self) -> Result<(), HostError> {
    let inner = &self.inner;
    inner.release();
    let previous = inner.state.borrow_mut().document.take();
    if let Some(previous) = previous {
      if let Err(err) = inner.host.close_transient(previous).await {
        log::warn!("failed to close previous overlay {previous}: {err}");
      }
    }

    inner.epoch.set(inner.epoch.get() + 1);
    *inner.state.borrow_mut() = OverlayState::default();
    inner.guards.reset();
    inner.settle.notify_waiters();

    let document = inner.host.open_transient(MARKER).await?;
    inner.state.borrow_mut().document = Some(document);

    let end = inner.host.line_len(document, 0).unwrap_or(MARKER_WIDTH);
    inner.host.set_cursor(document, Position::new(0, end));
    self.install_listeners();

    log::info!("telescope opened in {document}");
    Ok(())
  }

  /// Release the debounce timer and both listeners. The document stays as it
  /// is. Idempotent.
  pub fn dispose(&self) {
    self.inner.release();
  }

  /// Dismiss the overlay: release timer and listeners, then revert and close
  /// the transient document. Idempotent.
  pub async fn close(&self) {
    let inner = &self.inner;
    inner.release();
    let document = {
      let mut state = inner.state.borrow_mut();
      let document = state.document.take();
      *state = OverlayState::default();
      document
    };

    if let Some(document) = document {
      if let Err(err) = inner.host.close_transient(document).await {
        log::warn!("failed to close overlay {document}: {err}");
      }
      log::info!("telescope closed");
    }
  }

  pub async fn move_selection_up(&self) {
    self.step_selection(false).await;
  }

  pub async fn move_selection_down(&self) {
    self.step_selection(true).await;
  }

  /// Close the overlay and navigate to the highlighted result. Returns the
  /// match that was selected, or `None` if there was nothing to select.
  ///
  /// A failure to open the file is reported through the host and does not
  /// reopen the overlay.
  pub async fn select_result(&self) -> Option<Match> {
    let selected = {
      let state = self.inner.state.borrow();
      state.document?;
      state.results.get(state.selected_index).cloned()?
    };

    self.close().await;

    let line = selected.line.saturating_sub(1);
    log::info!("opening {}:{}", selected.file_path, selected.line);
    if let Err(err) = self
      .inner
      .host
      .open_location(&selected.file_path, line)
      .await
    {
      log::warn!("{err}");
      self
        .inner
        .host
        .show_error(&format!("Failed to open file: {}", selected.file_path));
    }
    Some(selected)
  }

  fn install_listeners(&self) {
    let inner = &self.inner;
    inner.release();

    let weak = Rc::downgrade(inner);
    let on_change = inner.host.on_document_change(Box::new(move |event| {
      if let Some(controller) = Self::upgrade(&weak) {
        controller.handle_document_change(event);
      }
    }));

    let weak = Rc::downgrade(inner);
    let on_selection = inner.host.on_selection_change(Box::new(move |event| {
      if let Some(controller) = Self::upgrade(&weak) {
        controller.handle_selection_change(event);
      }
    }));

    inner
      .subscriptions
      .borrow_mut()
      .extend([on_change, on_selection]);
  }

  fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
    weak.upgrade().map(|inner| Self { inner })
  }

  fn handle_document_change(&self, event: &DocumentChange) {
    let inner = &self.inner;
    let guards = &inner.guards;
    if guards.preventing_edit.get() || guards.updating_results.get() {
      return;
    }
    let Some(document) = inner.document() else {
      return;
    };
    if event.document != document {
      return;
    }
    let Some(line_count) = inner.host.line_count(document) else {
      return;
    };

    let tracked = inner.state.borrow().input_line;
    if !event
      .changes
      .iter()
      .all(|change| change.range.spans_line(tracked))
    {
      // Not user input on the input line. Edits above it still shift it.
      let shift: isize = event
        .changes
        .iter()
        .filter(|change| change.range.end.line < tracked)
        .map(|change| {
          line_breaks(&change.text) as isize
            - (change.range.end.line - change.range.start.line) as isize
        })
        .sum();
      if shift != 0 {
        let shifted = tracked
          .saturating_add_signed(shift)
          .min(line_count.saturating_sub(1));
        inner.state.borrow_mut().input_line = shifted;
        log::debug!("input line moved from {tracked} to {shifted}");
      }
      return;
    }

    let input_line = tracked.min(line_count.saturating_sub(1));
    inner.state.borrow_mut().input_line = input_line;

    let text = inner.host.line(document, input_line).unwrap_or_default();
    if !protocol::has_marker(&text) || input_line + 1 < line_count {
      guards.preventing_edit.set(true);
      let controller = self.clone();
      tokio::task::spawn_local(async move {
        controller.repair_input_line(document).await;
        controller.inner.guards.preventing_edit.set(false);
        controller.inner.settle.notify_waiters();
      });
      return;
    }

    let weak = Rc::downgrade(inner);
    inner.debounce.borrow_mut().schedule(async move {
      if let Some(controller) = Self::upgrade(&weak) {
        controller.dispatch().await;
      }
    });
  }

  /// Restore the marker and fold any lines after the input line back into it.
  /// Runs with `preventing_edit` held.
  async fn repair_input_line(&self, document: DocumentId) {
    let host = &self.inner.host;
    let input_line = self.inner.state.borrow().input_line;
    let Some(line_count) = host.line_count(document) else {
      return;
    };
    let last = line_count.saturating_sub(1);

    let joined: String = (input_line..=last)
      .filter_map(|line| host.line(document, line))
      .collect();
    let repaired = protocol::restore_marker(&joined).into_owned();
    let end = Position::new(last, host.line_len(document, last).unwrap_or(0));
    let range = TextRange::new(Position::new(input_line, 0), end);

    let cursor = host.cursor(document).unwrap_or_default();
    match host.replace(document, range, &repaired).await {
      Ok(()) => {},
      Err(HostError::DocumentClosed(_)) => {
        log::debug!("overlay closed before the input line was repaired");
        return;
      },
      Err(err) => {
        log::error!("failed to repair input line: {err}");
        return;
      },
    }

    let len = host.line_len(document, input_line).unwrap_or(MARKER_WIDTH);
    let column = if cursor.line == input_line {
      cursor.column.max(MARKER_WIDTH).min(len)
    } else {
      len
    };
    host.set_cursor(document, Position::new(input_line, column));
  }

  fn handle_selection_change(&self, event: &SelectionChange) {
    let inner = &self.inner;
    if inner.guards.restoring_cursor.get() || inner.guards.updating_results.get() {
      return;
    }
    let Some(document) = inner.document() else {
      return;
    };
    if event.document != document {
      return;
    }

    let input_line = inner.state.borrow().input_line;
    let target = if event.cursor.line != input_line {
      let end = inner.host.line_len(document, input_line).unwrap_or(0);
      Position::new(input_line, end)
    } else if event.cursor.column < MARKER_WIDTH {
      Position::new(input_line, MARKER_WIDTH)
    } else {
      return;
    };

    inner.guards.restoring_cursor.set(true);
    inner.host.set_cursor(document, target);
    inner.guards.restoring_cursor.set(false);
  }

  /// Debounce settle: read the query and render its results.
  async fn dispatch(&self) {
    let inner = &self.inner;
    let _in_flight = InFlight::enter(inner);
    let Some(document) = inner.document() else {
      return;
    };
    let epoch = inner.epoch.get();
    let generation = inner.generation.get() + 1;
    inner.generation.set(generation);

    let input_line = inner.state.borrow().input_line;
    let input = inner.host.line(document, input_line).unwrap_or_default();
    let query = protocol::extract_query(&input);
    let results = if query.is_empty() {
      Vec::new()
    } else {
      inner.engine.search(query).await
    };

    if inner.document() != Some(document)
      || inner.epoch.get() != epoch
      || inner.generation.get() != generation
    {
      log::debug!("discarding stale results for {query:?}");
      return;
    }
    self.update_results(results, true).await;
  }

  async fn step_selection(&self, forward: bool) {
    let results = {
      let mut state = self.inner.state.borrow_mut();
      let len = state.results.len();
      if len == 0 || state.document.is_none() {
        return;
      }
      let current = state.selected_index.min(len - 1);
      state.selected_index = if forward {
        (current + 1) % len
      } else {
        (current + len - 1) % len
      };
      state.results.clone()
    };
    self.update_results(results, false).await;
  }

  /// Replace the document with `results`, a separator and the current input
  /// line, then park the cursor at the end of the input line.
  async fn update_results(&self, results: Vec<Match>, reset_selection: bool) {
    let inner = &self.inner;
    let guards = &inner.guards;
    let Some(document) = inner.document() else {
      return;
    };
    if guards.updating_results.get() {
      return;
    }
    guards.updating_results.set(true);
    guards.preventing_edit.set(true);

    let input_line = inner.state.borrow().input_line;
    let input = inner
      .host
      .line(document, input_line)
      .unwrap_or_else(|| MARKER.to_string());
    let body = {
      let mut state = inner.state.borrow_mut();
      if reset_selection {
        state.selected_index = inner.policy.initial_index(results.len());
      }
      state.results = results;
      protocol::render_body(&state.results, state.selected_index, &input)
    };

    let applied = match inner.host.full_range(document) {
      Some(range) => inner.host.replace(document, range, &body.text).await,
      None => Err(HostError::DocumentClosed(document)),
    };

    match applied {
      Ok(()) if inner.document() == Some(document) => {
        inner.state.borrow_mut().input_line = body.input_line;
        let end = inner.host.line_len(document, body.input_line).unwrap_or(0);
        inner
          .host
          .set_cursor(document, Position::new(body.input_line, end));
      },
      Ok(()) => {},
      Err(HostError::DocumentClosed(_)) => {
        log::debug!("overlay closed before results were rendered");
      },
      Err(err) => log::error!("failed to render results: {err}"),
    }

    guards.updating_results.set(false);
    guards.preventing_edit.set(false);
    inner.settle.notify_waiters();
  }
}

/// Number of line breaks in `text`, counted the way a rope buffer splits
/// lines.
fn line_breaks(text: &str) -> usize {
  Rope::from_str(text).len_lines() - 1
}

#[cfg(test)]
mod tests;
