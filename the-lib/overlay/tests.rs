use std::{
  cell::RefCell,
  future::Future,
  rc::Rc,
  time::Duration,
};

use async_trait::async_trait;
use quickcheck::quickcheck;
use tokio::{
  task::LocalSet,
  time,
};

use super::OverlayController;
use crate::{
  config::{
    SelectionPolicy,
    TelescopeConfig,
  },
  host::{
    DocumentId,
    Host,
    Position,
    TextRange,
  },
  memory::{
    MemoryHost,
    OpenedLocation,
  },
  search::{
    Match,
    SearchEngine,
  },
};

/// Substring search over a fixed corpus, recording every query it serves.
#[derive(Default)]
struct FakeEngine {
  corpus:  Vec<Match>,
  latency: Duration,
  queries: RefCell<Vec<String>>,
}

impl FakeEngine {
  fn new(corpus: Vec<Match>) -> Self {
    Self {
      corpus,
      ..Self::default()
    }
  }

  fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  fn queries(&self) -> Vec<String> {
    self.queries.borrow().clone()
  }
}

#[async_trait(?Send)]
impl SearchEngine for FakeEngine {
  async fn search(&self, query: &str) -> Vec<Match> {
    self.queries.borrow_mut().push(query.to_string());
    if !self.latency.is_zero() {
      time::sleep(self.latency).await;
    }
    let needle = query.to_lowercase();
    self
      .corpus
      .iter()
      .filter(|hit| hit.text.to_lowercase().contains(&needle))
      .cloned()
      .collect()
  }
}

fn hit(path: &str, line: usize, text: &str) -> Match {
  Match {
    file_path: path.into(),
    line,
    column: 0,
    text: text.into(),
  }
}

fn hello_corpus() -> Vec<Match> {
  vec![
    hit("a.txt", 1, "hello world"),
    hit("b.txt", 1, "say hello"),
    hit("c.txt", 4, "goodbye"),
  ]
}

struct Harness {
  host:    Rc<MemoryHost>,
  engine:  Rc<FakeEngine>,
  overlay: OverlayController,
}

impl Harness {
  fn new(host: MemoryHost, engine: FakeEngine, config: &TelescopeConfig) -> Self {
    let host = Rc::new(host);
    let engine = Rc::new(engine);
    let overlay = OverlayController::new(host.clone(), engine.clone(), config);
    Self {
      host,
      engine,
      overlay,
    }
  }

  fn with_corpus(corpus: Vec<Match>) -> Self {
    Self::new(
      MemoryHost::new(None),
      FakeEngine::new(corpus),
      &TelescopeConfig::default(),
    )
  }

  async fn show(&self) -> DocumentId {
    self.overlay.show().await.unwrap();
    self.overlay.document().unwrap()
  }

  /// Open the overlay, type `query` and wait for its results to render.
  async fn search(&self, query: &str) -> DocumentId {
    let doc = self.show().await;
    self.host.type_text(query);
    self.overlay.settled().await;
    doc
  }

  fn lines(&self, doc: DocumentId) -> Vec<String> {
    self.host.lines(doc)
  }
}

async fn local<F: Future>(future: F) -> F::Output {
  LocalSet::new().run_until(future).await
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn show_opens_bare_input_line() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;

    assert!(h.overlay.is_open());
    assert_eq!(h.lines(doc), vec!["> "]);
    assert_eq!(h.host.cursor(doc), Some(Position::new(0, 2)));
    assert_eq!(h.host.active_document(), Some(doc));
    assert!(!h.host.line_numbers_visible());
    assert_eq!(h.host.listener_count(), 2);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn query_renders_results_above_input_with_last_selected() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;

    assert_eq!(h.lines(doc), vec![
      "  a.txt:1: hello world",
      "> b.txt:1: say hello",
      "",
      "> hello",
    ]);
    assert_eq!(h.overlay.input_line(), 3);
    assert_eq!(h.overlay.selected_index(), 1);
    assert_eq!(h.host.cursor(doc), Some(Position::new(3, 7)));
    assert_eq!(h.engine.queries(), vec!["hello"]);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn clearing_query_collapses_to_separator_and_input() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;

    for _ in 0.."hello".len() {
      h.host.backspace();
    }
    h.overlay.settled().await;

    assert_eq!(h.lines(doc), vec!["", "> "]);
    assert_eq!(h.overlay.input_line(), 1);
    assert!(h.overlay.results().is_empty());
    assert_eq!(h.engine.queries(), vec!["hello"]);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn query_without_matches_renders_no_results() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("zebra").await;

    assert_eq!(h.lines(doc), vec!["", "> zebra"]);
    assert_eq!(h.overlay.selected_index(), 0);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn first_selection_policy_highlights_top_result() {
  local(async {
    let config = TelescopeConfig {
      initial_selection: SelectionPolicy::First,
      ..TelescopeConfig::default()
    };
    let h = Harness::new(
      MemoryHost::new(None),
      FakeEngine::new(hello_corpus()),
      &config,
    );
    let doc = h.search("hello").await;

    assert_eq!(h.overlay.selected_index(), 0);
    assert!(h.lines(doc)[0].starts_with("> a.txt"));
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn keystroke_burst_dispatches_one_search() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;

    for ch in ["h", "e", "l", "l", "o"] {
      h.host.type_text(ch);
      time::sleep(Duration::from_millis(100)).await;
    }
    assert!(h.engine.queries().is_empty());

    h.overlay.settled().await;
    assert_eq!(h.engine.queries(), vec!["hello"]);
    assert_eq!(h.lines(doc).len(), 4);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn edits_above_input_line_are_ignored() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;

    h.host
      .replace_range(TextRange::new(Position::new(0, 0), Position::new(0, 2)), "");

    assert!(h.overlay.is_settled());
    assert_eq!(h.lines(doc)[0], "a.txt:1: hello world");
    assert_eq!(h.overlay.input_line(), 3);
    assert_eq!(h.host.cursor(doc), Some(Position::new(3, 7)));

    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.engine.queries(), vec!["hello"]);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn deleting_a_line_above_moves_input_line() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;

    h.host
      .replace_range(TextRange::new(Position::new(0, 0), Position::new(1, 0)), "");

    assert_eq!(h.overlay.input_line(), 2);
    assert_eq!(h.host.cursor(doc), Some(Position::new(2, 7)));

    h.host.type_text("!");
    assert!(!h.overlay.is_settled());
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn destroyed_marker_is_restored() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;

    h.host
      .replace_range(TextRange::new(Position::new(0, 0), Position::new(0, 2)), "x");
    h.overlay.settled().await;

    assert_eq!(h.lines(doc), vec!["> x"]);
    assert_eq!(h.host.cursor(doc), Some(Position::new(0, 2)));
    assert!(h.engine.queries().is_empty());
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn partial_marker_gets_its_space_back() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;
    h.host.type_text("foo");

    h.host
      .replace_range(TextRange::new(Position::new(0, 1), Position::new(0, 2)), "");
    h.overlay.settled().await;

    assert_eq!(h.lines(doc).last().map(String::as_str), Some("> foo"));
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn pasted_lines_fold_into_input_line() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;

    h.host.type_text("foo\nbar");
    h.overlay.settled().await;

    assert_eq!(h.lines(doc), vec!["> foobar"]);
    assert_eq!(h.overlay.input_line(), 0);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn newline_after_results_is_undone() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;
    let before = h.lines(doc);

    h.host.type_text("\n");
    h.overlay.settled().await;

    assert_eq!(h.lines(doc), before);
    assert_eq!(h.overlay.input_line(), 3);
    assert_eq!(h.host.cursor(doc), Some(Position::new(3, 7)));
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn cursor_is_confined_to_input_line() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;

    h.host.move_cursor(Position::new(0, 3));
    assert_eq!(h.host.cursor(doc), Some(Position::new(3, 7)));

    h.host.move_cursor(Position::new(3, 0));
    assert_eq!(h.host.cursor(doc), Some(Position::new(3, 2)));

    h.host.move_cursor(Position::new(3, 4));
    assert_eq!(h.host.cursor(doc), Some(Position::new(3, 4)));
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn navigation_wraps_and_rerenders() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;

    h.overlay.move_selection_down().await;
    assert_eq!(h.overlay.selected_index(), 0);
    assert_eq!(h.lines(doc), vec![
      "> a.txt:1: hello world",
      "  b.txt:1: say hello",
      "",
      "> hello",
    ]);

    h.overlay.move_selection_up().await;
    assert_eq!(h.overlay.selected_index(), 1);
    h.overlay.move_selection_up().await;
    assert_eq!(h.overlay.selected_index(), 0);

    assert_eq!(h.host.cursor(doc), Some(Position::new(3, 7)));
    assert_eq!(h.engine.queries(), vec!["hello"]);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn navigation_without_results_does_nothing() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;

    h.overlay.move_selection_down().await;
    h.overlay.move_selection_up().await;

    assert_eq!(h.overlay.selected_index(), 0);
    assert_eq!(h.lines(doc), vec!["> "]);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn select_with_no_results_keeps_overlay_open() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;

    assert_eq!(h.overlay.select_result().await, None);

    assert!(h.overlay.is_open());
    assert!(h.host.is_open(doc));
    assert!(h.host.opened().is_empty());
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn select_closes_overlay_and_opens_location() {
  local(async {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), "first\nhello there\n").unwrap();
    let h = Harness::new(
      MemoryHost::new(Some(root.path().to_path_buf())),
      FakeEngine::new(vec![hit("a.txt", 2, "hello there")]),
      &TelescopeConfig::default(),
    );
    let doc = h.search("hello").await;

    let selected = h.overlay.select_result().await;

    assert_eq!(selected, Some(hit("a.txt", 2, "hello there")));
    assert!(!h.overlay.is_open());
    assert!(!h.host.is_open(doc));
    assert_eq!(h.host.listener_count(), 0);
    assert_eq!(
      h.host.active_location(),
      Some(OpenedLocation {
        path:   root.path().join("a.txt"),
        cursor: Position::new(1, 0),
      })
    );
    assert!(h.host.errors().is_empty());
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn select_reports_unopenable_file() {
  local(async {
    let root = tempfile::tempdir().unwrap();
    let h = Harness::new(
      MemoryHost::new(Some(root.path().to_path_buf())),
      FakeEngine::new(vec![hit("gone.txt", 1, "hello")]),
      &TelescopeConfig::default(),
    );
    h.search("hello").await;

    h.overlay.select_result().await;

    assert!(!h.overlay.is_open());
    assert!(h.host.opened().is_empty());
    assert_eq!(h.host.errors(), vec!["Failed to open file: gone.txt"]);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn close_during_search_discards_results() {
  local(async {
    let h = Harness::new(
      MemoryHost::new(None),
      FakeEngine::new(hello_corpus()).with_latency(Duration::from_secs(1)),
      &TelescopeConfig::default(),
    );
    let doc = h.show().await;
    h.host.type_text("hello");
    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.engine.queries(), vec!["hello"]);

    h.overlay.close().await;
    h.overlay.settled().await;
    time::sleep(Duration::from_secs(2)).await;

    assert!(!h.overlay.is_open());
    assert!(h.overlay.results().is_empty());
    assert!(!h.host.is_open(doc));
    assert_eq!(h.host.listener_count(), 0);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn superseded_search_is_not_rendered() {
  local(async {
    let h = Harness::new(
      MemoryHost::new(None),
      FakeEngine::new(vec![hit("a.txt", 1, "help me"), hit("b.txt", 1, "hello world")])
        .with_latency(Duration::from_secs(1)),
      &TelescopeConfig::default(),
    );
    let doc = h.show().await;

    h.host.type_text("hel");
    time::sleep(Duration::from_millis(400)).await;
    h.host.type_text("lo");

    // The first search has returned by now, but a newer one is in flight.
    time::sleep(Duration::from_millis(950)).await;
    assert_eq!(h.engine.queries(), vec!["hel", "hello"]);
    assert!(h.overlay.results().is_empty());
    assert_eq!(h.lines(doc), vec!["> hello"]);

    h.overlay.settled().await;
    assert_eq!(h.overlay.results(), vec![hit("b.txt", 1, "hello world")]);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn reopening_starts_a_fresh_session() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let first = h.search("hello").await;

    let second = h.show().await;

    assert_ne!(first, second);
    assert!(!h.host.is_open(first));
    assert_eq!(h.lines(second), vec!["> "]);
    assert!(h.overlay.results().is_empty());
    assert_eq!(h.overlay.selected_index(), 0);
    assert_eq!(h.overlay.input_line(), 0);
    assert_eq!(h.host.listener_count(), 2);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn close_and_dispose_are_idempotent() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;
    h.host.type_text("hello");

    h.overlay.dispose();
    h.overlay.dispose();
    assert!(h.overlay.is_settled());
    assert_eq!(h.host.listener_count(), 0);

    h.overlay.close().await;
    h.overlay.close().await;
    assert!(!h.overlay.is_open());
    assert!(!h.host.is_open(doc));
    assert!(h.engine.queries().is_empty());
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dropping_controller_removes_listeners() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    h.show().await;
    let Harness { host, overlay, .. } = h;

    drop(overlay);

    assert_eq!(host.listener_count(), 0);
    host.type_text("hello");
  })
  .await;
}

fn run_navigation(count: usize, moves: &[bool]) -> bool {
  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .start_paused(true)
    .build()
    .unwrap();

  LocalSet::new().block_on(&runtime, async {
    let corpus = (0..count)
      .map(|index| hit(&format!("f{index}.txt"), 1, "needle"))
      .collect();
    let h = Harness::with_corpus(corpus);
    let doc = h.search("needle").await;

    let mut expected = count - 1;
    for &down in moves {
      if down {
        h.overlay.move_selection_down().await;
        expected = (expected + 1) % count;
      } else {
        h.overlay.move_selection_up().await;
        expected = (expected + count - 1) % count;
      }
    }

    let lines = h.lines(doc);
    let highlighted: Vec<usize> = lines[..count]
      .iter()
      .enumerate()
      .filter(|(_, line)| line.starts_with("> "))
      .map(|(index, _)| index)
      .collect();

    h.overlay.selected_index() == expected
      && highlighted == vec![expected]
      && lines.len() == count + 2
      && lines[count + 1] == "> needle"
  })
}

quickcheck! {
  fn navigation_moves_modulo_result_count(count: u8, moves: Vec<bool>) -> bool {
    let count = usize::from(count % 5) + 1;
    let moves: Vec<bool> = moves.into_iter().take(12).collect();
    run_navigation(count, &moves)
  }
}

#[tokio::test(flavor = "current_thread")]
async fn workspace_search_end_to_end() {
  local(async {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), "hello world\n").unwrap();
    std::fs::write(root.path().join("b.txt"), "nothing\nsay hello\n").unwrap();
    let config = TelescopeConfig {
      debounce_ms: 10,
      ..TelescopeConfig::default()
    };
    let host = Rc::new(MemoryHost::new(Some(root.path().to_path_buf())));
    let engine = Rc::new(crate::search::WorkspaceSearch::new(
      Some(root.path().to_path_buf()),
      (&config).into(),
    ));
    let overlay = OverlayController::new(host.clone(), engine, &config);

    overlay.show().await.unwrap();
    let doc = overlay.document().unwrap();
    host.type_text("HELLO");
    overlay.settled().await;

    assert_eq!(host.lines(doc), vec![
      "  a.txt:1: hello world",
      "> b.txt:2: say hello",
      "",
      "> HELLO",
    ]);

    overlay.select_result().await;
    assert_eq!(
      host.active_location(),
      Some(OpenedLocation {
        path:   root.path().join("b.txt"),
        cursor: Position::new(1, 0),
      })
    );
  })
  .await;
}

#[tokio::test(flavor = "current_thread")]
async fn line_breaks_inside_matches_keep_input_line_last() {
  local(async {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), "page\x0Chello\nfoo\rhello bar\n").unwrap();
    let config = TelescopeConfig {
      debounce_ms: 10,
      ..TelescopeConfig::default()
    };
    let host = Rc::new(MemoryHost::new(Some(root.path().to_path_buf())));
    let engine = Rc::new(crate::search::WorkspaceSearch::new(
      Some(root.path().to_path_buf()),
      (&config).into(),
    ));
    let overlay = OverlayController::new(host.clone(), engine, &config);

    overlay.show().await.unwrap();
    let doc = overlay.document().unwrap();
    host.type_text("hello");
    overlay.settled().await;

    let lines = host.lines(doc);
    assert_eq!(lines, vec![
      "  a.txt:1: page hello",
      "> a.txt:2: foo hello bar",
      "",
      "> hello",
    ]);
    assert_eq!(overlay.input_line(), lines.len() - 1);
    assert_eq!(host.cursor(doc), Some(Position::new(3, 7)));

    host.type_text("x");
    let lines = host.lines(doc);
    assert_eq!(lines.last().map(String::as_str), Some("> hellox"));
    assert_eq!(host.cursor(doc), Some(Position::new(lines.len() - 1, 8)));

    overlay.settled().await;
    assert_eq!(host.lines(doc), vec!["", "> hellox"]);
    assert_eq!(overlay.input_line(), 1);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn settled_returns_once_results_render() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.show().await;

    let start = time::Instant::now();
    h.overlay.settled().await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    h.host.type_text("hello");
    h.overlay.settled().await;

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(302));
    assert_eq!(h.lines(doc).len(), 4);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn reopening_during_a_render_keeps_the_new_session() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let first = h.search("hello").await;

    let overlay = h.overlay.clone();
    let render = tokio::task::spawn_local(async move { overlay.move_selection_down().await });
    tokio::task::yield_now().await;
    let second = h.show().await;
    render.await.unwrap();
    h.overlay.settled().await;

    assert!(!h.host.is_open(first));
    assert_eq!(h.lines(second), vec!["> "]);
    assert!(h.overlay.results().is_empty());
    assert_eq!(h.host.cursor(second), Some(Position::new(0, 2)));
    assert_eq!(h.host.listener_count(), 2);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn multi_range_edit_missing_input_line_is_ignored() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;

    h.host.replace_ranges(&[
      (TextRange::new(Position::new(0, 0), Position::new(0, 2)), ""),
      (TextRange::point(Position::new(3, 7)), "x"),
    ]);

    assert!(h.overlay.is_settled());
    assert_eq!(h.lines(doc)[0], "a.txt:1: hello world");
    assert_eq!(h.lines(doc)[3], "> hellox");
    assert_eq!(h.overlay.input_line(), 3);
    assert_eq!(h.host.cursor(doc), Some(Position::new(3, 8)));

    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.engine.queries(), vec!["hello"]);
  })
  .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn multi_range_edit_on_input_line_schedules_search() {
  local(async {
    let h = Harness::with_corpus(hello_corpus());
    let doc = h.search("hello").await;

    h.host.replace_ranges(&[
      (TextRange::new(Position::new(3, 2), Position::new(3, 3)), "j"),
      (TextRange::point(Position::new(3, 7)), "y"),
    ]);
    assert!(!h.overlay.is_settled());

    h.overlay.settled().await;
    assert_eq!(h.engine.queries(), vec!["hello", "jelloy"]);
    assert_eq!(h.lines(doc), vec!["", "> jelloy"]);
  })
  .await;
}
