//! Line-oriented text search over the workspace.
//!
//! The overlay only depends on the [`SearchEngine`] contract: a query in, an
//! ordered and capped list of [`Match`]es out. [`WorkspaceSearch`] is the
//! stock implementation that walks the workspace root and scans every text
//! file for a case-insensitive substring.

use std::{
  fmt,
  path::{
    Path,
    PathBuf,
  },
};

use async_trait::async_trait;
use ignore::{
  DirEntry,
  WalkBuilder,
};

use crate::config::TelescopeConfig;

/// Directories that never contain searchable workspace text.
const VCS_DIRS: &[&str] = &[".git", ".pijul", ".jj", ".hg", ".svn"];

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
  /// Path relative to the workspace root, `/`-separated.
  pub file_path: String,
  /// 1-based line number.
  pub line:      usize,
  /// 0-based char offset of the first occurrence of the query in the line.
  pub column:    usize,
  /// The line content with surrounding whitespace trimmed.
  pub text:      String,
}

impl fmt::Display for Match {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}: {}", self.file_path, self.line, self.text)
  }
}

#[async_trait(?Send)]
pub trait SearchEngine {
  /// Search for `query`. Returns matches in file enumeration order, then line
  /// order. An empty or whitespace-only query yields no matches.
  async fn search(&self, query: &str) -> Vec<Match>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
  /// Hard cap on the number of matches returned.
  pub max_results: usize,
  /// Cap on the number of files enumerated per search.
  pub max_files:   usize,
  /// Directory names whose whole tree is skipped.
  pub ignore:      Vec<String>,
  /// Search hidden files and directories.
  pub hidden:      bool,
  /// Honour `.gitignore`, global git excludes and `.git/info/exclude`.
  pub git_ignore:  bool,
}

impl Default for SearchOptions {
  fn default() -> Self {
    Self::from(&TelescopeConfig::default())
  }
}

impl From<&TelescopeConfig> for SearchOptions {
  fn from(config: &TelescopeConfig) -> Self {
    Self {
      max_results: config.max_results,
      max_files:   config.max_files,
      ignore:      config.ignore.clone(),
      hidden:      config.hidden,
      git_ignore:  config.git_ignore,
    }
  }
}

/// Searches the files under a single workspace root.
#[derive(Debug, Clone)]
pub struct WorkspaceSearch {
  root:    Option<PathBuf>,
  options: SearchOptions,
}

impl WorkspaceSearch {
  pub fn new(root: Option<PathBuf>, options: SearchOptions) -> Self {
    Self { root, options }
  }

  pub fn root(&self) -> Option<&Path> {
    self.root.as_deref()
  }

  pub fn options(&self) -> &SearchOptions {
    &self.options
  }
}

#[async_trait(?Send)]
impl SearchEngine for WorkspaceSearch {
  async fn search(&self, query: &str) -> Vec<Match> {
    if query.trim().is_empty() {
      return Vec::new();
    }
    let Some(root) = self.root.clone() else {
      return Vec::new();
    };

    let options = self.options.clone();
    let walk_root = root.clone();
    let files = match tokio::task::spawn_blocking(move || enumerate_files(&walk_root, &options))
      .await
    {
      Ok(files) => files,
      Err(err) => {
        log::error!("workspace enumeration failed: {err}");
        return Vec::new();
      },
    };

    let max_results = self.options.max_results;
    let needle = query.to_lowercase();
    let mut results = Vec::new();

    for path in files {
      if results.len() >= max_results {
        break;
      }

      let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(err) => {
          log::debug!("skipping {}: {err}", path.display());
          continue;
        },
      };

      let file_path = relative_path(&root, &path);
      for (index, line) in text.split('\n').enumerate() {
        if results.len() >= max_results {
          break;
        }
        if let Some(column) = find_ignore_case(line, &needle) {
          results.push(Match {
            file_path: file_path.clone(),
            line: index + 1,
            column,
            text: line.trim().to_string(),
          });
        }
      }
    }

    log::debug!("search {query:?} produced {} matches", results.len());
    results
  }
}

fn filter_entry(entry: &DirEntry, ignore: &[String]) -> bool {
  let Some(name) = entry.file_name().to_str() else {
    return true;
  };
  if VCS_DIRS.contains(&name) {
    return false;
  }
  let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
  !(is_dir && ignore.iter().any(|ignored| ignored == name))
}

/// Collect up to `max_files` files under `root` in a stable order.
fn enumerate_files(root: &Path, options: &SearchOptions) -> Vec<PathBuf> {
  let ignore = options.ignore.clone();
  let walker = WalkBuilder::new(root)
    .hidden(!options.hidden)
    .parents(options.git_ignore)
    .git_ignore(options.git_ignore)
    .git_global(options.git_ignore)
    .git_exclude(options.git_ignore)
    .sort_by_file_name(|a, b| a.cmp(b))
    .filter_entry(move |entry| filter_entry(entry, &ignore))
    .build();

  let mut files = Vec::new();
  for entry in walker {
    if files.len() >= options.max_files {
      break;
    }
    let entry = match entry {
      Ok(entry) => entry,
      Err(err) => {
        log::warn!("workspace walker error: {err}");
        continue;
      },
    };
    if entry.file_type().is_some_and(|ft| ft.is_file()) {
      files.push(entry.into_path());
    }
  }
  files
}

fn relative_path(root: &Path, path: &Path) -> String {
  let relative = path.strip_prefix(root).unwrap_or(path);
  relative
    .components()
    .map(|component| component.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

/// Char offset of the first occurrence of `needle` (already lowercased) in
/// `line`, ignoring case.
fn find_ignore_case(line: &str, needle: &str) -> Option<usize> {
  let haystack = line.to_lowercase();
  let byte = haystack.find(needle)?;
  Some(haystack[..byte].chars().count())
}
