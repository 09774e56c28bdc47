//! User configuration for the telescope overlay.
//!
//! The configuration surface is intentionally small: a handful of constants
//! that tune debouncing, result caps and file enumeration. It is read from
//! `telescope.toml` in the user config directory.

use std::{
  borrow::Cow,
  fs,
  io,
  path::{
    Path,
    PathBuf,
  },
  time::Duration,
};

use etcetera::base_strategy::{
  BaseStrategy,
  choose_base_strategy,
};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "telescope.toml";
pub const CONFIG_DIR_ENV: &str = "THE_TELESCOPE_CONFIG_DIR";

/// Which result is highlighted after a query-triggered render.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
  First,
  #[default]
  Last,
}

impl SelectionPolicy {
  pub fn initial_index(self, len: usize) -> usize {
    match self {
      SelectionPolicy::First => 0,
      SelectionPolicy::Last => len.saturating_sub(1),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct TelescopeConfig {
  pub debounce_ms:       u64,
  pub max_results:       usize,
  pub max_files:         usize,
  pub ignore:            Vec<String>,
  pub hidden:            bool,
  pub git_ignore:        bool,
  pub initial_selection: SelectionPolicy,
}

impl Default for TelescopeConfig {
  fn default() -> Self {
    Self {
      debounce_ms:       300,
      max_results:       100,
      max_files:         1000,
      ignore:            vec!["node_modules".to_string()],
      hidden:            false,
      git_ignore:        true,
      initial_selection: SelectionPolicy::Last,
    }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("invalid config in {}: {source}", path.display())]
  Parse {
    path:   PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("unable to locate the config directory")]
  NoConfigDir,
}

impl TelescopeConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(source)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let source = fs::read_to_string(path).map_err(|source| {
      ConfigError::Io {
        path: path.to_path_buf(),
        source,
      }
    })?;
    Self::from_toml(&source).map_err(|source| {
      ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      }
    })
  }

  /// Load `telescope.toml` from [`config_dir`]. A missing file is not an
  /// error and yields the defaults.
  pub fn load_default() -> Result<Self, ConfigError> {
    let path = config_dir()?.join(CONFIG_FILE_NAME);
    match Self::load(&path) {
      Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
        log::debug!("no config at {}, using defaults", path.display());
        Ok(Self::default())
      },
      other => other,
    }
  }
}

pub fn config_dir() -> Result<PathBuf, ConfigError> {
  if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
    return Ok(expand_tilde(Path::new(&dir)).into_owned());
  }
  let strategy = choose_base_strategy().map_err(|_| ConfigError::NoConfigDir)?;
  let mut path = strategy.config_dir();
  path.push("the-telescope");
  Ok(path)
}

fn expand_tilde(path: &Path) -> Cow<'_, Path> {
  let Ok(rest) = path.strip_prefix("~") else {
    return Cow::Borrowed(path);
  };
  match choose_base_strategy() {
    Ok(strategy) => Cow::Owned(strategy.home_dir().join(rest)),
    Err(_) => Cow::Borrowed(path),
  }
}
