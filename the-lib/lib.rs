//! A search overlay that lives inside an ordinary text document.
//!
//! The user types a query on the last line of a transient buffer, results are
//! rendered above it, and picking one navigates the host editor to the match.
//! The editor itself is abstracted behind [`host::Host`]; searching behind
//! [`search::SearchEngine`].

pub mod command;
pub mod config;
pub mod host;
pub mod memory;
pub mod overlay;
pub mod protocol;
pub mod search;

pub use command::Command;
pub use config::TelescopeConfig;
pub use host::{
  DocumentId,
  Host,
  HostError,
};
pub use overlay::OverlayController;
pub use search::{
  Match,
  SearchEngine,
  WorkspaceSearch,
};
