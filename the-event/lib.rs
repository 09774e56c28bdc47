//! Event plumbing shared by the telescope crates.
//!
//! Everything here is single-threaded: listeners are `Rc` closures and
//! debounced work runs as `spawn_local` tasks, so callers must be inside a
//! [`tokio::task::LocalSet`].

mod debounce;
mod listeners;

pub use debounce::Debouncer;
pub use listeners::{
  ListenerId,
  Listeners,
};
