//! A cancellable, single-slot debounce timer.

use std::{
  cell::Cell,
  future::Future,
  rc::Rc,
  time::Duration,
};

use tokio::{
  task::{
    self,
    JoinHandle,
  },
  time,
};

/// Owns at most one scheduled task. Scheduling again cancels the previous
/// timer if it has not fired yet, so a burst of events collapses into a single
/// run once the burst has been quiet for `delay`.
///
/// Work that has already started is never aborted: once the timer fires, the
/// task is detached from the debouncer and runs to completion on its own.
#[derive(Debug)]
pub struct Debouncer {
  delay:   Duration,
  pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
  handle: JoinHandle<()>,
  fired:  Rc<Cell<bool>>,
}

impl Debouncer {
  pub fn new(delay: Duration) -> Self {
    Self {
      delay,
      pending: None,
    }
  }

  pub fn delay(&self) -> Duration {
    self.delay
  }

  /// Cancel any timer that has not fired and schedule `work` to run after the
  /// debounce delay. Must be called from within a `LocalSet`.
  pub fn schedule<F>(&mut self, work: F)
  where
    F: Future<Output = ()> + 'static,
  {
    self.cancel();

    let delay = self.delay;
    let fired = Rc::new(Cell::new(false));
    let fired_flag = Rc::clone(&fired);
    let handle = task::spawn_local(async move {
      time::sleep(delay).await;
      fired_flag.set(true);
      work.await;
    });

    self.pending = Some(Pending { handle, fired });
  }

  /// Cancel the timer if it has not fired yet. Returns whether a live timer
  /// was cancelled. Idempotent.
  pub fn cancel(&mut self) -> bool {
    let Some(pending) = self.pending.take() else {
      return false;
    };

    if pending.fired.get() || pending.handle.is_finished() {
      // Dropping the handle detaches the running task.
      return false;
    }

    pending.handle.abort();
    log::trace!("debounce timer cancelled");
    true
  }

  /// Whether a timer is waiting to fire.
  pub fn is_pending(&self) -> bool {
    self
      .pending
      .as_ref()
      .is_some_and(|pending| !pending.fired.get() && !pending.handle.is_finished())
  }
}

impl Drop for Debouncer {
  fn drop(&mut self) {
    self.cancel();
  }
}
