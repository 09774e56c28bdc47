//! Subscriber lists for host events.

use std::{
  cell::{
    Cell,
    RefCell,
  },
  fmt,
  rc::Rc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
  pub const fn get(self) -> u64 {
    self.0
  }
}

impl fmt::Display for ListenerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "listener#{}", self.0)
  }
}

type Callback<E> = Rc<dyn Fn(&E)>;

/// An ordered list of callbacks for one event type.
///
/// Emission works on a snapshot of the list, so a callback may subscribe or
/// unsubscribe (itself included) while it is being notified.
pub struct Listeners<E> {
  next_id: Cell<u64>,
  entries: RefCell<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Listeners<E> {
  pub fn new() -> Self {
    Self {
      next_id: Cell::new(1),
      entries: RefCell::new(Vec::new()),
    }
  }

  pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> ListenerId {
    let id = ListenerId(self.next_id.get());
    self.next_id.set(id.0 + 1);
    self.entries.borrow_mut().push((id, Rc::new(callback)));
    id
  }

  /// Remove a subscription. Returns `false` if it was already gone.
  pub fn unsubscribe(&self, id: ListenerId) -> bool {
    let mut entries = self.entries.borrow_mut();
    let before = entries.len();
    entries.retain(|(entry_id, _)| *entry_id != id);
    entries.len() != before
  }

  pub fn contains(&self, id: ListenerId) -> bool {
    self.entries.borrow().iter().any(|(entry_id, _)| *entry_id == id)
  }

  pub fn len(&self) -> usize {
    self.entries.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.borrow().is_empty()
  }

  pub fn emit(&self, event: &E) {
    let snapshot: Vec<_> = self
      .entries
      .borrow()
      .iter()
      .map(|(id, callback)| (*id, Rc::clone(callback)))
      .collect();

    for (id, callback) in snapshot {
      // Skip callbacks removed by an earlier callback in this round.
      if self.contains(id) {
        callback(event);
      }
    }
  }
}

impl<E> Default for Listeners<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E> fmt::Debug for Listeners<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Listeners")
      .field("len", &self.len())
      .finish()
  }
}
