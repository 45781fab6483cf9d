//! Transition listener traits and the registries holding them.
//!
//! Closures with the matching signature implement the traits, so simple
//! callers can register a `move |to, from| ...` directly.

use std::sync::Arc;

use parking_lot::Mutex;
use stepwise_core::{CoreError, ListenerId, State};

/// Consulted before a transition; an error vetoes it.
pub trait StateRequestListener: Send + Sync {
    /// `requested` is the destination, `current` the state being left.
    fn on_request(&self, requested: State, current: State) -> Result<(), CoreError>;
}

impl<F> StateRequestListener for F
where
    F: Fn(State, State) -> Result<(), CoreError> + Send + Sync,
{
    fn on_request(&self, requested: State, current: State) -> Result<(), CoreError> {
        self(requested, current)
    }
}

/// Called when a state is left.
pub trait StateExitListener: Send + Sync {
    /// `leaving` is the current state, `next` the destination.
    fn on_exit(&self, leaving: State, next: State) -> Result<(), CoreError>;
}

impl<F> StateExitListener for F
where
    F: Fn(State, State) -> Result<(), CoreError> + Send + Sync,
{
    fn on_exit(&self, leaving: State, next: State) -> Result<(), CoreError> {
        self(leaving, next)
    }
}

/// Called when a state is entered.
pub trait StateEntryListener: Send + Sync {
    /// `entered` is the new state, `previous` the one that was left.
    fn on_entry(&self, entered: State, previous: State) -> Result<(), CoreError>;

    /// Discard in-flight work before a restart-style transition out of
    /// `from`.
    fn clean_up(&self, _from: State) -> Result<(), CoreError> {
        Ok(())
    }
}

impl<F> StateEntryListener for F
where
    F: Fn(State, State) -> Result<(), CoreError> + Send + Sync,
{
    fn on_entry(&self, entered: State, previous: State) -> Result<(), CoreError> {
        self(entered, previous)
    }
}

/// Registered listeners of one kind. Iteration always works on a
/// snapshot, so callbacks may register or unregister listeners.
pub(crate) struct ListenerSet<T: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Arc<T>)>>,
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn add(&self, listener: Arc<T>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> Result<(), CoreError> {
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .position(|(i, _)| *i == id)
            .ok_or(CoreError::NotFound)?;
        entries.remove(pos);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.lock().iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    /// Call `f` on every listener and keep the first error.
    pub fn call_all(&self, mut f: impl FnMut(&T) -> Result<(), CoreError>) -> Result<(), CoreError> {
        let mut first = Ok(());
        for listener in self.snapshot() {
            if let Err(e) = f(&*listener) {
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }
}
