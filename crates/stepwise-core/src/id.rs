//! Strongly-typed identifiers and the [`Timestamp`] type alias.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Simulation or wall-clock time in microseconds.
pub type Timestamp = i64;

/// Timestamp carried by a slot that has never received a real sample.
pub const INVALID_TIMESTAMP: Timestamp = -1;

/// Identifies a registered signal.
///
/// Handles are issued by the signal registry at registration and stay
/// valid until the signal is unregistered. Each handle owns exactly one
/// sample buffer in the data access layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalHandle(pub u32);

impl fmt::Display for SignalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SignalHandle {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Counter for unique [`ListenerId`] allocation.
static LISTENER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returned by every listener registration; pass it back to unregister.
///
/// Allocated from a process-wide monotonic counter, so an id is never
/// reused even after its listener has been removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a fresh, unique listener ID. Thread-safe.
    pub fn next() -> Self {
        Self(LISTENER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a signal is consumed or produced by this participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalDirection {
    /// Samples arrive from the transport.
    Input,
    /// Samples are published by this participant.
    Output,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_ids_are_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn signal_handle_display() {
        assert_eq!(SignalHandle(7).to_string(), "7");
        assert_eq!(SignalHandle::from(3), SignalHandle(3));
    }
}
