//! Error taxonomy shared by every Stepwise subsystem.
//!
//! Sample-buffer, property and lifecycle operations report failures to
//! their immediate caller as a [`CoreError`]. Nothing is thrown across a
//! public boundary; `NotFound` and `Timeout` in particular are expected
//! steady-state outcomes for polling readers, not exceptional faults.

use std::error::Error;
use std::fmt;

/// Result codes returned by core operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoreError {
    /// Malformed or contradictory input, e.g. an inverted time window
    /// or a wildcard element name.
    InvalidArgument,
    /// A path, signal, slot or listener does not exist.
    NotFound,
    /// A bounded wait elapsed before its condition was met.
    Timeout,
    /// The resource is occupied: every backlog slot is locked, a name is
    /// already registered, or teardown is in progress.
    ResourceInUse,
    /// A typed property access did not match the stored value type.
    InvalidType,
    /// Generic failure: double unlock, transmit failure, listener error.
    Failed,
    /// An explicit cancellation signal was observed.
    Cancelled,
    /// The operation is not allowed in the current lifecycle phase.
    InvalidState,
    /// A copied input still holds the registration placeholder sample.
    OutOfSync,
}

impl CoreError {
    /// Stable numeric code, used when a result travels inside a message.
    pub fn code(self) -> i32 {
        match self {
            Self::InvalidArgument => -5,
            Self::NotFound => -20,
            Self::Timeout => -34,
            Self::ResourceInUse => -15,
            Self::InvalidType => -36,
            Self::Failed => -38,
            Self::Cancelled => -40,
            Self::InvalidState => -41,
            Self::OutOfSync => -42,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "not found"),
            Self::Timeout => write!(f, "timed out"),
            Self::ResourceInUse => write!(f, "resource in use"),
            Self::InvalidType => write!(f, "invalid type"),
            Self::Failed => write!(f, "operation failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::InvalidState => write!(f, "invalid state for this operation"),
            Self::OutOfSync => write!(f, "sample out of sync"),
        }
    }
}

impl Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let all = [
            CoreError::InvalidArgument,
            CoreError::NotFound,
            CoreError::Timeout,
            CoreError::ResourceInUse,
            CoreError::InvalidType,
            CoreError::Failed,
            CoreError::Cancelled,
            CoreError::InvalidState,
            CoreError::OutOfSync,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code(), "{a} and {b} share a code");
            }
        }
    }

    #[test]
    fn display_is_lowercase_prose() {
        assert_eq!(CoreError::Timeout.to_string(), "timed out");
        assert_eq!(CoreError::ResourceInUse.to_string(), "resource in use");
    }
}
