//! Participant lifecycle states.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a participant.
///
/// Startup is the initial state and Shutdown the terminal one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    /// Booting; entered once when the machine fires up.
    Startup,
    /// Ready to be configured.
    Idle,
    /// Applying configuration.
    Initializing,
    /// Configured and waiting to run.
    Ready,
    /// Simulation running.
    Running,
    /// Recoverable fault.
    Error,
    /// Terminal.
    Shutdown,
}

impl State {
    /// Every state, in declaration order.
    pub const ALL: [State; 7] = [
        State::Startup,
        State::Idle,
        State::Initializing,
        State::Ready,
        State::Running,
        State::Error,
        State::Shutdown,
    ];

    /// Dense index for table lookups.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Canonical name, as published under `Header.CurrentState`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "Startup",
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Error => "Error",
            Self::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or(CoreError::InvalidArgument)
    }
}
