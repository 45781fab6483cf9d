//! Fixed transition table.
//!
//! A (state, event) pair either names a destination or is silently
//! ignored. Shutdown is terminal: no event leaves it.

use std::fmt;

use stepwise_core::{ControlEvent, State};

/// Events accepted by the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateEvent {
    /// Startup finished.
    StartupDone,
    /// Begin configuration.
    Initialize,
    /// Configuration finished.
    InitDone,
    /// Begin running.
    Start,
    /// Return to Idle.
    Stop,
    /// Enter Error.
    Error,
    /// Leave Error.
    ErrorFixed,
    /// Return to Startup.
    Restart,
    /// Terminate.
    Shutdown,
}

impl StateEvent {
    /// Every event, in declaration order.
    pub const ALL: [StateEvent; 9] = [
        StateEvent::StartupDone,
        StateEvent::Initialize,
        StateEvent::InitDone,
        StateEvent::Start,
        StateEvent::Stop,
        StateEvent::Error,
        StateEvent::ErrorFixed,
        StateEvent::Restart,
        StateEvent::Shutdown,
    ];
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StartupDone => "StartupDone",
            Self::Initialize => "Initialize",
            Self::InitDone => "InitDone",
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Error => "Error",
            Self::ErrorFixed => "ErrorFixed",
            Self::Restart => "Restart",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(s)
    }
}

impl From<ControlEvent> for StateEvent {
    fn from(event: ControlEvent) -> Self {
        match event {
            ControlEvent::Initialize => Self::Initialize,
            ControlEvent::Start => Self::Start,
            ControlEvent::Stop => Self::Stop,
            ControlEvent::Shutdown => Self::Shutdown,
            ControlEvent::ErrorFixed => Self::ErrorFixed,
            ControlEvent::Restart => Self::Restart,
        }
    }
}

/// Destination of `event` in state `from`, if the pair is defined.
///
/// An Error event during Startup leads to Shutdown: a participant that
/// fails before it finished booting is torn down.
pub fn destination(from: State, event: StateEvent) -> Option<State> {
    use StateEvent as E;
    match (from, event) {
        (State::Shutdown, _) => None,
        (_, E::Shutdown) => Some(State::Shutdown),
        (State::Startup, E::StartupDone) => Some(State::Idle),
        (State::Startup, E::Error) => Some(State::Shutdown),
        (_, E::Error) => Some(State::Error),
        (State::Idle, E::Initialize) => Some(State::Initializing),
        (State::Idle, E::Restart) => Some(State::Startup),
        (State::Initializing, E::InitDone) => Some(State::Ready),
        (State::Initializing | State::Ready | State::Running, E::Stop) => Some(State::Idle),
        (State::Ready, E::Start) => Some(State::Running),
        (State::Error, E::ErrorFixed) => Some(State::Idle),
        _ => None,
    }
}

/// Whether the move from `from` to `to` discards in-flight work, so
/// entry listeners get a chance to clean up first.
pub fn needs_clean_up(from: State, to: State) -> bool {
    match to {
        State::Startup | State::Shutdown => matches!(from, State::Idle | State::Error),
        State::Idle => from == State::Error,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_path() {
        let path = [
            (State::Startup, StateEvent::StartupDone, State::Idle),
            (State::Idle, StateEvent::Initialize, State::Initializing),
            (State::Initializing, StateEvent::InitDone, State::Ready),
            (State::Ready, StateEvent::Start, State::Running),
            (State::Running, StateEvent::Stop, State::Idle),
            (State::Idle, StateEvent::Restart, State::Startup),
        ];
        for (from, event, to) in path {
            assert_eq!(destination(from, event), Some(to), "{from} + {event}");
        }
    }

    #[test]
    fn full_table() {
        use State::*;
        // Rows follow State::ALL, columns follow StateEvent::ALL.
        let expected: [[Option<State>; 9]; 7] = [
            [Some(Idle), None, None, None, None, Some(Shutdown), None, None, Some(Shutdown)],
            [None, Some(Initializing), None, None, None, Some(Error), None, Some(Startup), Some(Shutdown)],
            [None, None, Some(Ready), None, Some(Idle), Some(Error), None, None, Some(Shutdown)],
            [None, None, None, Some(Running), Some(Idle), Some(Error), None, None, Some(Shutdown)],
            [None, None, None, None, Some(Idle), Some(Error), None, None, Some(Shutdown)],
            [None, None, None, None, None, Some(Error), Some(Idle), None, Some(Shutdown)],
            [None, None, None, None, None, None, None, None, None],
        ];
        for (from, row) in State::ALL.into_iter().zip(expected) {
            for (event, to) in StateEvent::ALL.into_iter().zip(row) {
                assert_eq!(destination(from, event), to, "{from} + {event}");
            }
        }
    }

    #[test]
    fn control_events_map_to_state_events() {
        assert_eq!(StateEvent::from(ControlEvent::ErrorFixed), StateEvent::ErrorFixed);
        assert_eq!(StateEvent::from(ControlEvent::Shutdown), StateEvent::Shutdown);
    }

    #[test]
    fn clean_up_pairs() {
        assert!(needs_clean_up(State::Idle, State::Startup));
        assert!(needs_clean_up(State::Error, State::Shutdown));
        assert!(needs_clean_up(State::Error, State::Idle));
        assert!(!needs_clean_up(State::Startup, State::Shutdown));
        assert!(!needs_clean_up(State::Running, State::Idle));
        assert!(!needs_clean_up(State::Running, State::Shutdown));
    }
}
