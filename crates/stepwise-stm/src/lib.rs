//! Participant state machine for the Stepwise simulation middleware.
//!
//! [`StateMachine`] moves a participant through
//! Startup, Idle, Initializing, Ready, Running, Error and Shutdown.
//! Transitions are driven by events, applied in order on a worker
//! thread, and observed through request, exit and entry listeners.
//! Every entered state is written to `Header.CurrentState` and
//! broadcast as a `State` notification. Control commands from other
//! participants map onto events unless standalone mode is enabled.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod listener;
pub mod machine;
mod notifier;
pub mod table;

pub use config::{StateMachineConfig, StateMachineConfigError};
pub use listener::{StateEntryListener, StateExitListener, StateRequestListener};
pub use machine::{StateMachine, StateMachineContext};
pub use table::StateEvent;

// Compile-time assertion: StateMachine must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<StateMachine>();
};
