//! Stepwise: middleware for distributed real-time simulations.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Stepwise sub-crates. A participant plugs its own transport, signal
//! registry and incident sink in through the traits in [`types`].
//!
//! # Quick start
//!
//! ```rust
//! use stepwise::prelude::*;
//! use stepwise::types::paths;
//!
//! let tree = PropertyTree::new();
//! tree.set_value(paths::ELEMENT_NAME, "Plant").unwrap();
//! tree.set_value("Timing.TimingClient.SystemTimeout_s", 30).unwrap();
//!
//! let name: String = tree.get_value(paths::ELEMENT_NAME, 0).unwrap();
//! assert_eq!(name, "Plant");
//! assert_eq!(tree.get_value::<i32>(paths::SYSTEM_TIMEOUT, 0), Ok(30));
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `stepwise-core` | Handles, errors, incidents, states, messages, collaborator traits |
//! | [`data`] | `stepwise-data` | Sample buffers, data access, per-step input/output access |
//! | [`props`] | `stepwise-props` | Property tree, mirrors, remote property protocol |
//! | [`stm`] | `stepwise-stm` | Participant state machine |
//! | [`timing`] | `stepwise-timing` | Timing client, tasks and trigger wire format |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Shared vocabulary and collaborator traits (`stepwise-core`).
///
/// Implement [`types::Transport`], [`types::SignalRegistry`] and
/// [`types::IncidentSink`] to connect Stepwise to a bus.
pub use stepwise_core as types;

/// Sample buffers and data access (`stepwise-data`).
///
/// [`data::DataAccess`] owns one [`data::SampleBuffer`] per input signal;
/// step listeners see their inputs through [`data::StepDataAccess`].
pub use stepwise_data as data;

/// Property tree and remote property protocol (`stepwise-props`).
pub use stepwise_props as props;

/// Participant state machine (`stepwise-stm`).
pub use stepwise_stm as stm;

/// Locked-step timing (`stepwise-timing`).
///
/// [`timing::TimingClient`] drives registered step listeners from the
/// timing master's triggers.
pub use stepwise_timing as timing;

/// Common imports for typical Stepwise usage.
///
/// ```rust
/// use stepwise::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use stepwise_core::{
        Command, CommandKind, ControlEvent, DataSample, Notification, NotificationKind,
        SignalDescription, SignalDirection, SignalHandle, State, Timestamp, Value,
    };
    pub use stepwise_core::{
        CommandListener, DataListener, ErrorTrigger, IncidentSink, NotificationListener,
        PropertyListener, PropertyStore, RemotePropertyAccess, SignalRegistry, Transport,
    };

    // Errors and incidents
    pub use stepwise_core::{CoreError, Incident, IncidentCode, Severity};

    // Data
    pub use stepwise_data::{DataAccess, InputConfig, InputViolationStrategy, StepDataAccess};

    // Properties
    pub use stepwise_props::{PropertyTree, RemoteProperties};

    // State machine
    pub use stepwise_stm::{StateMachine, StateMachineConfig, StateMachineContext};

    // Timing
    pub use stepwise_timing::{
        StepConfig, StepListener, TimeViolationStrategy, TimingClient, TimingClientConfig,
        TimingConfiguration, TimingContext,
    };
}
