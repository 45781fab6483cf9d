//! Core types and traits for the Stepwise simulation middleware.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every subsystem: signal handles and
//! timestamps, the error taxonomy, incidents, participant states,
//! property values, the command/notification model, and the narrow
//! collaborator traits behind which transports, signal registries and
//! diagnostics sinks are plugged in.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod cancel;
pub mod error;
pub mod id;
pub mod incident;
pub mod message;
pub mod paths;
pub mod sample;
pub mod state;
pub mod traits;
pub mod value;

pub use cancel::CancelToken;
pub use error::CoreError;
pub use id::{ListenerId, SignalDirection, SignalHandle, Timestamp, INVALID_TIMESTAMP};
pub use incident::{Incident, IncidentCode, Severity};
pub use message::{
    ChangeEvent, Command, CommandKind, ControlEvent, MessageHeader, Notification,
    NotificationKind, ScheduleEntry, BROADCAST,
};
pub use sample::{DataSample, SignalDescription};
pub use state::State;
pub use traits::{
    CommandListener, DataListener, ErrorTrigger, IncidentSink, NotificationListener,
    PropertyListener, PropertyStore, RemotePropertyAccess, SignalRegistry, Transport,
};
pub use value::{FromValue, PropertyChange, PropertyData, Value, ValueType};

// Compile-time assertion: the shared vocabulary must cross threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<CoreError>();
    assert::<Incident>();
    assert::<Command>();
    assert::<Notification>();
    assert::<DataSample>();
    assert::<CancelToken>();
};
