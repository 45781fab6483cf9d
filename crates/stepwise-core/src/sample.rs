//! Data samples and signal descriptions.

use crate::id::{SignalDirection, SignalHandle, Timestamp};

/// One timestamped instance of a signal's payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSample {
    /// Signal the sample belongs to.
    pub handle: SignalHandle,
    /// Simulation time in microseconds.
    pub time: Timestamp,
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

impl DataSample {
    /// A zeroed sample of `size` bytes at time 0.
    pub fn zeroed(handle: SignalHandle, size: usize) -> Self {
        Self {
            handle,
            time: 0,
            data: vec![0; size],
        }
    }

    /// Sample with the given content.
    pub fn new(handle: SignalHandle, time: Timestamp, data: Vec<u8>) -> Self {
        Self { handle, time, data }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Description handed to the signal registry when registering a signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalDescription {
    /// Signal name, unique per direction.
    pub name: String,
    /// Name of the payload type.
    pub type_name: String,
    /// Payload size in bytes.
    pub size: usize,
    /// Input or output.
    pub direction: SignalDirection,
    /// Number of samples retained.
    pub backlog: usize,
}

impl SignalDescription {
    /// Raw byte signal with a backlog of one.
    pub fn raw(name: impl Into<String>, size: usize, direction: SignalDirection) -> Self {
        Self {
            name: name.into(),
            type_name: String::from("raw"),
            size,
            direction,
            backlog: 1,
        }
    }

    /// Builder: set the backlog.
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }
}
