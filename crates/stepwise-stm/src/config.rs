//! State machine configuration and validation.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use stepwise_core::CoreError;

/// Configuration for [`StateMachine`](crate::StateMachine).
#[derive(Clone, Debug)]
pub struct StateMachineConfig {
    /// Element name used when the property tree does not provide one.
    pub element_name: String,
    /// How long the event worker blocks before rechecking for shutdown.
    /// Default: 1 s.
    pub queue_poll_interval: Duration,
    /// Interval at which `perform_shutdown` re-sends the Shutdown event
    /// until Shutdown is reached. Default: 500 ms.
    pub shutdown_retry_interval: Duration,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            element_name: String::new(),
            queue_poll_interval: Duration::from_secs(1),
            shutdown_retry_interval: Duration::from_millis(500),
        }
    }
}

impl StateMachineConfig {
    /// Configuration for the participant called `element_name`.
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            ..Self::default()
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), StateMachineConfigError> {
        if self.element_name.is_empty() {
            return Err(StateMachineConfigError::EmptyElementName);
        }
        if self.queue_poll_interval.is_zero() {
            return Err(StateMachineConfigError::ZeroInterval {
                name: "queue_poll_interval",
            });
        }
        if self.shutdown_retry_interval.is_zero() {
            return Err(StateMachineConfigError::ZeroInterval {
                name: "shutdown_retry_interval",
            });
        }
        Ok(())
    }
}

/// Invalid [`StateMachineConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateMachineConfigError {
    /// No element name was given.
    EmptyElementName,
    /// An interval was zero.
    ZeroInterval {
        /// Field name.
        name: &'static str,
    },
}

impl fmt::Display for StateMachineConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyElementName => write!(f, "element name must not be empty"),
            Self::ZeroInterval { name } => write!(f, "{name} must be non-zero"),
        }
    }
}

impl Error for StateMachineConfigError {}

impl From<StateMachineConfigError> for CoreError {
    fn from(_: StateMachineConfigError) -> Self {
        CoreError::InvalidArgument
    }
}
