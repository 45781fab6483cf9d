//! Timing configuration types and validation.
//!
//! The timing configuration arrives already parsed; this module only
//! defines its shape and checks it.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use stepwise_core::{CoreError, Timestamp};
use stepwise_data::InputConfig;

/// Reaction to a step that overran its runtime budget, or to a trigger
/// that fell due while the previous step was still computing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeViolationStrategy {
    /// Proceed silently.
    IgnoreRuntimeViolation,
    /// Proceed with a Warning incident.
    WarnAboutRuntimeViolation,
    /// Raise a CriticalGlobal incident and drop this step's outputs.
    SkipOutputPublish,
    /// Raise a CriticalGlobal incident, drop outputs, send no
    /// acknowledgement, stop the task and drive the state machine to Error.
    SetStmToError,
}

/// Output of a step. Carries no settings yet; the name is the key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputConfig {}

/// Configuration of one step listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepConfig {
    /// Simulation time between two steps in microseconds. Must be positive.
    pub cycle_time_us: Timestamp,
    /// Wall-clock budget of one step in microseconds; 0 disables the check.
    pub max_runtime_us: Timestamp,
    /// Wall-clock budget for waiting on inputs in microseconds.
    pub max_input_wait_us: Timestamp,
    /// Reaction to budget overruns.
    pub violation_strategy: TimeViolationStrategy,
    /// Inputs by signal name.
    pub inputs: BTreeMap<String, InputConfig>,
    /// Outputs by signal name.
    pub outputs: BTreeMap<String, OutputConfig>,
}

impl StepConfig {
    /// A step every `cycle_time_us` with no budget and no signals.
    pub fn new(cycle_time_us: Timestamp) -> Self {
        Self {
            cycle_time_us,
            max_runtime_us: 0,
            max_input_wait_us: 0,
            violation_strategy: TimeViolationStrategy::IgnoreRuntimeViolation,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Builder: set the runtime budget and its strategy.
    pub fn with_runtime_budget(
        mut self,
        max_runtime_us: Timestamp,
        strategy: TimeViolationStrategy,
    ) -> Self {
        self.max_runtime_us = max_runtime_us;
        self.violation_strategy = strategy;
        self
    }

    /// Builder: add an input.
    pub fn with_input(mut self, name: impl Into<String>, config: InputConfig) -> Self {
        self.inputs.insert(name.into(), config);
        self
    }

    /// Builder: add an output.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), OutputConfig::default());
        self
    }

    /// Input wait budget as a duration.
    pub fn max_input_wait(&self) -> Duration {
        Duration::from_micros(self.max_input_wait_us.max(0) as u64)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), TimingConfigError> {
        if self.cycle_time_us <= 0 {
            return Err(TimingConfigError::NonPositiveCycleTime {
                value: self.cycle_time_us,
            });
        }
        if self.max_runtime_us < 0 {
            return Err(TimingConfigError::NegativeBudget {
                name: "max_runtime_us",
                value: self.max_runtime_us,
            });
        }
        if self.max_input_wait_us < 0 {
            return Err(TimingConfigError::NegativeBudget {
                name: "max_input_wait_us",
                value: self.max_input_wait_us,
            });
        }
        Ok(())
    }
}

/// Timing of one participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantTiming {
    /// Seconds without a trigger before the participant is considered
    /// lost. Default: 10.
    pub system_timeout_s: i64,
    /// Step configurations by step listener name.
    pub tasks: BTreeMap<String, StepConfig>,
    /// Backlog sizes by input signal name.
    pub input_backlogs: BTreeMap<String, usize>,
}

impl Default for ParticipantTiming {
    fn default() -> Self {
        Self {
            system_timeout_s: 10,
            tasks: BTreeMap::new(),
            input_backlogs: BTreeMap::new(),
        }
    }
}

/// Timing of a whole simulation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimingConfiguration {
    /// Participants by element name.
    pub participants: BTreeMap<String, ParticipantTiming>,
}

/// Configuration of a [`TimingClient`](crate::TimingClient).
///
/// `system_timeout`, `master_name` and `use_multicast` are written to the
/// property tree at construction and read back by `configure`, so later
/// property changes take effect.
#[derive(Clone, Debug)]
pub struct TimingClientConfig {
    /// Element name used when the property tree does not provide one.
    pub element_name: String,
    /// Time without a trigger before an Error is raised. Zero disables
    /// the watchdog. Default: 300 s.
    pub system_timeout: Duration,
    /// Watchdog tick. Default: 100 ms.
    pub watchdog_period: Duration,
    /// Participant sending triggers and schedule requests.
    pub master_name: String,
    /// Ask the transport to receive triggers by multicast.
    pub use_multicast: bool,
}

impl Default for TimingClientConfig {
    fn default() -> Self {
        Self {
            element_name: String::new(),
            system_timeout: Duration::from_secs(300),
            watchdog_period: Duration::from_millis(100),
            master_name: String::new(),
            use_multicast: false,
        }
    }
}

impl TimingClientConfig {
    /// Configuration for `element_name` driven by `master_name`.
    pub fn new(element_name: impl Into<String>, master_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            master_name: master_name.into(),
            ..Self::default()
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), TimingConfigError> {
        if self.element_name.is_empty() {
            return Err(TimingConfigError::EmptyElementName);
        }
        if self.watchdog_period.is_zero() {
            return Err(TimingConfigError::ZeroWatchdogPeriod);
        }
        Ok(())
    }
}

/// Invalid timing configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimingConfigError {
    /// Cycle time must be positive.
    NonPositiveCycleTime {
        /// Configured value.
        value: Timestamp,
    },
    /// A budget was negative.
    NegativeBudget {
        /// Field name.
        name: &'static str,
        /// Configured value.
        value: Timestamp,
    },
    /// No element name was given.
    EmptyElementName,
    /// The watchdog period was zero.
    ZeroWatchdogPeriod,
    /// Step listeners exist but no timing master is configured.
    NoMaster,
}

impl fmt::Display for TimingConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveCycleTime { value } => {
                write!(f, "cycle time must be positive, got {value} us")
            }
            Self::NegativeBudget { name, value } => {
                write!(f, "{name} must not be negative, got {value}")
            }
            Self::EmptyElementName => write!(f, "element name must not be empty"),
            Self::ZeroWatchdogPeriod => write!(f, "watchdog period must be non-zero"),
            Self::NoMaster => write!(f, "no timing master configured"),
        }
    }
}

impl Error for TimingConfigError {}

impl From<TimingConfigError> for CoreError {
    fn from(_: TimingConfigError) -> Self {
        CoreError::InvalidArgument
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_config_rejects_bad_values() {
        assert_eq!(
            StepConfig::new(0).validate(),
            Err(TimingConfigError::NonPositiveCycleTime { value: 0 })
        );
        let mut cfg = StepConfig::new(1_000);
        cfg.max_input_wait_us = -1;
        assert_eq!(
            cfg.validate(),
            Err(TimingConfigError::NegativeBudget {
                name: "max_input_wait_us",
                value: -1
            })
        );
        assert!(StepConfig::new(1_000).validate().is_ok());
    }

    #[test]
    fn client_defaults() {
        let cfg = TimingClientConfig::default();
        assert_eq!(cfg.system_timeout, Duration::from_secs(300));
        assert_eq!(cfg.validate(), Err(TimingConfigError::EmptyElementName));
        assert!(TimingClientConfig::new("A", "Master").validate().is_ok());
    }

    #[test]
    fn builders_collect_signals() {
        let cfg = StepConfig::new(10_000)
            .with_input("In", InputConfig::default())
            .with_output("Out")
            .with_runtime_budget(500, TimeViolationStrategy::SkipOutputPublish);
        assert_eq!(cfg.inputs.len(), 1);
        assert!(cfg.outputs.contains_key("Out"));
        assert_eq!(cfg.violation_strategy, TimeViolationStrategy::SkipOutputPublish);
    }
}
