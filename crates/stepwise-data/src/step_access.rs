//! Per-step-listener view on the data access layer.
//!
//! A [`StepDataAccess`] belongs to one timing task. Before each step it
//! checks that every configured input has a sample inside its validity
//! window; during the step the user callback reads inputs and stages
//! outputs through it; after the step the staged outputs are published
//! stamped with the end of the cycle, unless the step was marked to be
//! skipped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use stepwise_core::{
    CancelToken, CoreError, DataSample, ErrorTrigger, Incident, IncidentCode, IncidentSink,
    Severity, SignalHandle, Timestamp,
};

use crate::access::DataAccess;
use crate::buffer::SampleBuffer;

/// Reaction to an input that is not valid in time for a step.
///
/// Ordered by gravity; inputs are validated in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InputViolationStrategy {
    /// Proceed silently.
    IgnoreInputValidityViolation,
    /// Proceed with a Warning incident.
    WarnAboutInputValidityViolation,
    /// Proceed, but do not publish this step's outputs.
    SkipOutputPublish,
    /// Abort the step and drive the state machine to Error.
    SetStmToError,
}

/// Validity window of one input, relative to the step's simulation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputConfig {
    /// Oldest acceptable sample age in microseconds.
    pub valid_age_us: Timestamp,
    /// Newest acceptable sample offset in microseconds.
    pub delay_us: Timestamp,
    /// Reaction when no sample lies inside the window in time.
    pub violation_strategy: InputViolationStrategy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            valid_age_us: 0,
            delay_us: 0,
            violation_strategy: InputViolationStrategy::IgnoreInputValidityViolation,
        }
    }
}

struct Input {
    name: String,
    valid_age: Timestamp,
    delay: Timestamp,
    buffer: Arc<SampleBuffer>,
}

/// Data access scoped to one step listener.
pub struct StepDataAccess {
    access: Arc<DataAccess>,
    error_trigger: Arc<dyn ErrorTrigger>,
    incidents: Arc<dyn IncidentSink>,
    origin: String,
    cycle_time: Timestamp,
    max_input_wait: Duration,
    sim_time: AtomicI64,
    need_to_skip: AtomicBool,
    inputs: BTreeMap<(InputViolationStrategy, usize), Input>,
    outputs: Mutex<BTreeMap<SignalHandle, DataSample>>,
}

impl StepDataAccess {
    /// Create an unconfigured view. Incidents are reported with `origin`.
    pub fn new(
        access: Arc<DataAccess>,
        error_trigger: Arc<dyn ErrorTrigger>,
        origin: impl Into<String>,
    ) -> Self {
        let incidents = Arc::clone(access.incidents());
        Self {
            access,
            error_trigger,
            incidents,
            origin: origin.into(),
            cycle_time: 0,
            max_input_wait: Duration::ZERO,
            sim_time: AtomicI64::new(0),
            need_to_skip: AtomicBool::new(false),
            inputs: BTreeMap::new(),
            outputs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Set the cycle time and the total wait budget for inputs per step.
    pub fn configure(&mut self, cycle_time: Timestamp, max_input_wait: Duration) {
        self.cycle_time = cycle_time;
        self.max_input_wait = max_input_wait;
    }

    /// Cycle time in microseconds.
    pub fn cycle_time(&self) -> Timestamp {
        self.cycle_time
    }

    /// Simulation time of the current step.
    pub fn sim_time(&self) -> Timestamp {
        self.sim_time.load(Ordering::Acquire)
    }

    /// Add an input to validate before each step.
    pub fn configure_input(
        &mut self,
        name: &str,
        handle: SignalHandle,
        config: InputConfig,
    ) -> Result<(), CoreError> {
        if config.valid_age_us < 0 || config.delay_us < 0 {
            return Err(CoreError::InvalidArgument);
        }
        let buffer = self.access.sample_buffer(handle)?;
        let seq = self.inputs.len();
        self.inputs.insert(
            (config.violation_strategy, seq),
            Input {
                name: name.to_owned(),
                valid_age: config.valid_age_us,
                delay: config.delay_us,
                buffer,
            },
        );
        Ok(())
    }

    /// Stage a zeroed sample for an output published after each step.
    pub fn configure_output(&mut self, _name: &str, handle: SignalHandle) -> Result<(), CoreError> {
        let size = self.access.registry().sample_size(handle)?;
        self.outputs
            .lock()
            .insert(handle, DataSample::zeroed(handle, size));
        Ok(())
    }

    /// Drop every configured input and output.
    pub fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.lock().clear();
    }

    /// Suppress output publication for the current step.
    pub fn set_skip(&self) {
        self.need_to_skip.store(true, Ordering::Release);
    }

    /// Wait for every input to become valid for `sim_time`.
    ///
    /// All inputs share one deadline of `max_input_wait` from now. An input
    /// that misses its window has its violation strategy applied;
    /// `Cancelled` is returned when `cancel` fires or the strategy is
    /// [`InputViolationStrategy::SetStmToError`].
    pub fn validate_inputs(&self, sim_time: Timestamp, cancel: &CancelToken) -> Result<(), CoreError> {
        self.sim_time.store(sim_time, Ordering::Release);
        let deadline = Instant::now() + self.max_input_wait;
        for ((strategy, _), input) in &self.inputs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match input.buffer.wait_until_in_time_window(
                sim_time - input.valid_age,
                sim_time + input.delay,
                remaining,
                cancel,
            ) {
                Ok(()) => {}
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(_) => self.apply_input_violation(&input.name, *strategy)?,
            }
        }
        Ok(())
    }

    fn apply_input_violation(
        &self,
        name: &str,
        strategy: InputViolationStrategy,
    ) -> Result<(), CoreError> {
        match strategy {
            InputViolationStrategy::IgnoreInputValidityViolation => Ok(()),
            InputViolationStrategy::WarnAboutInputValidityViolation => {
                self.report(
                    Severity::Warning,
                    format!("Input {name} does not meet required valid age."),
                );
                Ok(())
            }
            InputViolationStrategy::SkipOutputPublish => {
                self.set_skip();
                self.report(
                    Severity::CriticalGlobal,
                    format!(
                        "Input {name} does not meet required valid age. \
                         CAUTION: defined outputs will not be published!"
                    ),
                );
                Ok(())
            }
            InputViolationStrategy::SetStmToError => {
                self.report(
                    Severity::CriticalGlobal,
                    format!(
                        "Input {name} does not meet required valid age. \
                         FATAL: changing state to Error, continuation not possible!"
                    ),
                );
                self.set_skip();
                if let Err(e) = self.error_trigger.error_event() {
                    tracing::error!(error = %e, "could not raise error event");
                }
                Err(CoreError::Cancelled)
            }
        }
    }

    fn report(&self, severity: Severity, description: String) {
        tracing::warn!(origin = %self.origin, %severity, "{description}");
        self.incidents.invoke_incident(Incident::new(
            IncidentCode::InputValidityViolation,
            severity,
            description,
            self.origin.clone(),
        ));
    }

    /// Copy the newest sample not after the current step's time.
    pub fn copy_recent_data(&self, handle: SignalHandle) -> Result<DataSample, CoreError> {
        self.copy_data_before(handle, self.sim_time())
    }

    /// Copy the newest sample not after `upper_bound`.
    ///
    /// `OutOfSync` if the signal still holds only its registration
    /// placeholder.
    pub fn copy_data_before(
        &self,
        handle: SignalHandle,
        upper_bound: Timestamp,
    ) -> Result<DataSample, CoreError> {
        let locked = self.access.lock_data_at_upper_bound(handle, upper_bound)?;
        let copy = locked.to_sample();
        let valid = locked.is_valid();
        self.access.unlock_data(&locked)?;
        if !valid {
            return Err(CoreError::OutOfSync);
        }
        Ok(copy)
    }

    /// Publish a sample.
    ///
    /// Configured outputs are only staged until
    /// [`transmit_all_outputs`](Self::transmit_all_outputs); any other
    /// signal is stamped with the end of the cycle and sent right away.
    pub fn transmit_data(&self, sample: &DataSample) -> Result<(), CoreError> {
        {
            let mut outputs = self.outputs.lock();
            if let Some(staged) = outputs.get_mut(&sample.handle) {
                let n = staged.data.len().min(sample.data.len());
                staged.data[..n].copy_from_slice(&sample.data[..n]);
                return Ok(());
            }
        }
        let mut stamped = sample.clone();
        stamped.time = self.sim_time() + self.cycle_time;
        self.access.transmit_data(&stamped)
    }

    /// Send every staged output stamped with the end of the cycle, unless
    /// the step was marked to be skipped. Clears the skip mark.
    pub fn transmit_all_outputs(&self) -> Result<(), CoreError> {
        let skip = self.need_to_skip.swap(false, Ordering::AcqRel);
        if skip {
            tracing::debug!(origin = %self.origin, "outputs skipped for this step");
            return Ok(());
        }
        let stamp = self.sim_time() + self.cycle_time;
        let mut outputs = self.outputs.lock();
        for staged in outputs.values_mut() {
            staged.time = stamp;
            self.access
                .transmit_data(staged)
                .map_err(|_| CoreError::Failed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::{SignalDescription, SignalDirection, SignalRegistry};
    use stepwise_test_utils::{
        LoopbackBus, MockSignalRegistry, RecordingErrorTrigger, RecordingIncidentSink,
    };

    struct Fixture {
        bus: Arc<LoopbackBus>,
        access: Arc<DataAccess>,
        registry: Arc<MockSignalRegistry>,
        incidents: Arc<RecordingIncidentSink>,
        errors: Arc<RecordingErrorTrigger>,
    }

    fn fixture() -> Fixture {
        let bus = LoopbackBus::new();
        let registry = Arc::new(MockSignalRegistry::new());
        let incidents = Arc::new(RecordingIncidentSink::new());
        let access = Arc::new(DataAccess::new(
            registry.clone(),
            bus.endpoint("me"),
            incidents.clone(),
        ));
        Fixture {
            bus,
            access,
            registry,
            incidents,
            errors: Arc::new(RecordingErrorTrigger::new()),
        }
    }

    impl Fixture {
        fn signal(&self, name: &str, dir: SignalDirection) -> SignalHandle {
            let h = self
                .registry
                .register_signal(&SignalDescription::raw(name, 4, dir).with_backlog(4))
                .unwrap();
            self.access.signal_registered(h).unwrap();
            h
        }

        fn step(&self) -> StepDataAccess {
            let mut s = StepDataAccess::new(self.access.clone(), self.errors.clone(), "StepListener");
            s.configure(10, Duration::from_millis(20));
            s
        }
    }

    fn input(strategy: InputViolationStrategy) -> InputConfig {
        InputConfig {
            valid_age_us: 5,
            delay_us: 0,
            violation_strategy: strategy,
        }
    }

    #[test]
    fn negative_window_is_rejected() {
        let f = fixture();
        let h = f.signal("In", SignalDirection::Input);
        let mut s = f.step();
        let cfg = InputConfig {
            valid_age_us: -1,
            ..InputConfig::default()
        };
        assert_eq!(s.configure_input("In", h, cfg), Err(CoreError::InvalidArgument));
        assert_eq!(
            s.configure_input("Nope", SignalHandle(77), InputConfig::default()),
            Err(CoreError::NotFound)
        );
    }

    #[test]
    fn valid_input_passes() {
        let f = fixture();
        let h = f.signal("In", SignalDirection::Input);
        let mut s = f.step();
        s.configure_input("In", h, input(InputViolationStrategy::SetStmToError))
            .unwrap();
        f.access.update(&DataSample::new(h, 98, vec![1; 4])).unwrap();
        assert_eq!(s.validate_inputs(100, &CancelToken::new()), Ok(()));
        assert!(f.incidents.is_empty());
    }

    #[test]
    fn warn_strategy_reports_and_proceeds() {
        let f = fixture();
        let h = f.signal("In", SignalDirection::Input);
        let mut s = f.step();
        s.configure_input("In", h, input(InputViolationStrategy::WarnAboutInputValidityViolation))
            .unwrap();
        assert_eq!(s.validate_inputs(100, &CancelToken::new()), Ok(()));
        assert_eq!(f.incidents.count(IncidentCode::InputValidityViolation), 1);
        assert_eq!(f.errors.count(), 0);
    }

    #[test]
    fn fatal_strategy_cancels_and_raises_error() {
        let f = fixture();
        let h = f.signal("In", SignalDirection::Input);
        let mut s = f.step();
        s.configure_input("In", h, input(InputViolationStrategy::SetStmToError))
            .unwrap();
        assert_eq!(
            s.validate_inputs(100, &CancelToken::new()),
            Err(CoreError::Cancelled)
        );
        assert_eq!(f.errors.count(), 1);
        assert_eq!(f.incidents.incidents()[0].severity, Severity::CriticalGlobal);
    }

    #[test]
    fn skip_strategy_suppresses_outputs_once() {
        let f = fixture();
        let inp = f.signal("In", SignalDirection::Input);
        let out = f.signal("Out", SignalDirection::Output);
        let mut s = f.step();
        s.configure_input("In", inp, input(InputViolationStrategy::SkipOutputPublish))
            .unwrap();
        s.configure_output("Out", out).unwrap();

        s.validate_inputs(100, &CancelToken::new()).unwrap();
        s.transmit_all_outputs().unwrap();
        assert!(f.bus.sent_samples().is_empty());

        s.transmit_all_outputs().unwrap();
        let sent = f.bus.sent_samples();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].time, 110);
    }

    #[test]
    fn staged_output_keeps_size_and_takes_payload() {
        let f = fixture();
        let out = f.signal("Out", SignalDirection::Output);
        let other = f.signal("Other", SignalDirection::Output);
        let mut s = f.step();
        s.configure_output("Out", out).unwrap();
        s.validate_inputs(50, &CancelToken::new()).unwrap();

        s.transmit_data(&DataSample::new(out, 0, vec![7, 7, 7, 7, 7, 7])).unwrap();
        s.transmit_data(&DataSample::new(other, 0, vec![1])).unwrap();
        let sent = f.bus.sent_samples();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].handle, other);
        assert_eq!(sent[0].time, 60);

        s.transmit_all_outputs().unwrap();
        let sent = f.bus.sent_samples();
        assert_eq!(sent[1].handle, out);
        assert_eq!(sent[1].data, vec![7; 4]);
    }

    #[test]
    fn placeholder_copy_is_out_of_sync() {
        let f = fixture();
        let h = f.signal("In", SignalDirection::Input);
        let s = f.step();
        assert_eq!(s.copy_data_before(h, 10).unwrap_err(), CoreError::OutOfSync);
        f.access.update(&DataSample::new(h, 5, vec![3; 4])).unwrap();
        let copy = s.copy_data_before(h, 10).unwrap();
        assert_eq!(copy.time, 5);
        assert_eq!(copy.data, vec![3; 4]);
    }
}
