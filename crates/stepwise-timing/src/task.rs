//! One step listener and the worker thread that runs it.
//!
//! The timing client calls [`Task::sim_time_progress`] on every trigger
//! tick. When the accumulated progress crosses the next cycle boundary
//! the worker is released: it validates the inputs, runs the callback,
//! checks the runtime budget, publishes the staged outputs and sends an
//! acknowledgement to the timing master.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use stepwise_core::{
    CancelToken, CoreError, DataSample, ErrorTrigger, Incident, IncidentCode, IncidentSink,
    Severity, SignalDirection, SignalHandle, SignalRegistry, Timestamp,
};
use stepwise_data::{DataAccess, StepDataAccess};

use crate::config::{StepConfig, TimeViolationStrategy};
use crate::wire::TriggerAck;

const ORIGIN: &str = "StepListener";

/// User code run once per cycle.
pub trait StepListener: Send + Sync {
    /// Compute the step starting at `sim_time`.
    fn step(&self, sim_time: Timestamp, data: &StepDataAccess);
}

impl<F> StepListener for F
where
    F: Fn(Timestamp, &StepDataAccess) + Send + Sync,
{
    fn step(&self, sim_time: Timestamp, data: &StepDataAccess) {
        self(sim_time, data)
    }
}

/// Lifecycle of a task's worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// No worker thread yet.
    Idle,
    /// Worker waiting for the next release.
    Created,
    /// Worker inside a step.
    Computing,
    /// Worker joined.
    Destroyed,
}

struct Settings {
    cycle_time: Timestamp,
    max_runtime: Timestamp,
    strategy: TimeViolationStrategy,
    data: StepDataAccess,
}

struct TaskShared {
    name: String,
    uuid: String,
    listener: Arc<dyn StepListener>,
    access: Arc<DataAccess>,
    incidents: Arc<dyn IncidentSink>,
    error_trigger: Arc<dyn ErrorTrigger>,
    settings: RwLock<Settings>,
    state: Mutex<TaskState>,
    /// Held for the duration of a step; `try_lock` tells whether the
    /// worker is busy.
    working: Mutex<()>,
    current_sim_time: AtomicI64,
    last_fired: AtomicI64,
    ack_handle: AtomicU32,
    stop: CancelToken,
    release_tx: Sender<()>,
    release_rx: Receiver<()>,
}

impl TaskShared {
    #[track_caller]
    fn raise(&self, code: IncidentCode, severity: Severity, description: String) {
        tracing::warn!(task = %self.name, %code, %severity, "{description}");
        self.incidents
            .invoke_incident(Incident::new(code, severity, description, ORIGIN));
    }

    fn is_working(&self) -> bool {
        self.working.try_lock().is_none()
    }

    fn escalate(&self) {
        if let Err(e) = self.error_trigger.error_event() {
            tracing::error!(task = %self.name, error = %e, "could not raise error event");
        }
        self.stop.cancel();
    }

    /// A trigger fell due while the previous step was still running.
    fn apply_trigger_violation(&self, settings: &Settings) {
        let name = &self.name;
        match settings.strategy {
            TimeViolationStrategy::IgnoreRuntimeViolation => {}
            TimeViolationStrategy::WarnAboutRuntimeViolation => self.raise(
                IncidentCode::TriggerViolation,
                Severity::Warning,
                format!("{name}: received trigger before previous step was finished"),
            ),
            TimeViolationStrategy::SkipOutputPublish => {
                self.raise(
                    IncidentCode::TriggerViolation,
                    Severity::CriticalGlobal,
                    format!(
                        "{name}: received trigger before previous step was finished, \
                         outputs of this step will not be published"
                    ),
                );
                settings.data.set_skip();
            }
            TimeViolationStrategy::SetStmToError => {
                self.raise(
                    IncidentCode::TriggerViolation,
                    Severity::CriticalGlobal,
                    format!(
                        "{name}: received trigger before previous step was finished, \
                         changing state to Error"
                    ),
                );
                settings.data.set_skip();
                self.escalate();
            }
        }
    }

    /// The step took `used` microseconds, more than its budget. Returns
    /// whether the step may still be acknowledged.
    fn apply_runtime_violation(&self, settings: &Settings, used: Timestamp) -> bool {
        let name = &self.name;
        let budget = settings.max_runtime;
        match settings.strategy {
            TimeViolationStrategy::IgnoreRuntimeViolation => true,
            TimeViolationStrategy::WarnAboutRuntimeViolation => {
                self.raise(
                    IncidentCode::RuntimeViolation,
                    Severity::Warning,
                    format!("step listener \"{name}\" took {used} us, budget is {budget} us"),
                );
                true
            }
            TimeViolationStrategy::SkipOutputPublish => {
                self.raise(
                    IncidentCode::RuntimeViolation,
                    Severity::CriticalGlobal,
                    format!(
                        "step listener \"{name}\" took {used} us, budget is {budget} us; \
                         outputs of this step will not be published"
                    ),
                );
                settings.data.set_skip();
                true
            }
            TimeViolationStrategy::SetStmToError => {
                self.raise(
                    IncidentCode::RuntimeViolation,
                    Severity::CriticalGlobal,
                    format!(
                        "step listener \"{name}\" took {used} us, budget is {budget} us; \
                         changing state to Error"
                    ),
                );
                settings.data.set_skip();
                self.escalate();
                false
            }
        }
    }

    fn run_step(&self) {
        let settings = self.settings.read();
        let working = self.working.lock();
        if self.stop.is_cancelled() {
            return;
        }
        let sim_time = self.current_sim_time.load(Ordering::Acquire);
        if settings.data.validate_inputs(sim_time, &self.stop).is_err() {
            return;
        }

        *self.state.lock() = TaskState::Computing;
        let started = Instant::now();
        self.listener.step(sim_time, &settings.data);
        let used = started.elapsed().as_micros() as Timestamp;
        *self.state.lock() = TaskState::Created;

        let mut acknowledge = true;
        if settings.max_runtime != 0 && used > settings.max_runtime {
            acknowledge = self.apply_runtime_violation(&settings, used);
        }
        if let Err(error) = settings.data.transmit_all_outputs() {
            tracing::warn!(task = %self.name, %error, "failed to publish step outputs");
        }
        drop(working);

        if acknowledge {
            self.send_ack(used, sim_time);
        }
    }

    fn send_ack(&self, used: Timestamp, sim_time: Timestamp) {
        let handle = SignalHandle(self.ack_handle.load(Ordering::Acquire));
        let sent = TriggerAck::new(&self.uuid, used, sim_time).and_then(|ack| {
            self.access
                .transmit_data(&DataSample::new(handle, sim_time, ack.encode().to_vec()))
        });
        match sent {
            Ok(()) => tracing::debug!(task = %self.name, sim_time, used, "step acknowledged"),
            Err(error) => self.raise(
                IncidentCode::AckTransmitFailed,
                Severity::Warning,
                format!("{}: transmission of step acknowledgement failed: {error}", self.name),
            ),
        }
    }
}

fn worker_loop(shared: Arc<TaskShared>) {
    while shared.release_rx.recv().is_ok() {
        if shared.stop.is_cancelled() {
            break;
        }
        shared.run_step();
        if shared.stop.is_cancelled() {
            break;
        }
    }
}

/// A registered step listener.
pub struct Task {
    shared: Arc<TaskShared>,
    worker: Option<JoinHandle<()>>,
}

impl Task {
    /// Register `listener` as task `name` with identifier `uuid`.
    ///
    /// `access` provides the inputs and carries the acknowledgements;
    /// violations escalate through `error_trigger`.
    pub fn new(
        name: &str,
        uuid: String,
        config: &StepConfig,
        listener: Arc<dyn StepListener>,
        access: Arc<DataAccess>,
        error_trigger: Arc<dyn ErrorTrigger>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let incidents = Arc::clone(access.incidents());
        let data = StepDataAccess::new(Arc::clone(&access), Arc::clone(&error_trigger), name);
        let task = Self {
            shared: Arc::new(TaskShared {
                name: name.to_owned(),
                uuid,
                listener,
                access,
                incidents,
                error_trigger,
                settings: RwLock::new(Settings {
                    cycle_time: config.cycle_time_us,
                    max_runtime: config.max_runtime_us,
                    strategy: config.violation_strategy,
                    data,
                }),
                state: Mutex::new(TaskState::Idle),
                working: Mutex::new(()),
                current_sim_time: AtomicI64::new(0),
                last_fired: AtomicI64::new(0),
                ack_handle: AtomicU32::new(0),
                stop: CancelToken::new(),
                release_tx,
                release_rx,
            }),
            worker: None,
        };
        task.configure(config, None)?;
        Ok(task)
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 36-character task identifier.
    pub fn uuid(&self) -> &str {
        &self.shared.uuid
    }

    /// Configured cycle time in microseconds.
    pub fn cycle_time(&self) -> Timestamp {
        self.shared.settings.read().cycle_time
    }

    /// Worker lifecycle.
    pub fn state(&self) -> TaskState {
        *self.shared.state.lock()
    }

    /// Apply `config`. Inputs and outputs are resolved by name through
    /// `registry`; without one only timing settings are applied.
    ///
    /// `Failed` when a signal name cannot be resolved. Only valid while
    /// the worker is not running.
    pub fn configure(
        &self,
        config: &StepConfig,
        registry: Option<&dyn SignalRegistry>,
    ) -> Result<(), CoreError> {
        config.validate()?;
        if self.worker.is_some() {
            return Err(CoreError::InvalidState);
        }
        let mut settings = self.shared.settings.write();
        settings.cycle_time = config.cycle_time_us;
        settings.max_runtime = config.max_runtime_us;
        settings.strategy = config.violation_strategy;
        settings
            .data
            .configure(config.cycle_time_us, config.max_input_wait());
        let Some(registry) = registry else {
            return Ok(());
        };

        settings.data.clear();
        for (name, input) in &config.inputs {
            let handle = registry
                .handle_by_name(name, SignalDirection::Input)
                .map_err(|_| {
                    tracing::warn!(task = %self.shared.name, input = %name, "input signal not registered");
                    CoreError::Failed
                })?;
            settings.data.configure_input(name, handle, *input)?;
        }
        for name in config.outputs.keys() {
            let handle = registry
                .handle_by_name(name, SignalDirection::Output)
                .map_err(|_| {
                    tracing::warn!(task = %self.shared.name, output = %name, "output signal not registered");
                    CoreError::Failed
                })?;
            settings.data.configure_output(name, handle)?;
        }
        Ok(())
    }

    /// Start the worker. Acknowledgements go to `ack_handle`.
    pub fn create(&mut self, ack_handle: SignalHandle) -> Result<(), CoreError> {
        if self.worker.is_some() {
            return Err(CoreError::InvalidState);
        }
        let shared = &self.shared;
        shared.ack_handle.store(ack_handle.0, Ordering::Release);
        shared.stop.reset();
        shared.last_fired.store(0, Ordering::Release);
        shared.current_sim_time.store(0, Ordering::Release);
        while shared.release_rx.try_recv().is_ok() {}

        let worker_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name(format!("stepwise-task-{}", shared.name))
            .spawn(move || worker_loop(worker_shared))
            .map_err(|e| {
                tracing::error!(task = %self.shared.name, error = %e, "failed to spawn task worker");
                CoreError::Failed
            })?;
        *self.shared.state.lock() = TaskState::Created;
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop the worker and join it. A step in progress runs to completion.
    pub fn destroy(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.shared.stop.cancel();
        let _ = self.shared.release_tx.try_send(());
        let _ = handle.join();
        *self.shared.state.lock() = TaskState::Destroyed;
    }

    /// Account for a trigger tick.
    ///
    /// `accumulated` is the total simulation time advanced since start,
    /// `current_sim_time` the time of this tick. Releases the worker
    /// once `accumulated` reaches the next cycle boundary; never blocks.
    pub fn sim_time_progress(&self, accumulated: Timestamp, current_sim_time: Timestamp) {
        let shared = &self.shared;
        shared
            .current_sim_time
            .store(current_sim_time, Ordering::Release);
        let settings = shared.settings.read();
        let last = shared.last_fired.load(Ordering::Acquire);
        if accumulated < last + settings.cycle_time {
            return;
        }
        let boundary = accumulated - (accumulated - last) % settings.cycle_time;
        shared.last_fired.store(boundary, Ordering::Release);
        if shared.is_working() {
            shared.apply_trigger_violation(&settings);
        }
        let _ = shared.release_tx.try_send(());
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.destroy();
    }
}
