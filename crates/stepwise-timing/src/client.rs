//! The timing client: step listener registry, trigger handling, the
//! system timeout watchdog and schedule reporting.
//!
//! The timing master sends `_Trigger` samples; every tick advances the
//! simulation time and is forwarded to each task. Tasks answer on the
//! `_Ack` signal. Before the first tick the master asks for the schedule
//! with a `GetSchedule` command.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use stepwise_core::paths;
use stepwise_core::{
    Command, CommandKind, CommandListener, CoreError, DataListener, DataSample, ErrorTrigger,
    Incident, IncidentCode, IncidentSink, ListenerId, Notification, NotificationKind,
    PropertyStore, ScheduleEntry, Severity, SignalDescription, SignalDirection, SignalHandle,
    SignalRegistry, Timestamp, Transport, Value,
};
use stepwise_data::DataAccess;

use crate::config::{StepConfig, TimingClientConfig, TimingConfigError, TimingConfiguration};
use crate::task::{StepListener, Task};
use crate::wire::{
    TriggerAck, TriggerTick, ACK_SIGNAL_NAME, ACK_SIGNAL_TYPE, TRIGGER_SIGNAL_NAME,
    TRIGGER_SIGNAL_TYPE,
};

const ORIGIN: &str = "TimingClient";

/// Collaborators of a [`TimingClient`].
#[derive(Clone)]
pub struct TimingContext {
    /// Sample buffers; also provides the signal registry and incident sink.
    pub access: Arc<DataAccess>,
    /// Carries schedule requests and answers.
    pub transport: Arc<dyn Transport>,
    /// Source of the element name and the timing properties.
    pub properties: Arc<dyn PropertyStore>,
    /// Escalation into the state machine.
    pub error_trigger: Arc<dyn ErrorTrigger>,
}

struct Signals {
    ack: SignalHandle,
    trigger: SignalHandle,
    listener: ListenerId,
}

struct Shared {
    config: TimingClientConfig,
    ctx: TimingContext,
    tasks: Mutex<BTreeMap<String, Task>>,
    running: AtomicBool,
    current_sim_time: AtomicI64,
    progress_sum: AtomicI64,
    master_name: RwLock<String>,
    use_multicast: AtomicBool,
    system_timeout_us: AtomicI64,
    since_trigger_us: AtomicI64,
    timed_out: AtomicBool,
    signals: Mutex<Option<Signals>>,
    rng: Mutex<ChaCha8Rng>,
}

impl Shared {
    fn registry(&self) -> &Arc<dyn SignalRegistry> {
        self.ctx.access.registry()
    }

    fn incidents(&self) -> &Arc<dyn IncidentSink> {
        self.ctx.access.incidents()
    }

    #[track_caller]
    fn raise(&self, code: IncidentCode, severity: Severity, description: &str) {
        tracing::warn!(%code, %severity, "{description}");
        self.incidents()
            .invoke_incident(Incident::new(code, severity, description, ORIGIN));
    }

    fn escalate(&self) {
        if let Err(e) = self.ctx.error_trigger.error_event() {
            tracing::error!(error = %e, "could not raise error event");
        }
    }

    fn element_name(&self) -> String {
        self.ctx
            .properties
            .get_property(paths::ELEMENT_NAME)
            .and_then(|d| d.get::<String>(0).ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.config.element_name.clone())
    }

    fn read_property<T: stepwise_core::FromValue>(&self, path: &str) -> Option<T> {
        self.ctx
            .properties
            .get_property(path)
            .and_then(|d| d.get::<T>(0).ok())
    }

    fn new_uuid(&self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.lock().fill_bytes(&mut bytes);
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..]
        )
    }

    fn on_trigger(&self, sample: &DataSample) -> Result<(), CoreError> {
        let tick = TriggerTick::decode(&sample.data)?;
        self.since_trigger_us.store(0, Ordering::Release);
        if !self.running.load(Ordering::Acquire) {
            tracing::debug!(time = tick.current_time, "trigger ignored, timing client stopped");
            return Ok(());
        }

        let tasks = self.tasks.lock();
        let current = self.current_sim_time.load(Ordering::Acquire);
        if current > 0 && !tasks.is_empty() && current + tick.sim_time_step != tick.current_time {
            tracing::error!(
                current,
                step = tick.sim_time_step,
                received = tick.current_time,
                "trigger out of order"
            );
            self.raise(
                IncidentCode::OutOfOrderTrigger,
                Severity::CriticalGlobal,
                "timing client received a trigger out of order",
            );
            self.escalate();
            return Ok(());
        }

        self.current_sim_time
            .store(tick.current_time, Ordering::Release);
        let sum = self
            .progress_sum
            .fetch_add(tick.sim_time_step, Ordering::AcqRel)
            + tick.sim_time_step;
        for task in tasks.values() {
            task.sim_time_progress(sum, tick.current_time);
        }
        Ok(())
    }

    fn schedule(&self) -> Vec<ScheduleEntry> {
        self.tasks
            .lock()
            .values()
            .map(|task| ScheduleEntry {
                uuid: task.uuid().to_owned(),
                cycle_time: task.cycle_time(),
            })
            .collect()
    }

    fn on_schedule_request(&self, command: &Command) -> Result<(), CoreError> {
        let element = self.element_name();
        if !command.header.is_for(&element) || self.tasks.lock().is_empty() {
            return Ok(());
        }
        let sender = &command.header.sender;
        if *sender != *self.master_name.read() {
            self.raise(
                IncidentCode::UnexpectedScheduleRequest,
                Severity::CriticalGlobal,
                "schedule requested by a participant that is not the configured timing master",
            );
            return Ok(());
        }
        let note = Notification::new(
            element,
            sender.as_str(),
            NotificationKind::Schedule(self.schedule()),
        );
        if let Err(error) = self.ctx.transport.transmit_notification(&note) {
            tracing::debug!(%error, "schedule notification failed");
            self.raise(
                IncidentCode::ScheduleTransmitFailed,
                Severity::CriticalGlobal,
                "failed to send the schedule, the timing master will not consider this participant",
            );
        }
        Ok(())
    }

    fn check_system_timeout(&self, period_us: Timestamp) {
        let timeout = self.system_timeout_us.load(Ordering::Acquire);
        let since = self.since_trigger_us.fetch_add(period_us, Ordering::AcqRel);
        if since > timeout && !self.timed_out.swap(true, Ordering::AcqRel) {
            self.raise(
                IncidentCode::SystemTimeout,
                Severity::CriticalGlobal,
                "timing client received no trigger from the timing master within the system timeout",
            );
            self.escalate();
        }
    }

    fn drop_signals(&self) {
        let Some(signals) = self.signals.lock().take() else {
            return;
        };
        let _ = self.ctx.access.unregister_data_listener(signals.listener);
        let _ = self.ctx.access.signal_unregistered(signals.trigger);
        let _ = self.registry().unregister_signal(signals.trigger);
        let _ = self.registry().unregister_signal(signals.ack);
    }

    fn register_signals(self: &Arc<Self>) -> Result<(), CoreError> {
        self.drop_signals();
        let registry = self.registry();
        let ack = registry.register_signal(&SignalDescription {
            name: ACK_SIGNAL_NAME.to_owned(),
            type_name: ACK_SIGNAL_TYPE.to_owned(),
            size: TriggerAck::SIZE,
            direction: SignalDirection::Output,
            backlog: 1,
        })?;
        let trigger = match registry.register_signal(&SignalDescription {
            name: TRIGGER_SIGNAL_NAME.to_owned(),
            type_name: TRIGGER_SIGNAL_TYPE.to_owned(),
            size: TriggerTick::SIZE,
            direction: SignalDirection::Input,
            backlog: 1,
        }) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = registry.unregister_signal(ack);
                return Err(e);
            }
        };
        let listener = self.ctx.access.signal_registered(trigger).and_then(|()| {
            self.ctx
                .access
                .register_data_listener(trigger, Arc::new(TriggerHook(Arc::downgrade(self))))
        });
        let listener = match listener {
            Ok(id) => id,
            Err(e) => {
                let _ = self.ctx.access.signal_unregistered(trigger);
                let _ = registry.unregister_signal(trigger);
                let _ = registry.unregister_signal(ack);
                return Err(e);
            }
        };
        *self.signals.lock() = Some(Signals {
            ack,
            trigger,
            listener,
        });
        Ok(())
    }
}

struct TriggerHook(Weak<Shared>);

impl DataListener for TriggerHook {
    fn on_sample(&self, sample: &DataSample) -> Result<(), CoreError> {
        match self.0.upgrade() {
            Some(shared) => shared.on_trigger(sample),
            None => Ok(()),
        }
    }
}

struct ScheduleHook(Weak<Shared>);

impl CommandListener for ScheduleHook {
    fn on_command(&self, command: &Command) -> Result<(), CoreError> {
        if command.kind != CommandKind::GetSchedule {
            return Ok(());
        }
        match self.0.upgrade() {
            Some(shared) => shared.on_schedule_request(command),
            None => Ok(()),
        }
    }
}

fn watchdog_loop(shared: Arc<Shared>, stop: crossbeam_channel::Receiver<()>) {
    let period = shared.config.watchdog_period;
    let period_us = period.as_micros() as Timestamp;
    loop {
        match stop.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => shared.check_system_timeout(period_us),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

struct Watchdog {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Drives registered step listeners from the timing master's triggers.
pub struct TimingClient {
    shared: Arc<Shared>,
    watchdog: Mutex<Option<Watchdog>>,
    command_listener: ListenerId,
}

impl TimingClient {
    /// Create a stopped client.
    ///
    /// Writes the configured system timeout, master name and multicast
    /// flag to the property tree and subscribes to schedule requests.
    pub fn new(config: TimingClientConfig, ctx: TimingContext) -> Result<Self, CoreError> {
        config.validate()?;
        let props = &ctx.properties;
        props.set_property_value(
            paths::SYSTEM_TIMEOUT,
            Value::Int(config.system_timeout.as_secs().min(i32::MAX as u64) as i32),
        )?;
        props.set_property_value(paths::USE_MULTICAST, Value::Bool(config.use_multicast))?;
        if !config.master_name.is_empty() {
            props.set_property_value(paths::MASTER_ELEMENT, config.master_name.as_str().into())?;
        }

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
            ^ u64::from(std::process::id()) << 32;
        let shared = Arc::new(Shared {
            master_name: RwLock::new(config.master_name.clone()),
            use_multicast: AtomicBool::new(config.use_multicast),
            system_timeout_us: AtomicI64::new(config.system_timeout.as_micros() as i64),
            config,
            ctx,
            tasks: Mutex::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            current_sim_time: AtomicI64::new(0),
            progress_sum: AtomicI64::new(0),
            since_trigger_us: AtomicI64::new(0),
            timed_out: AtomicBool::new(false),
            signals: Mutex::new(None),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        });
        let command_listener = shared
            .ctx
            .transport
            .register_command_listener(Arc::new(ScheduleHook(Arc::downgrade(&shared))))?;
        Ok(Self {
            shared,
            watchdog: Mutex::new(None),
            command_listener,
        })
    }

    // ── Step listeners ─────────────────────────────────────────

    /// Register `listener` under `name` with a default configuration.
    ///
    /// `ResourceInUse` for a duplicate name, `InvalidState` while running.
    pub fn register_step_listener(
        &self,
        name: &str,
        config: &StepConfig,
        listener: Arc<dyn StepListener>,
    ) -> Result<(), CoreError> {
        if self.is_running() {
            return Err(CoreError::InvalidState);
        }
        let mut tasks = self.shared.tasks.lock();
        if tasks.contains_key(name) {
            return Err(CoreError::ResourceInUse);
        }
        let task = Task::new(
            name,
            self.shared.new_uuid(),
            config,
            listener,
            Arc::clone(&self.shared.ctx.access),
            Arc::clone(&self.shared.ctx.error_trigger),
        )?;
        task.configure(config, Some(self.shared.registry().as_ref()))?;
        tracing::debug!(step = %name, uuid = %task.uuid(), "step listener registered");
        tasks.insert(name.to_owned(), task);
        Ok(())
    }

    /// Remove a step listener. `NotFound` or `InvalidState` while running.
    pub fn unregister_step_listener(&self, name: &str) -> Result<(), CoreError> {
        if self.is_running() {
            return Err(CoreError::InvalidState);
        }
        self.shared
            .tasks
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or(CoreError::NotFound)
    }

    /// UUID assigned to the step listener `name`.
    pub fn step_listener_uuid(&self, name: &str) -> Option<String> {
        self.shared
            .tasks
            .lock()
            .get(name)
            .map(|task| task.uuid().to_owned())
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Apply this participant's entry of `timing`, read the timing
    /// properties and register the `_Ack` and `_Trigger` signals.
    ///
    /// A step configuration naming an unregistered step listener is
    /// `NotFound`; an unknown input in the backlog table likewise. Step
    /// listeners without a master name are `InvalidArgument`.
    pub fn configure(&self, timing: Option<&TimingConfiguration>) -> Result<(), CoreError> {
        if self.is_running() {
            return Err(CoreError::InvalidState);
        }
        let shared = &self.shared;
        let element = shared.element_name();
        if let Some(participant) = timing.and_then(|t| t.participants.get(&element)) {
            {
                let tasks = shared.tasks.lock();
                for (name, step) in &participant.tasks {
                    let task = tasks.get(name).ok_or_else(|| {
                        tracing::warn!(step = %name, "configured step listener is not registered");
                        CoreError::NotFound
                    })?;
                    task.configure(step, Some(shared.registry().as_ref()))?;
                }
            }
            for (input, backlog) in &participant.input_backlogs {
                let handle = shared
                    .registry()
                    .handle_by_name(input, SignalDirection::Input)
                    .map_err(|_| {
                        tracing::warn!(%input, "cannot size backlog of unknown input");
                        CoreError::NotFound
                    })?;
                shared.registry().set_sample_backlog(handle, *backlog)?;
                if let Err(error) = shared.ctx.access.signal_backlog_changed(handle) {
                    tracing::debug!(%input, %error, "no sample buffer to resize");
                }
            }
            let timeout_s = participant.system_timeout_s.clamp(0, i64::from(i32::MAX)) as i32;
            shared
                .ctx
                .properties
                .set_property_value(paths::SYSTEM_TIMEOUT, Value::Int(timeout_s))?;
        }

        if let Some(timeout_s) = shared.read_property::<i32>(paths::SYSTEM_TIMEOUT) {
            shared
                .system_timeout_us
                .store(i64::from(timeout_s.max(0)) * 1_000_000, Ordering::Release);
        }
        if let Some(multicast) = shared.read_property::<bool>(paths::USE_MULTICAST) {
            shared.use_multicast.store(multicast, Ordering::Release);
        }
        if let Some(master) = shared.read_property::<String>(paths::MASTER_ELEMENT) {
            *shared.master_name.write() = master;
        }
        if !shared.tasks.lock().is_empty() && shared.master_name.read().is_empty() {
            tracing::warn!("step listeners registered but no timing master configured");
            return Err(TimingConfigError::NoMaster.into());
        }

        shared.register_signals()?;
        tracing::info!(
            master = %shared.master_name.read(),
            tasks = shared.tasks.lock().len(),
            system_timeout_us = shared.system_timeout_us.load(Ordering::Acquire),
            "timing client configured"
        );
        Ok(())
    }

    /// Create every task worker and the watchdog.
    ///
    /// `InvalidState` when already running or not configured.
    pub fn start(&self) -> Result<(), CoreError> {
        if self.is_running() {
            return Err(CoreError::InvalidState);
        }
        let shared = &self.shared;
        let ack = shared
            .signals
            .lock()
            .as_ref()
            .map(|s| s.ack)
            .ok_or(CoreError::InvalidState)?;
        shared.current_sim_time.store(0, Ordering::Release);
        shared.progress_sum.store(0, Ordering::Release);
        shared.since_trigger_us.store(0, Ordering::Release);
        shared.timed_out.store(false, Ordering::Release);

        let mut tasks = shared.tasks.lock();
        if let Err(e) = tasks.values_mut().try_for_each(|task| task.create(ack)) {
            tasks.values_mut().for_each(Task::destroy);
            return Err(e);
        }
        let with_watchdog =
            !tasks.is_empty() && shared.system_timeout_us.load(Ordering::Acquire) > 0;
        drop(tasks);

        if with_watchdog {
            let (stop, stop_rx) = crossbeam_channel::bounded(1);
            let watchdog_shared = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name("stepwise-watchdog".into())
                .spawn(move || watchdog_loop(watchdog_shared, stop_rx));
            match spawned {
                Ok(handle) => *self.watchdog.lock() = Some(Watchdog { stop, handle }),
                Err(e) => {
                    tracing::error!(error = %e, "failed to spawn timing watchdog");
                    shared.tasks.lock().values_mut().for_each(Task::destroy);
                    return Err(CoreError::Failed);
                }
            }
        }
        shared.running.store(true, Ordering::Release);
        tracing::info!("timing client started");
        Ok(())
    }

    /// Destroy every task worker, stop the watchdog and reset the
    /// simulation time.
    pub fn stop(&self) {
        let shared = &self.shared;
        let was_running = shared.running.swap(false, Ordering::AcqRel);
        shared.tasks.lock().values_mut().for_each(Task::destroy);
        if let Some(watchdog) = self.watchdog.lock().take() {
            let _ = watchdog.stop.send(());
            let _ = watchdog.handle.join();
        }
        shared.current_sim_time.store(0, Ordering::Release);
        if was_running {
            tracing::info!("timing client stopped");
        }
    }

    /// Unregister the `_Ack` and `_Trigger` signals. `InvalidState` while
    /// running.
    pub fn reset(&self) -> Result<(), CoreError> {
        if self.is_running() {
            return Err(CoreError::InvalidState);
        }
        self.shared.drop_signals();
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────

    /// Current simulation time in microseconds.
    pub fn get_time(&self) -> Timestamp {
        self.shared.current_sim_time.load(Ordering::Acquire)
    }

    /// Whether the task workers are running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Task identifiers and cycle times, as reported to the master.
    pub fn schedule(&self) -> Vec<ScheduleEntry> {
        self.shared.schedule()
    }

    /// Handle of the `_Trigger` input, once configured.
    pub fn trigger_handle(&self) -> Option<SignalHandle> {
        self.shared.signals.lock().as_ref().map(|s| s.trigger)
    }

    /// Handle of the `_Ack` output, once configured.
    pub fn ack_handle(&self) -> Option<SignalHandle> {
        self.shared.signals.lock().as_ref().map(|s| s.ack)
    }

    /// Whether triggers should be received by multicast.
    pub fn uses_multicast(&self) -> bool {
        self.shared.use_multicast.load(Ordering::Acquire)
    }

    /// Set the system timeout property, in seconds. Takes effect at the
    /// next [`configure`](Self::configure).
    pub fn set_system_timeout(&self, seconds: i32) -> Result<(), CoreError> {
        self.shared
            .ctx
            .properties
            .set_property_value(paths::SYSTEM_TIMEOUT, Value::Int(seconds))
    }
}

impl Drop for TimingClient {
    fn drop(&mut self) {
        self.stop();
        self.shared.drop_signals();
        let _ = self
            .shared
            .ctx
            .transport
            .unregister_command_listener(self.command_listener);
    }
}
