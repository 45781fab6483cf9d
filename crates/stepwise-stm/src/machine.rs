//! The participant state machine.
//!
//! Events are queued on an unbounded channel and applied one at a time
//! by a single worker thread. A transition runs request listeners (which
//! may veto), exit listeners, optional clean-up, the state change, entry
//! listeners and finally the state notifier. `get_state` returns the old
//! state to request and exit listeners and the new state to entry
//! listeners; `wait_for_state` only wakes once the whole transition,
//! notifier included, has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use stepwise_core::paths;
use stepwise_core::{
    Command, CommandKind, CommandListener, ControlEvent, CoreError, ErrorTrigger, Incident,
    IncidentCode, IncidentSink, ListenerId, PropertyChange, PropertyListener, PropertyStore,
    RemotePropertyAccess, Severity, State, Transport,
};

use crate::config::StateMachineConfig;
use crate::listener::{ListenerSet, StateEntryListener, StateExitListener, StateRequestListener};
use crate::notifier::StateNotifier;
use crate::table::{self, StateEvent};

const ORIGIN: &str = "StateMachine";

/// Collaborators of a [`StateMachine`].
#[derive(Clone)]
pub struct StateMachineContext {
    /// Receives control commands and carries state notifications.
    pub transport: Arc<dyn Transport>,
    /// Local property tree.
    pub properties: Arc<dyn PropertyStore>,
    /// Access to other participants' trees.
    pub remote: Arc<dyn RemotePropertyAccess>,
    /// Destination of raised incidents.
    pub incidents: Arc<dyn IncidentSink>,
}

// ── Shared state ───────────────────────────────────────────────

struct Shared {
    config: StateMachineConfig,
    ctx: StateMachineContext,
    notifier: StateNotifier,
    /// What `get_state` reports.
    current: Mutex<State>,
    /// Last fully completed transition, for `wait_for_state`.
    reached: Mutex<State>,
    reached_cv: Condvar,
    /// Serializes transitions between the worker and `fire_up`.
    transition: Mutex<()>,
    initial_done: AtomicBool,
    consider_requests: AtomicBool,
    ignore_events: AtomicBool,
    standalone: AtomicBool,
    shutdown: AtomicBool,
    tx: Sender<StateEvent>,
    rx: Receiver<StateEvent>,
    requests: ListenerSet<dyn StateRequestListener>,
    exits: ListenerSet<dyn StateExitListener>,
    entries: ListenerSet<dyn StateEntryListener>,
}

impl Shared {
    #[track_caller]
    fn raise(&self, code: IncidentCode, severity: Severity, description: String) {
        if severity >= Severity::Warning {
            tracing::warn!(%code, %severity, "{description}");
        } else {
            tracing::info!(%code, "{description}");
        }
        self.ctx
            .incidents
            .invoke_incident(Incident::new(code, severity, description, ORIGIN));
    }

    fn state(&self) -> State {
        *self.current.lock()
    }

    fn enqueue(&self, event: StateEvent) -> Result<(), CoreError> {
        if self.ignore_events.load(Ordering::Acquire) {
            return Ok(());
        }
        self.tx.send(event).map_err(|_| CoreError::Failed)
    }

    fn process(&self, event: StateEvent) {
        let current = self.state();
        match table::destination(current, event) {
            Some(next) => {
                let forced = current == State::Startup && event == StateEvent::Error;
                self.transition(next, forced);
            }
            None => tracing::debug!(%current, %event, "event has no transition, ignored"),
        }
    }

    fn transition(&self, next: State, forced: bool) {
        let _serial = self.transition.lock();
        let previous = self.state();
        let initial = !self.initial_done.load(Ordering::Acquire);

        if !initial && !forced && next != State::Startup {
            if let Err(error) = self.requests.call_all(|l| l.on_request(next, previous)) {
                if self.consider_requests.load(Ordering::Acquire) {
                    self.raise(
                        IncidentCode::StateRequestDenied,
                        Severity::Info,
                        format!("transition from {previous} to {next} denied: {error}"),
                    );
                    return;
                }
                tracing::debug!(%previous, %next, %error, "request veto overridden");
            }
        }

        let mut failure = None;
        if !initial {
            keep_first(&mut failure, self.exits.call_all(|l| l.on_exit(previous, next)));
        }
        if table::needs_clean_up(previous, next) {
            keep_first(&mut failure, self.entries.call_all(|l| l.clean_up(previous)));
        }
        *self.current.lock() = next;
        keep_first(&mut failure, self.entries.call_all(|l| l.on_entry(next, previous)));
        self.notifier.publish(next);
        tracing::info!(from = %previous, to = %next, "state transition");

        if forced {
            self.raise(
                IncidentCode::StartupFailure,
                Severity::CriticalLocal,
                "participant failed during startup, shutting down".to_owned(),
            );
        }
        if let Some(error) = failure {
            if next == State::Error {
                tracing::warn!(%previous, %error, "listener failed while entering Error");
            } else {
                self.raise(
                    IncidentCode::TransitionFailed,
                    Severity::Critical,
                    format!("listeners failed during transition from {previous} to {next}: {error}"),
                );
                if let Err(e) = self.enqueue(StateEvent::Error) {
                    tracing::error!(error = %e, "failed to queue Error event");
                }
            }
        }

        *self.reached.lock() = next;
        self.reached_cv.notify_all();
    }

    fn set_standalone(&self, enabled: bool) {
        if self.standalone.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        if enabled {
            self.raise(
                IncidentCode::StandaloneModeChanged,
                Severity::Warning,
                "standalone mode enabled, remote control commands are ignored".to_owned(),
            );
        } else {
            self.raise(
                IncidentCode::StandaloneModeChanged,
                Severity::Info,
                "standalone mode disabled".to_owned(),
            );
        }
    }
}

fn keep_first(slot: &mut Option<CoreError>, result: Result<(), CoreError>) {
    if let Err(e) = result {
        slot.get_or_insert(e);
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match shared.rx.recv_timeout(shared.config.queue_poll_interval) {
            Ok(event) => shared.process(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ── Hooks ──────────────────────────────────────────────────────

struct ControlHook(Weak<Shared>);

impl CommandListener for ControlHook {
    fn on_command(&self, command: &Command) -> Result<(), CoreError> {
        let CommandKind::Control(event) = &command.kind else {
            return Ok(());
        };
        let Some(shared) = self.0.upgrade() else {
            return Ok(());
        };
        if !command.header.is_for(&shared.notifier.element_name()) {
            return Ok(());
        }
        if shared.standalone.load(Ordering::Acquire) {
            tracing::debug!(?event, sender = %command.header.sender, "standalone mode, control command ignored");
            return Ok(());
        }
        shared.enqueue(StateEvent::from(*event))
    }
}

struct StandaloneWatch(Weak<Shared>);

impl PropertyListener for StandaloneWatch {
    fn on_property_changed(&self, change: &PropertyChange) -> Result<(), CoreError> {
        if !change.relative_path.is_empty() {
            return Ok(());
        }
        if let Some(shared) = self.0.upgrade() {
            shared.set_standalone(change.property.get::<bool>(0)?);
        }
        Ok(())
    }
}

// ── StateMachine ───────────────────────────────────────────────

/// Lifecycle state machine of one participant.
///
/// Event methods return as soon as the event is queued. Dropping the
/// machine drives it to Shutdown and joins the worker thread.
pub struct StateMachine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    command_listener: ListenerId,
    standalone_listener: ListenerId,
}

impl StateMachine {
    /// Create a machine in Startup.
    ///
    /// Initializes `StateMachine.StandAloneModeEnabled` to false and
    /// subscribes to control commands. Nothing runs until
    /// [`fire_up`](Self::fire_up).
    pub fn new(config: StateMachineConfig, ctx: StateMachineContext) -> Result<Self, CoreError> {
        config.validate()?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let notifier = StateNotifier::new(
            Arc::clone(&ctx.transport),
            Arc::clone(&ctx.properties),
            config.element_name.clone(),
        );
        let shared = Arc::new(Shared {
            config,
            ctx,
            notifier,
            current: Mutex::new(State::Startup),
            reached: Mutex::new(State::Startup),
            reached_cv: Condvar::new(),
            transition: Mutex::new(()),
            initial_done: AtomicBool::new(false),
            consider_requests: AtomicBool::new(true),
            ignore_events: AtomicBool::new(false),
            standalone: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            tx,
            rx,
            requests: ListenerSet::default(),
            exits: ListenerSet::default(),
            entries: ListenerSet::default(),
        });

        let properties = &shared.ctx.properties;
        properties.set_property_value(paths::STANDALONE_MODE, false.into())?;
        let standalone_listener = properties.register_listener(
            paths::STANDALONE_MODE,
            Arc::new(StandaloneWatch(Arc::downgrade(&shared))),
        )?;
        let command_listener = match shared
            .ctx
            .transport
            .register_command_listener(Arc::new(ControlHook(Arc::downgrade(&shared))))
        {
            Ok(id) => id,
            Err(e) => {
                let _ = properties.unregister_listener(paths::STANDALONE_MODE, standalone_listener);
                return Err(e);
            }
        };

        Ok(Self {
            shared,
            worker: Mutex::new(None),
            command_listener,
            standalone_listener,
        })
    }

    /// Enter Startup (entry listeners only) and start the event worker.
    ///
    /// Events queued before this call are applied afterwards. A second
    /// call is `InvalidState`.
    pub fn fire_up(&self) -> Result<(), CoreError> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shared.initial_done.load(Ordering::Acquire) {
            return Err(CoreError::InvalidState);
        }
        self.shared.transition(State::Startup, false);
        self.shared.initial_done.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("stepwise-stm".into())
            .spawn(move || worker_loop(shared))
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn state machine worker");
                CoreError::Failed
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Current state.
    pub fn get_state(&self) -> State {
        self.shared.state()
    }

    /// Element name this machine answers to.
    pub fn element_name(&self) -> String {
        self.shared.notifier.element_name()
    }

    /// Whether remote control commands are being ignored.
    pub fn is_standalone(&self) -> bool {
        self.shared.standalone.load(Ordering::Acquire)
    }

    // ── Events ─────────────────────────────────────────────────

    /// Queue `event`.
    pub fn send_event(&self, event: StateEvent) -> Result<(), CoreError> {
        self.shared.enqueue(event)
    }

    /// Startup finished: Startup to Idle.
    pub fn startup_done_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::StartupDone)
    }

    /// Idle to Initializing.
    pub fn initialize_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::Initialize)
    }

    /// Initializing to Ready.
    pub fn init_done_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::InitDone)
    }

    /// Ready to Running.
    pub fn start_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::Start)
    }

    /// Initializing, Ready or Running to Idle.
    pub fn stop_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::Stop)
    }

    /// Enter Error; during Startup this shuts the participant down.
    pub fn error_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::Error)
    }

    /// Error to Idle.
    pub fn error_fixed_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::ErrorFixed)
    }

    /// Idle to Startup.
    pub fn restart_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::Restart)
    }

    /// Any state to Shutdown.
    pub fn shutdown_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::Shutdown)
    }

    // ── Listeners ──────────────────────────────────────────────

    /// Consult `listener` before every transition.
    pub fn register_request_listener(&self, listener: Arc<dyn StateRequestListener>) -> ListenerId {
        self.shared.requests.add(listener)
    }

    /// Remove a request listener.
    pub fn unregister_request_listener(&self, id: ListenerId) -> Result<(), CoreError> {
        self.shared.requests.remove(id)
    }

    /// Call `listener` whenever a state is left.
    pub fn register_exit_listener(&self, listener: Arc<dyn StateExitListener>) -> ListenerId {
        self.shared.exits.add(listener)
    }

    /// Remove an exit listener.
    pub fn unregister_exit_listener(&self, id: ListenerId) -> Result<(), CoreError> {
        self.shared.exits.remove(id)
    }

    /// Call `listener` whenever a state is entered.
    pub fn register_entry_listener(&self, listener: Arc<dyn StateEntryListener>) -> ListenerId {
        self.shared.entries.add(listener)
    }

    /// Remove an entry listener.
    pub fn unregister_entry_listener(&self, id: ListenerId) -> Result<(), CoreError> {
        self.shared.entries.remove(id)
    }

    // ── Waiting and shutdown ───────────────────────────────────

    /// Block until a transition into `state` has completed.
    ///
    /// `None` waits forever. Returns `Timeout` when the deadline passes,
    /// and `Failed` when Shutdown is reached instead or, with
    /// `error_is_failure`, when Error is reached.
    pub fn wait_for_state(
        &self,
        state: State,
        timeout: Option<Duration>,
        error_is_failure: bool,
    ) -> Result<(), CoreError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut reached = self.shared.reached.lock();
        loop {
            if *reached == state {
                return Ok(());
            }
            if *reached == State::Shutdown || (error_is_failure && *reached == State::Error) {
                return Err(CoreError::Failed);
            }
            match deadline {
                None => self.shared.reached_cv.wait(&mut reached),
                Some(deadline) => {
                    if self.shared.reached_cv.wait_until(&mut reached, deadline).timed_out()
                        && *reached != state
                    {
                        return Err(CoreError::Timeout);
                    }
                }
            }
        }
    }

    /// Drive the machine to Shutdown.
    ///
    /// Pending events are discarded and request vetoes are ignored until
    /// Shutdown is reached. The Shutdown event is re-sent every
    /// `shutdown_retry_interval`.
    pub fn perform_shutdown(&self) -> Result<(), CoreError> {
        let shared = &self.shared;
        if !shared.initial_done.load(Ordering::Acquire) || shared.state() == State::Shutdown {
            return Ok(());
        }
        shared.ignore_events.store(true, Ordering::Release);
        let dropped = shared.rx.try_iter().count();
        let consider = shared.consider_requests.swap(false, Ordering::AcqRel);
        shared.ignore_events.store(false, Ordering::Release);
        if dropped > 0 {
            tracing::debug!(dropped, "pending events discarded for shutdown");
        }

        let result = self.drive_to_shutdown();
        shared.consider_requests.store(consider, Ordering::Release);
        result
    }

    fn drive_to_shutdown(&self) -> Result<(), CoreError> {
        let retry = self.shared.config.shutdown_retry_interval;
        loop {
            if matches!(
                self.get_state(),
                State::Initializing | State::Ready | State::Running
            ) {
                self.shared.enqueue(StateEvent::Stop)?;
            }
            self.shared.enqueue(StateEvent::Shutdown)?;
            match self.wait_for_state(State::Shutdown, Some(retry), false) {
                Ok(()) => return Ok(()),
                Err(CoreError::Timeout) if self.worker_alive() => {
                    tracing::debug!(state = %self.get_state(), "shutdown pending, re-sending");
                }
                Err(CoreError::Timeout) => return Err(CoreError::Failed),
                Err(e) => return Err(e),
            }
        }
    }

    fn worker_alive(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // ── Remote control ─────────────────────────────────────────

    /// Send a control command to `element`.
    pub fn trigger_remote_event(&self, event: ControlEvent, element: &str) -> Result<(), CoreError> {
        if element.is_empty() {
            return Err(CoreError::InvalidArgument);
        }
        let command = Command::new(self.element_name(), element, CommandKind::Control(event));
        self.shared
            .ctx
            .transport
            .transmit_command(&command)
            .map_err(|error| {
                tracing::warn!(%element, ?event, %error, "failed to send control command");
                CoreError::Failed
            })
    }

    /// Read the current state of `element` through its property tree.
    ///
    /// A reply that does not name a state is `Failed`.
    pub fn get_remote_state(&self, element: &str, timeout: Duration) -> Result<State, CoreError> {
        if element.is_empty() {
            return Err(CoreError::InvalidArgument);
        }
        let data = self
            .shared
            .ctx
            .remote
            .get_remote_property(element, paths::CURRENT_STATE, timeout)?;
        data.get::<String>(0)
            .ok()
            .and_then(|name| name.parse().ok())
            .ok_or(CoreError::Failed)
    }
}

impl ErrorTrigger for StateMachine {
    fn error_event(&self) -> Result<(), CoreError> {
        self.send_event(StateEvent::Error)
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        if let Err(error) = self.perform_shutdown() {
            tracing::warn!(%error, "state machine dropped without reaching Shutdown");
        }
        let _ = self
            .shared
            .ctx
            .transport
            .unregister_command_listener(self.command_listener);
        let _ = self
            .shared
            .ctx
            .properties
            .unregister_listener(paths::STANDALONE_MODE, self.standalone_listener);
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use stepwise_props::{PropertyTree, RemoteProperties};
    use stepwise_test_utils::{init_test_tracing, LoopbackBus, RecordingIncidentSink};

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    struct Fixture {
        bus: Arc<LoopbackBus>,
        tree: Arc<PropertyTree>,
        incidents: Arc<RecordingIncidentSink>,
        stm: StateMachine,
    }

    fn fixture(name: &str) -> Fixture {
        init_test_tracing();
        let bus = LoopbackBus::new();
        let endpoint = bus.endpoint(name);
        let tree = Arc::new(PropertyTree::new());
        let remote = RemoteProperties::new(name, Arc::clone(&tree), endpoint.clone()).unwrap();
        let incidents = Arc::new(RecordingIncidentSink::new());
        let mut config = StateMachineConfig::new(name);
        config.queue_poll_interval = Duration::from_millis(10);
        config.shutdown_retry_interval = Duration::from_millis(50);
        let stm = StateMachine::new(
            config,
            StateMachineContext {
                transport: endpoint,
                properties: tree.clone(),
                remote: Arc::new(remote),
                incidents: incidents.clone(),
            },
        )
        .unwrap();
        Fixture {
            bus,
            tree,
            incidents,
            stm,
        }
    }

    fn to_idle(stm: &StateMachine) {
        stm.fire_up().unwrap();
        stm.startup_done_event().unwrap();
        stm.wait_for_state(State::Idle, WAIT, true).unwrap();
    }

    #[test]
    fn walks_the_lifecycle() {
        let f = fixture("Walker");
        to_idle(&f.stm);
        f.stm.initialize_event().unwrap();
        f.stm.init_done_event().unwrap();
        f.stm.start_event().unwrap();
        f.stm.wait_for_state(State::Running, WAIT, true).unwrap();
        assert_eq!(f.stm.get_state(), State::Running);
        assert_eq!(
            f.tree.get_value::<String>(paths::CURRENT_STATE, 0).unwrap(),
            "Running"
        );
    }

    #[test]
    fn undefined_events_are_ignored() {
        let f = fixture("Ignorer");
        to_idle(&f.stm);
        f.stm.start_event().unwrap();
        f.stm.init_done_event().unwrap();
        f.stm.initialize_event().unwrap();
        f.stm.wait_for_state(State::Initializing, WAIT, true).unwrap();
        assert!(f.incidents.is_empty());
    }

    #[test]
    fn veto_keeps_state_and_skips_entry() {
        let f = fixture("Vetoed");
        to_idle(&f.stm);
        let entered = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&entered);
        f.stm.register_entry_listener(Arc::new(move |_: State, _: State| -> Result<(), CoreError> {
            e.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let veto = f.stm.register_request_listener(Arc::new(
            |requested: State, _: State| -> Result<(), CoreError> {
                if requested == State::Initializing {
                    Err(CoreError::Failed)
                } else {
                    Ok(())
                }
            },
        ));
        f.stm.initialize_event().unwrap();
        assert_eq!(
            f.stm.wait_for_state(State::Initializing, Some(Duration::from_millis(200)), true),
            Err(CoreError::Timeout)
        );
        assert_eq!(f.stm.get_state(), State::Idle);
        assert_eq!(entered.load(Ordering::SeqCst), 0);
        assert_eq!(f.incidents.count(IncidentCode::StateRequestDenied), 1);

        f.stm.unregister_request_listener(veto).unwrap();
        f.stm.initialize_event().unwrap();
        f.stm.wait_for_state(State::Initializing, WAIT, true).unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_observe_old_then_new_state() {
        let f = fixture("Observer");
        let stm = Arc::new(f.stm);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (m, s) = (Arc::downgrade(&stm), Arc::clone(&seen));
        stm.register_request_listener(Arc::new(move |_: State, _: State| -> Result<(), CoreError> {
            if let Some(m) = m.upgrade() {
                s.lock().push(("request", m.get_state()));
            }
            Ok(())
        }));
        let (m, s) = (Arc::downgrade(&stm), Arc::clone(&seen));
        stm.register_exit_listener(Arc::new(move |_: State, _: State| -> Result<(), CoreError> {
            if let Some(m) = m.upgrade() {
                s.lock().push(("exit", m.get_state()));
            }
            Ok(())
        }));
        let (m, s) = (Arc::downgrade(&stm), Arc::clone(&seen));
        stm.register_entry_listener(Arc::new(move |_: State, _: State| -> Result<(), CoreError> {
            if let Some(m) = m.upgrade() {
                s.lock().push(("entry", m.get_state()));
            }
            Ok(())
        }));

        to_idle(&stm);
        assert_eq!(
            *seen.lock(),
            vec![
                ("entry", State::Startup),
                ("request", State::Startup),
                ("exit", State::Startup),
                ("entry", State::Idle),
            ]
        );
    }

    #[test]
    fn failing_entry_listener_escalates_to_error() {
        let f = fixture("Faulty");
        f.stm.register_entry_listener(Arc::new(
            |entered: State, _: State| -> Result<(), CoreError> {
                if entered == State::Initializing {
                    Err(CoreError::Failed)
                } else {
                    Ok(())
                }
            },
        ));
        to_idle(&f.stm);
        f.stm.initialize_event().unwrap();
        assert_eq!(
            f.stm.wait_for_state(State::Ready, WAIT, true),
            Err(CoreError::Failed)
        );
        assert_eq!(f.stm.get_state(), State::Error);
        assert_eq!(f.incidents.count(IncidentCode::TransitionFailed), 1);

        f.stm.error_fixed_event().unwrap();
        f.stm.wait_for_state(State::Idle, WAIT, false).unwrap();
    }

    #[test]
    fn error_during_startup_shuts_down() {
        let f = fixture("Doomed");
        f.stm.register_request_listener(Arc::new(|_: State, _: State| -> Result<(), CoreError> {
            Err(CoreError::Failed)
        }));
        f.stm.fire_up().unwrap();
        f.stm.error_event().unwrap();
        f.stm.wait_for_state(State::Shutdown, WAIT, false).unwrap();
        assert_eq!(f.incidents.count(IncidentCode::StartupFailure), 1);
        assert_eq!(
            f.incidents.count_severity(Severity::CriticalLocal),
            1
        );
    }

    #[test]
    fn clean_up_runs_on_restart_and_recovery() {
        struct Cleaner(AtomicUsize);
        impl StateEntryListener for Cleaner {
            fn on_entry(&self, _: State, _: State) -> Result<(), CoreError> {
                Ok(())
            }
            fn clean_up(&self, _: State) -> Result<(), CoreError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        let f = fixture("Cleaner");
        let cleaner = Arc::new(Cleaner(AtomicUsize::new(0)));
        f.stm.register_entry_listener(cleaner.clone());
        to_idle(&f.stm);
        assert_eq!(cleaner.0.load(Ordering::SeqCst), 0);

        f.stm.restart_event().unwrap();
        f.stm.wait_for_state(State::Startup, WAIT, true).unwrap();
        assert_eq!(cleaner.0.load(Ordering::SeqCst), 1);

        f.stm.startup_done_event().unwrap();
        f.stm.wait_for_state(State::Idle, WAIT, true).unwrap();
        f.stm.error_event().unwrap();
        f.stm.wait_for_state(State::Error, WAIT, false).unwrap();
        assert_eq!(cleaner.0.load(Ordering::SeqCst), 1);
        f.stm.error_fixed_event().unwrap();
        f.stm.wait_for_state(State::Idle, WAIT, false).unwrap();
        assert_eq!(cleaner.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn perform_shutdown_stops_and_ignores_vetoes() {
        let f = fixture("Stopper");
        to_idle(&f.stm);
        f.stm.initialize_event().unwrap();
        f.stm.init_done_event().unwrap();
        f.stm.start_event().unwrap();
        f.stm.wait_for_state(State::Running, WAIT, true).unwrap();
        f.stm.register_request_listener(Arc::new(|_: State, _: State| -> Result<(), CoreError> {
            Err(CoreError::Failed)
        }));
        f.stm.perform_shutdown().unwrap();
        assert_eq!(f.stm.get_state(), State::Shutdown);
        assert_eq!(f.incidents.count(IncidentCode::StateRequestDenied), 0);
    }

    #[test]
    fn wait_times_out_and_reports_error() {
        let f = fixture("Waiter");
        to_idle(&f.stm);
        assert_eq!(
            f.stm.wait_for_state(State::Running, Some(Duration::from_millis(30)), true),
            Err(CoreError::Timeout)
        );
        f.stm.error_event().unwrap();
        assert_eq!(
            f.stm.wait_for_state(State::Running, WAIT, true),
            Err(CoreError::Failed)
        );
    }

    #[test]
    fn standalone_mode_toggles_and_raises_incidents() {
        let f = fixture("Alone");
        to_idle(&f.stm);
        assert!(!f.stm.is_standalone());
        f.tree.set_value(paths::STANDALONE_MODE, true).unwrap();
        assert!(f.stm.is_standalone());
        f.tree.set_value(paths::STANDALONE_MODE, false).unwrap();
        assert!(!f.stm.is_standalone());
        assert_eq!(f.incidents.count(IncidentCode::StandaloneModeChanged), 2);
        assert_eq!(f.incidents.count_severity(Severity::Warning), 1);
    }

    #[test]
    fn fire_up_twice_is_invalid() {
        let f = fixture("Twice");
        f.stm.fire_up().unwrap();
        assert_eq!(f.stm.fire_up(), Err(CoreError::InvalidState));
    }

    #[test]
    fn remote_event_needs_a_receiver() {
        let f = fixture("Sender");
        assert_eq!(
            f.stm.trigger_remote_event(ControlEvent::Start, ""),
            Err(CoreError::InvalidArgument)
        );
        f.bus.set_fail_transmit(true);
        assert_eq!(
            f.stm.trigger_remote_event(ControlEvent::Start, "Other"),
            Err(CoreError::Failed)
        );
    }
}
