//! Test utilities and collaborator doubles for Stepwise development.
//!
//! Provides a [`LoopbackBus`] transport connecting several participants
//! in one process, an in-memory [`MockSignalRegistry`], a
//! [`RecordingIncidentSink`], a [`RecordingErrorTrigger`], and
//! [`init_test_tracing`] for log output during tests.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bus;

pub use bus::{BusEndpoint, LoopbackBus};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use parking_lot::Mutex;
use stepwise_core::{
    CoreError, ErrorTrigger, Incident, IncidentCode, IncidentSink, Severity, SignalDescription,
    SignalDirection, SignalHandle, SignalRegistry,
};

/// Install a `tracing` subscriber writing to the test harness output.
///
/// Honours `RUST_LOG`. Safe to call from every test.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Incident sink that keeps every incident for inspection.
#[derive(Default)]
pub struct RecordingIncidentSink {
    incidents: Mutex<Vec<Incident>>,
}

impl RecordingIncidentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.lock().clone()
    }

    /// Number of incidents with `code`.
    pub fn count(&self, code: IncidentCode) -> usize {
        self.incidents.lock().iter().filter(|i| i.code == code).count()
    }

    /// Number of incidents with `severity`.
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.incidents
            .lock()
            .iter()
            .filter(|i| i.severity == severity)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.lock().is_empty()
    }

    pub fn clear(&self) {
        self.incidents.lock().clear();
    }
}

impl IncidentSink for RecordingIncidentSink {
    fn invoke_incident(&self, incident: Incident) {
        self.incidents.lock().push(incident);
    }
}

/// Error trigger that only counts how often it was pulled.
#[derive(Default)]
pub struct RecordingErrorTrigger {
    count: AtomicUsize,
}

impl RecordingErrorTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl ErrorTrigger for RecordingErrorTrigger {
    fn error_event(&self) -> Result<(), CoreError> {
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// In-memory signal registry. Handles start at 1.
#[derive(Default)]
pub struct MockSignalRegistry {
    signals: Mutex<Vec<Option<SignalDescription>>>,
}

impl MockSignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Description of a registered signal.
    pub fn description(&self, handle: SignalHandle) -> Option<SignalDescription> {
        let idx = (handle.0 as usize).checked_sub(1)?;
        self.signals.lock().get(idx).cloned().flatten()
    }

    fn with<T>(
        &self,
        handle: SignalHandle,
        f: impl FnOnce(&mut SignalDescription) -> T,
    ) -> Result<T, CoreError> {
        let idx = (handle.0 as usize)
            .checked_sub(1)
            .ok_or(CoreError::NotFound)?;
        let mut signals = self.signals.lock();
        signals
            .get_mut(idx)
            .and_then(Option::as_mut)
            .map(f)
            .ok_or(CoreError::NotFound)
    }
}

impl SignalRegistry for MockSignalRegistry {
    fn register_signal(&self, description: &SignalDescription) -> Result<SignalHandle, CoreError> {
        let mut signals = self.signals.lock();
        let duplicate = signals.iter().flatten().any(|s| {
            s.name == description.name && s.direction == description.direction
        });
        if duplicate {
            return Err(CoreError::ResourceInUse);
        }
        signals.push(Some(description.clone()));
        Ok(SignalHandle(signals.len() as u32))
    }

    fn unregister_signal(&self, handle: SignalHandle) -> Result<(), CoreError> {
        let idx = (handle.0 as usize)
            .checked_sub(1)
            .ok_or(CoreError::NotFound)?;
        let mut signals = self.signals.lock();
        match signals.get_mut(idx) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(CoreError::NotFound),
        }
    }

    fn sample_size(&self, handle: SignalHandle) -> Result<usize, CoreError> {
        self.with(handle, |s| s.size)
    }

    fn sample_backlog(&self, handle: SignalHandle) -> Result<usize, CoreError> {
        self.with(handle, |s| s.backlog)
    }

    fn set_sample_backlog(&self, handle: SignalHandle, backlog: usize) -> Result<(), CoreError> {
        self.with(handle, |s| s.backlog = backlog)
    }

    fn handle_by_name(
        &self,
        name: &str,
        direction: SignalDirection,
    ) -> Result<SignalHandle, CoreError> {
        self.signals
            .lock()
            .iter()
            .position(|s| {
                s.as_ref()
                    .is_some_and(|s| s.name == name && s.direction == direction)
            })
            .map(|idx| SignalHandle(idx as u32 + 1))
            .ok_or(CoreError::NotFound)
    }
}
