//! Handle-keyed access to sample buffers.
//!
//! [`DataAccess`] owns one [`SampleBuffer`] per registered signal and
//! forwards lock, unlock and update calls to it. Incoming samples are
//! stored first and then handed to the data listeners registered for the
//! signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use stepwise_core::{
    CancelToken, CoreError, DataListener, DataSample, Incident, IncidentCode, IncidentSink,
    ListenerId, Severity, SignalHandle, SignalRegistry, Timestamp, Transport,
};

use crate::buffer::{SampleBuffer, SampleRef, Selection};

const ORIGIN: &str = "DataAccess";

struct ListenerEntry {
    id: ListenerId,
    handle: SignalHandle,
    listener: Arc<dyn DataListener>,
}

/// Sample buffers and data listeners of one participant.
pub struct DataAccess {
    registry: Arc<dyn SignalRegistry>,
    transport: Arc<dyn Transport>,
    incidents: Arc<dyn IncidentSink>,
    buffers: RwLock<HashMap<SignalHandle, Arc<SampleBuffer>>>,
    listeners: Mutex<Vec<ListenerEntry>>,
}

// Compile-time assertion: DataAccess must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<DataAccess>();
};

impl DataAccess {
    /// Create an empty data access layer.
    pub fn new(
        registry: Arc<dyn SignalRegistry>,
        transport: Arc<dyn Transport>,
        incidents: Arc<dyn IncidentSink>,
    ) -> Self {
        Self {
            registry,
            transport,
            incidents,
            buffers: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The signal registry this layer reads sizes and backlogs from.
    pub fn registry(&self) -> &Arc<dyn SignalRegistry> {
        &self.registry
    }

    /// The incident sink shared with step data access.
    pub fn incidents(&self) -> &Arc<dyn IncidentSink> {
        &self.incidents
    }

    /// Create the buffer for a freshly registered signal.
    ///
    /// The backlog is preallocated from the registry's configuration with
    /// one zeroed default sample at time 0.
    pub fn signal_registered(&self, handle: SignalHandle) -> Result<(), CoreError> {
        let backlog = self.registry.sample_backlog(handle)?;
        let size = self.registry.sample_size(handle)?;
        let buffer = Arc::new(SampleBuffer::preallocated(handle, backlog, size));
        self.buffers.write().insert(handle, buffer);
        tracing::debug!(signal = %handle, backlog, size, "sample buffer created");
        Ok(())
    }

    /// Drop the buffer and every data listener of a signal.
    pub fn signal_unregistered(&self, handle: SignalHandle) -> Result<(), CoreError> {
        self.listeners.lock().retain(|l| l.handle != handle);
        self.buffers
            .write()
            .remove(&handle)
            .map(|_| ())
            .ok_or(CoreError::NotFound)
    }

    /// Resize a signal's backlog to the registry's current setting.
    pub fn signal_backlog_changed(&self, handle: SignalHandle) -> Result<(), CoreError> {
        let size = self.registry.sample_size(handle)?;
        let backlog = self.registry.sample_backlog(handle)?;
        let buffer = self.sample_buffer(handle).map_err(|_| CoreError::InvalidArgument)?;
        buffer.signal_backlog_changed(backlog, size);
        Ok(())
    }

    /// Shared handle to a signal's buffer.
    pub fn sample_buffer(&self, handle: SignalHandle) -> Result<Arc<SampleBuffer>, CoreError> {
        self.buffers
            .read()
            .get(&handle)
            .cloned()
            .ok_or(CoreError::NotFound)
    }

    /// Lock the most recent sample.
    pub fn lock_data(&self, handle: SignalHandle) -> Result<SampleRef, CoreError> {
        self.lock_data_at(handle, 0, Selection::Latest)
    }

    /// Lock a sample by selection rule.
    pub fn lock_data_at(
        &self,
        handle: SignalHandle,
        sim_time: Timestamp,
        selection: Selection,
    ) -> Result<SampleRef, CoreError> {
        let buffer = self.sample_buffer(handle).map_err(|_| CoreError::InvalidArgument)?;
        buffer.lock_data_at(selection, sim_time)
    }

    /// Lock the newest sample not after `sim_time`.
    pub fn lock_data_at_upper_bound(
        &self,
        handle: SignalHandle,
        sim_time: Timestamp,
    ) -> Result<SampleRef, CoreError> {
        self.sample_buffer(handle)?.lock_data_at_upper_bound(sim_time)
    }

    /// Release a lock.
    pub fn unlock_data(&self, sample: &SampleRef) -> Result<(), CoreError> {
        let buffer = self
            .sample_buffer(sample.handle())
            .map_err(|_| CoreError::InvalidArgument)?;
        buffer.unlock_data(sample)
    }

    /// Block until a sample of `handle` lies within `[lower, upper]`.
    pub fn wait_until_in_time_window(
        &self,
        handle: SignalHandle,
        lower: Timestamp,
        upper: Timestamp,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), CoreError> {
        self.sample_buffer(handle)?
            .wait_until_in_time_window(lower, upper, timeout, cancel)
    }

    /// Store an incoming sample and notify the signal's data listeners.
    ///
    /// A sample that finds every slot locked is dropped with a Warning
    /// incident; that is not an error for the caller.
    pub fn update(&self, sample: &DataSample) -> Result<(), CoreError> {
        let buffer = self.sample_buffer(sample.handle)?;
        match buffer.update(sample) {
            Ok(()) => {}
            Err(CoreError::ResourceInUse) => {
                tracing::warn!(signal = %sample.handle, time = sample.time, "sample dropped, backlog exhausted");
                self.incidents.invoke_incident(Incident::new(
                    IncidentCode::SampleDropped,
                    Severity::Warning,
                    "A sample was dropped from the receive backlog since all available slots are locked for reading",
                    ORIGIN,
                ));
            }
            Err(e) => return Err(e),
        }

        let targets: Vec<Arc<dyn DataListener>> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.handle == sample.handle)
            .map(|l| Arc::clone(&l.listener))
            .collect();
        for listener in targets {
            if let Err(e) = listener.on_sample(sample) {
                tracing::debug!(signal = %sample.handle, error = %e, "data listener failed");
            }
        }
        Ok(())
    }

    /// Observe samples of `handle` after they are stored.
    pub fn register_data_listener(
        &self,
        handle: SignalHandle,
        listener: Arc<dyn DataListener>,
    ) -> Result<ListenerId, CoreError> {
        if !self.buffers.read().contains_key(&handle) {
            return Err(CoreError::NotFound);
        }
        let id = ListenerId::next();
        self.listeners.lock().push(ListenerEntry {
            id,
            handle,
            listener,
        });
        Ok(id)
    }

    /// Stop observing.
    pub fn unregister_data_listener(&self, id: ListenerId) -> Result<(), CoreError> {
        let mut listeners = self.listeners.lock();
        let pos = listeners
            .iter()
            .position(|l| l.id == id)
            .ok_or(CoreError::NotFound)?;
        listeners.remove(pos);
        Ok(())
    }

    /// Publish a sample through the transport.
    pub fn transmit_data(&self, sample: &DataSample) -> Result<(), CoreError> {
        self.transport.transmit_data(sample)
    }

    /// Reset every buffer to its single default sample.
    ///
    /// Signal registrations survive. Slots that readers still hold raise
    /// a Warning incident each.
    pub fn clear_all(&self) -> Result<(), CoreError> {
        let buffers: Vec<Arc<SampleBuffer>> = self.buffers.read().values().cloned().collect();
        for buffer in buffers {
            let locked = buffer.reset();
            for _ in 0..locked {
                self.incidents.invoke_incident(Incident::new(
                    IncidentCode::SamplesStillLocked,
                    Severity::Warning,
                    format!(
                        "A sample of signal {} has a non-zero lock count while the backlog is reset",
                        buffer.handle()
                    ),
                    ORIGIN,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::{SignalDescription, SignalDirection};
    use stepwise_test_utils::{LoopbackBus, MockSignalRegistry, RecordingIncidentSink};

    struct Fixture {
        access: DataAccess,
        registry: Arc<MockSignalRegistry>,
        incidents: Arc<RecordingIncidentSink>,
        handle: SignalHandle,
    }

    fn fixture(backlog: usize) -> Fixture {
        let registry = Arc::new(MockSignalRegistry::new());
        let incidents = Arc::new(RecordingIncidentSink::new());
        let bus = LoopbackBus::new();
        let access = DataAccess::new(registry.clone(), bus.endpoint("me"), incidents.clone());
        let handle = registry
            .register_signal(
                &SignalDescription::raw("In", 4, SignalDirection::Input).with_backlog(backlog),
            )
            .unwrap();
        access.signal_registered(handle).unwrap();
        Fixture {
            access,
            registry,
            incidents,
            handle,
        }
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let f = fixture(1);
        assert_eq!(
            f.access.lock_data(SignalHandle(999)).unwrap_err(),
            CoreError::InvalidArgument
        );
        assert_eq!(
            f.access.lock_data_at_upper_bound(SignalHandle(999), 0).unwrap_err(),
            CoreError::NotFound
        );
    }

    #[test]
    fn dropped_sample_is_a_warning_not_an_error() {
        let f = fixture(1);
        let held = f.access.lock_data(f.handle).unwrap();
        let res = f.access.update(&DataSample::new(f.handle, 10, vec![1; 4]));
        assert_eq!(res, Ok(()));
        let recorded = f.incidents.incidents();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].code, IncidentCode::SampleDropped);
        assert_eq!(recorded[0].severity, Severity::Warning);
        f.access.unlock_data(&held).unwrap();
    }

    #[test]
    fn backlog_change_reads_registry() {
        let f = fixture(1);
        f.registry.set_sample_backlog(f.handle, 4).unwrap();
        f.access.signal_backlog_changed(f.handle).unwrap();
        assert_eq!(f.access.sample_buffer(f.handle).unwrap().len(), 4);
    }

    #[test]
    fn clear_all_warns_for_held_samples() {
        let f = fixture(2);
        f.access
            .update(&DataSample::new(f.handle, 5, vec![9; 4]))
            .unwrap();
        let held = f.access.lock_data(f.handle).unwrap();
        f.access.clear_all().unwrap();
        assert_eq!(f.incidents.count(IncidentCode::SamplesStillLocked), 1);
        let d = f.access.lock_data(f.handle).unwrap();
        assert_eq!(d.time(), 0);
        assert!(!d.is_valid());
        assert_eq!(held.data(), &[9; 4]);
    }

    #[test]
    fn unregister_drops_buffer_and_listeners() {
        struct Nop;
        impl DataListener for Nop {
            fn on_sample(&self, _: &DataSample) -> Result<(), CoreError> {
                Ok(())
            }
        }
        let f = fixture(1);
        let id = f
            .access
            .register_data_listener(f.handle, Arc::new(Nop))
            .unwrap();
        f.access.signal_unregistered(f.handle).unwrap();
        assert_eq!(f.access.unregister_data_listener(id), Err(CoreError::NotFound));
        assert!(f.access.sample_buffer(f.handle).is_err());
    }
}
