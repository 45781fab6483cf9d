//! Collaborator traits.
//!
//! The subsystems depend only on these narrow interfaces. Transport
//! bindings, signal registries and diagnostics handlers are supplied by
//! the host; `stepwise-test-utils` provides in-memory doubles.

use crate::error::CoreError;
use crate::id::{ListenerId, SignalDirection, SignalHandle};
use crate::incident::Incident;
use crate::message::{Command, Notification};
use crate::sample::{DataSample, SignalDescription};
use crate::value::{PropertyChange, PropertyData, Value};
use std::sync::Arc;
use std::time::Duration;

// ── Transport ──────────────────────────────────────────────────

/// Receives commands delivered by a [`Transport`].
pub trait CommandListener: Send + Sync {
    /// Handle one command.
    fn on_command(&self, command: &Command) -> Result<(), CoreError>;
}

/// Receives notifications delivered by a [`Transport`].
pub trait NotificationListener: Send + Sync {
    /// Handle one notification.
    fn on_notification(&self, notification: &Notification) -> Result<(), CoreError>;
}

/// Receives samples after they were stored in a sample buffer.
pub trait DataListener: Send + Sync {
    /// Handle one sample.
    fn on_sample(&self, sample: &DataSample) -> Result<(), CoreError>;
}

/// Message and sample transport.
///
/// Implementations decide the wire format and delivery mechanism.
/// Listeners may be invoked from any thread, including from inside a
/// `transmit_*` call.
pub trait Transport: Send + Sync {
    /// Send a command.
    fn transmit_command(&self, command: &Command) -> Result<(), CoreError>;

    /// Subscribe to incoming commands.
    fn register_command_listener(
        &self,
        listener: Arc<dyn CommandListener>,
    ) -> Result<ListenerId, CoreError>;

    /// Remove a command subscription.
    fn unregister_command_listener(&self, id: ListenerId) -> Result<(), CoreError>;

    /// Send a notification.
    fn transmit_notification(&self, notification: &Notification) -> Result<(), CoreError>;

    /// Subscribe to incoming notifications.
    fn register_notification_listener(
        &self,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<ListenerId, CoreError>;

    /// Remove a notification subscription.
    fn unregister_notification_listener(&self, id: ListenerId) -> Result<(), CoreError>;

    /// Publish a sample of an output signal.
    fn transmit_data(&self, sample: &DataSample) -> Result<(), CoreError>;
}

// ── Properties ─────────────────────────────────────────────────

/// Observes a property node and its descendants.
///
/// Every method defaults to accepting the change.
pub trait PropertyListener: Send + Sync {
    /// A node was created.
    fn on_property_added(&self, _change: &PropertyChange) -> Result<(), CoreError> {
        Ok(())
    }

    /// A node's value changed.
    fn on_property_changed(&self, _change: &PropertyChange) -> Result<(), CoreError> {
        Ok(())
    }

    /// A node is about to be removed.
    fn on_property_deleted(&self, _change: &PropertyChange) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Local key/value view of the property tree.
pub trait PropertyStore: Send + Sync {
    /// Snapshot of the node at `path`, if present.
    fn get_property(&self, path: &str) -> Option<PropertyData>;

    /// Assign a scalar value, creating the node and its ancestors.
    fn set_property_value(&self, path: &str, value: Value) -> Result<(), CoreError>;

    /// Observe the node at `path` and its descendants.
    fn register_listener(
        &self,
        path: &str,
        listener: Arc<dyn PropertyListener>,
    ) -> Result<ListenerId, CoreError>;

    /// Stop observing.
    fn unregister_listener(&self, path: &str, id: ListenerId) -> Result<(), CoreError>;
}

/// Blocking access to another participant's property tree.
pub trait RemotePropertyAccess: Send + Sync {
    /// Fetch a snapshot of `path` on `element`.
    fn get_remote_property(
        &self,
        element: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<PropertyData, CoreError>;

    /// Assign values on `element`. A zero timeout does not wait for the
    /// confirming notification.
    fn set_remote_property_values(
        &self,
        element: &str,
        path: &str,
        values: &[Value],
        timeout: Duration,
    ) -> Result<(), CoreError>;

    /// Delete `path` on `element`. Fire-and-forget.
    fn delete_remote_property(&self, element: &str, path: &str) -> Result<(), CoreError>;

    /// Keep a local copy of `remote_path` under `local_path` in sync.
    fn mirror_remote_property(
        &self,
        element: &str,
        remote_path: &str,
        local_path: &str,
        timeout: Duration,
    ) -> Result<(), CoreError>;

    /// Stop mirroring.
    fn unmirror_remote_property(
        &self,
        element: &str,
        remote_path: &str,
        local_path: &str,
        timeout: Duration,
    ) -> Result<(), CoreError>;
}

// ── Signals ────────────────────────────────────────────────────

/// Name and size bookkeeping for registered signals.
pub trait SignalRegistry: Send + Sync {
    /// Register a signal and issue its handle.
    fn register_signal(&self, description: &SignalDescription) -> Result<SignalHandle, CoreError>;

    /// Remove a signal.
    fn unregister_signal(&self, handle: SignalHandle) -> Result<(), CoreError>;

    /// Payload size in bytes.
    fn sample_size(&self, handle: SignalHandle) -> Result<usize, CoreError>;

    /// Configured backlog.
    fn sample_backlog(&self, handle: SignalHandle) -> Result<usize, CoreError>;

    /// Change the configured backlog.
    fn set_sample_backlog(&self, handle: SignalHandle, backlog: usize) -> Result<(), CoreError>;

    /// Resolve a signal by name.
    fn handle_by_name(
        &self,
        name: &str,
        direction: SignalDirection,
    ) -> Result<SignalHandle, CoreError>;
}

// ── Diagnostics and escalation ─────────────────────────────────

/// Receives incidents.
pub trait IncidentSink: Send + Sync {
    /// Report one incident.
    fn invoke_incident(&self, incident: Incident);
}

/// Escalation path into the participant's state machine.
pub trait ErrorTrigger: Send + Sync {
    /// Request a transition into Error.
    fn error_event(&self) -> Result<(), CoreError>;
}
