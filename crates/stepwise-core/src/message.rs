//! Command and notification model exchanged through a [`Transport`](crate::Transport).
//!
//! These are in-memory types only. How a transport binding serializes
//! them is outside this crate.

use crate::id::Timestamp;
use crate::state::State;
use crate::value::{PropertyData, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Receiver name that addresses every participant.
pub const BROADCAST: &str = "*";

/// Routing and timing information common to every message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// Element name of the sender.
    pub sender: String,
    /// Element name of the receiver, or [`BROADCAST`].
    pub receiver: String,
    /// Wall-clock send time in microseconds since the Unix epoch.
    pub timestamp: Timestamp,
}

impl MessageHeader {
    /// Header stamped with the current wall-clock time.
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as Timestamp)
            .unwrap_or(0);
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            timestamp,
        }
    }

    /// Whether this message is addressed to `element`.
    pub fn is_for(&self, element: &str) -> bool {
        self.receiver == BROADCAST || self.receiver == element
    }
}

/// Remote control events mapped onto state machine events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlEvent {
    /// Leave Idle to configure.
    Initialize,
    /// Start running.
    Start,
    /// Return to Idle.
    Stop,
    /// Terminate.
    Shutdown,
    /// Recover from Error.
    ErrorFixed,
    /// Go back to Startup.
    Restart,
}

/// A command body.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandKind {
    /// Drive the receiver's state machine.
    Control(ControlEvent),
    /// Request a `Property` notification for `path`.
    GetProperty {
        /// Property path on the receiver.
        path: String,
    },
    /// Assign values, then answer with a `Property` notification.
    SetProperty {
        /// Property path on the receiver.
        path: String,
        /// New values; more than one makes an array.
        values: Vec<Value>,
    },
    /// Remove a property subtree.
    DeleteProperty {
        /// Property path on the receiver.
        path: String,
    },
    /// Subscribe the sender to changes below `path`.
    RegPropListener {
        /// Property path on the receiver.
        path: String,
    },
    /// Drop one subscription of the sender below `path`.
    UnregPropListener {
        /// Property path on the receiver.
        path: String,
    },
    /// Ask the receiver for its step schedule.
    GetSchedule,
}

/// A command addressed to one or more participants.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    /// Routing header.
    pub header: MessageHeader,
    /// Body.
    pub kind: CommandKind,
}

impl Command {
    /// Build a command from `sender` to `receiver`.
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            header: MessageHeader::new(sender, receiver),
            kind,
        }
    }
}

/// Kind of change carried by a property change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    /// A node was added.
    New,
    /// A node's value changed.
    Change,
    /// A node was removed.
    Delete,
}

/// One scheduled step listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Task UUID.
    pub uuid: String,
    /// Cycle time in microseconds.
    pub cycle_time: Timestamp,
}

/// A notification body.
#[derive(Clone, Debug, PartialEq)]
pub enum NotificationKind {
    /// The sender entered `State`.
    State(State),
    /// Answer to `GetProperty` / `SetProperty`.
    Property {
        /// Requested path.
        path: String,
        /// Snapshot of the node.
        data: PropertyData,
    },
    /// Answer to `RegPropListener`, carrying the subscribed subtree.
    RegPropListenerAck {
        /// Subscribed path.
        path: String,
        /// Snapshot of the subtree.
        data: PropertyData,
    },
    /// Answer to `UnregPropListener`.
    UnregPropListenerAck {
        /// Unsubscribed path.
        path: String,
    },
    /// A subscribed node changed on the sender.
    PropertyChanged {
        /// What happened.
        event: ChangeEvent,
        /// Absolute path of the affected node on the sender.
        path: String,
        /// Snapshot of the affected node.
        data: PropertyData,
    },
    /// The sender was renamed from `old_name` to `header.sender`.
    NameChanged {
        /// Previous element name.
        old_name: String,
    },
    /// Answer to `GetSchedule`.
    Schedule(Vec<ScheduleEntry>),
}

/// A notification addressed to one or more participants.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Routing header.
    pub header: MessageHeader,
    /// Body.
    pub kind: NotificationKind,
}

impl Notification {
    /// Build a notification from `sender` to `receiver`.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            header: MessageHeader::new(sender, receiver),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_everyone() {
        let h = MessageHeader::new("a", BROADCAST);
        assert!(h.is_for("b"));
        let h = MessageHeader::new("a", "c");
        assert!(!h.is_for("b"));
        assert!(h.is_for("c"));
    }

    #[test]
    fn header_is_stamped() {
        let n = Notification::new("a", "b", NotificationKind::State(State::Idle));
        assert!(n.header.timestamp > 0);
    }
}
