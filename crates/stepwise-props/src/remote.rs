//! Remote property protocol.
//!
//! [`RemoteProperties`] connects a [`PropertyTree`] to a [`Transport`]:
//!
//! - it serves property commands from other participants (get, set,
//!   delete, subscribe, unsubscribe), publishing changes of subscribed
//!   subtrees through refcounted proxy listeners;
//! - it issues those commands to other participants as blocking round
//!   trips, each completed by the first matching notification;
//! - it keeps mirrored remote subtrees in sync with the local tree.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use stepwise_core::{
    paths, ChangeEvent, Command, CommandKind, CommandListener, CoreError, ListenerId,
    Notification, NotificationKind, NotificationListener, PropertyChange, PropertyData,
    PropertyListener, RemotePropertyAccess, Transport, Value, BROADCAST,
};

use crate::mirror::{translate, MirrorIndex, MirrorRecord, MirrorTable, MirrorUpdate};
use crate::tree::PropertyTree;

/// Property path holding this participant's element name.
pub const ELEMENT_NAME_PATH: &str = paths::ELEMENT_NAME;

fn validate_element(element: &str) -> Result<(), CoreError> {
    if element.is_empty() || element.contains('*') || element.contains('?') {
        return Err(CoreError::InvalidArgument);
    }
    Ok(())
}

// ── Pending round trips ────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expect {
    Property,
    RegAck,
    UnregAck,
}

impl Expect {
    fn path_of(self, kind: &NotificationKind) -> Option<&str> {
        match (self, kind) {
            (Self::Property, NotificationKind::Property { path, .. })
            | (Self::RegAck, NotificationKind::RegPropListenerAck { path, .. })
            | (Self::UnregAck, NotificationKind::UnregPropListenerAck { path }) => {
                Some(path.as_str())
            }
            _ => None,
        }
    }
}

struct PendingRequest {
    id: ListenerId,
    element: String,
    path: String,
    expect: Expect,
    reply: Sender<Notification>,
}

// ── Proxies ────────────────────────────────────────────────────

struct ProxyRecord {
    id: ListenerId,
    subscriber: String,
    path: String,
    refs: u32,
    tree_listener: ListenerId,
}

/// Publishes changes of a subscribed subtree to one remote subscriber.
struct ProxyListener {
    shared: Weak<Shared>,
    id: ListenerId,
}

impl ProxyListener {
    fn publish(&self, event: ChangeEvent, change: &PropertyChange) -> Result<(), CoreError> {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };
        let (subscriber, root) = {
            let mut proxies = shared.proxies.lock();
            let Some(pos) = proxies.iter().position(|p| p.id == self.id) else {
                return Ok(());
            };
            let subscriber = proxies[pos].subscriber.clone();
            let root = event == ChangeEvent::Delete && change.path == proxies[pos].path;
            if root {
                proxies.remove(pos);
            }
            (subscriber, root)
        };
        if root {
            tracing::debug!(path = %change.path, %subscriber, "subscribed property deleted, final delete sent");
        }
        let note = Notification::new(
            shared.element(),
            subscriber,
            NotificationKind::PropertyChanged {
                event,
                path: change.path.clone(),
                data: change.property.clone(),
            },
        );
        shared.transport.transmit_notification(&note)
    }
}

impl PropertyListener for ProxyListener {
    fn on_property_added(&self, change: &PropertyChange) -> Result<(), CoreError> {
        self.publish(ChangeEvent::New, change)
    }

    fn on_property_changed(&self, change: &PropertyChange) -> Result<(), CoreError> {
        self.publish(ChangeEvent::Change, change)
    }

    fn on_property_deleted(&self, change: &PropertyChange) -> Result<(), CoreError> {
        self.publish(ChangeEvent::Delete, change)
    }
}

// ── Shared state ───────────────────────────────────────────────

struct Shared {
    element: RwLock<String>,
    tree: Arc<PropertyTree>,
    transport: Arc<dyn Transport>,
    pending: Mutex<Vec<PendingRequest>>,
    proxies: Mutex<Vec<ProxyRecord>>,
    mirrors: Mutex<MirrorTable>,
}

impl Shared {
    fn element(&self) -> String {
        self.element.read().clone()
    }

    fn reply(&self, receiver: &str, kind: NotificationKind) {
        let note = Notification::new(self.element(), receiver, kind);
        if let Err(e) = self.transport.transmit_notification(&note) {
            tracing::warn!(%receiver, error = %e, "property reply not sent");
        }
    }

    fn serve(self: &Arc<Self>, command: &Command) -> Result<(), CoreError> {
        if !command.header.is_for(&self.element()) {
            return Ok(());
        }
        let sender = command.header.sender.as_str();
        match &command.kind {
            CommandKind::GetProperty { path } => {
                if let Some(data) = self.tree.get(path) {
                    self.reply(sender, NotificationKind::Property { path: path.clone(), data });
                }
                Ok(())
            }
            CommandKind::SetProperty { path, values } => {
                self.tree.set_values(path, values)?;
                if let Some(data) = self.tree.get(path) {
                    self.reply(sender, NotificationKind::Property { path: path.clone(), data });
                }
                Ok(())
            }
            CommandKind::DeleteProperty { path } => self.tree.delete_property(path),
            CommandKind::RegPropListener { path } => self.subscribe(sender, path),
            CommandKind::UnregPropListener { path } => {
                self.unsubscribe(sender, path);
                self.reply(
                    sender,
                    NotificationKind::UnregPropListenerAck { path: path.clone() },
                );
                Ok(())
            }
            CommandKind::Control(_) | CommandKind::GetSchedule => Ok(()),
        }
    }

    fn subscribe(self: &Arc<Self>, subscriber: &str, path: &str) -> Result<(), CoreError> {
        let data = self.tree.get(path).ok_or(CoreError::NotFound)?;
        let existing = {
            let mut proxies = self.proxies.lock();
            match proxies
                .iter_mut()
                .find(|p| p.subscriber == subscriber && p.path == path)
            {
                Some(p) => {
                    p.refs += 1;
                    true
                }
                None => false,
            }
        };
        if !existing {
            let id = ListenerId::next();
            let listener = Arc::new(ProxyListener {
                shared: Arc::downgrade(self),
                id,
            });
            let tree_listener = self.tree.register_listener(path, listener)?;
            self.proxies.lock().push(ProxyRecord {
                id,
                subscriber: subscriber.to_owned(),
                path: path.to_owned(),
                refs: 1,
                tree_listener,
            });
        }
        self.reply(
            subscriber,
            NotificationKind::RegPropListenerAck {
                path: path.to_owned(),
                data,
            },
        );
        Ok(())
    }

    fn unsubscribe(&self, subscriber: &str, path: &str) {
        let released = {
            let mut proxies = self.proxies.lock();
            let Some(pos) = proxies
                .iter()
                .position(|p| p.subscriber == subscriber && p.path == path)
            else {
                return;
            };
            proxies[pos].refs -= 1;
            if proxies[pos].refs == 0 {
                Some(proxies.remove(pos))
            } else {
                None
            }
        };
        if let Some(record) = released {
            let _ = self.tree.unregister_listener(&record.path, record.tree_listener);
        }
    }

    fn on_notification(&self, note: &Notification) -> Result<(), CoreError> {
        if !note.header.is_for(&self.element()) {
            return Ok(());
        }
        if let NotificationKind::NameChanged { old_name } = &note.kind {
            self.rebind(old_name, &note.header.sender);
            return Ok(());
        }
        let taken = {
            let mut pending = self.pending.lock();
            pending
                .iter()
                .position(|p| {
                    p.element == note.header.sender
                        && p.expect.path_of(&note.kind) == Some(p.path.as_str())
                })
                .map(|pos| pending.remove(pos))
        };
        if let Some(request) = taken {
            let _ = request.reply.try_send(note.clone());
        }
        Ok(())
    }

    fn rebind(&self, old: &str, new: &str) {
        let mirrors = self.mirrors.lock().rename_element(old, new);
        let mut proxies = 0;
        for p in self.proxies.lock().iter_mut().filter(|p| p.subscriber == old) {
            p.subscriber = new.to_owned();
            proxies += 1;
        }
        if mirrors + proxies > 0 {
            tracing::debug!(%old, %new, mirrors, proxies, "remote element renamed");
        }
    }

    fn apply_mirror(&self, index: MirrorIndex, note: &Notification) -> Result<(), CoreError> {
        let NotificationKind::PropertyChanged { event, path, data } = &note.kind else {
            return Ok(());
        };
        let (update, root_path) = {
            let mirrors = self.mirrors.lock();
            let Some(record) = mirrors.get(index) else {
                return Ok(());
            };
            if !record.covers(&note.header.sender, path) {
                return Ok(());
            }
            let root_path = record.grafted.then(|| record.root_path.clone());
            (translate(record, *event, path), root_path)
        };
        if root_path.is_some_and(|root| !self.tree.exists(&root)) {
            self.abandon_mirror(index);
            return Ok(());
        }
        let Some(update) = update else {
            return Ok(());
        };
        tracing::debug!(?update, "mirror update");
        match update {
            MirrorUpdate::SetValues { path } => {
                if data.values.is_empty() {
                    Ok(())
                } else {
                    self.tree.set_values(&path, &data.values)
                }
            }
            MirrorUpdate::Add { parent, name } => {
                let mut child = data.clone();
                child.name = name;
                self.tree.merge_property(&parent, &child)
            }
            MirrorUpdate::Delete { path } => self.tree.delete_property(&path),
            MirrorUpdate::DropMirror => {
                let record = self.mirrors.lock().remove(index);
                if let Some(record) = record {
                    self.drop_local_mirror(&record);
                }
                Ok(())
            }
        }
    }

    /// End a mirror whose local subtree was deleted, releasing the remote
    /// subscription without waiting for its acknowledgement.
    fn abandon_mirror(&self, index: MirrorIndex) {
        let Some(record) = self.mirrors.lock().remove(index) else {
            return;
        };
        if let Some(id) = record.listener {
            let _ = self.transport.unregister_notification_listener(id);
        }
        tracing::debug!(
            element = %record.element,
            path = %record.root_path,
            "mirrored subtree deleted locally, mirror dropped"
        );
        let command = Command::new(
            self.element(),
            record.element,
            CommandKind::UnregPropListener {
                path: record.remote_path,
            },
        );
        if let Err(e) = self.transport.transmit_command(&command) {
            tracing::debug!(error = %e, "remote subscription not released");
        }
    }

    /// Remove a mirror's local subtree and its transport listener.
    fn drop_local_mirror(&self, record: &MirrorRecord) {
        if let Some(id) = record.listener {
            let _ = self.transport.unregister_notification_listener(id);
        }
        match self.tree.delete_property(&record.root_path) {
            Ok(()) | Err(CoreError::NotFound) => {}
            Err(e) => tracing::debug!(path = %record.root_path, error = %e, "mirror subtree not removed"),
        }
    }
}

struct CommandHook(Weak<Shared>);

impl CommandListener for CommandHook {
    fn on_command(&self, command: &Command) -> Result<(), CoreError> {
        match self.0.upgrade() {
            Some(shared) => shared.serve(command),
            None => Ok(()),
        }
    }
}

struct NotificationHook(Weak<Shared>);

impl NotificationListener for NotificationHook {
    fn on_notification(&self, notification: &Notification) -> Result<(), CoreError> {
        match self.0.upgrade() {
            Some(shared) => shared.on_notification(notification),
            None => Ok(()),
        }
    }
}

/// Feeds one mirror from `PropertyChanged` notifications.
struct MirrorListener {
    shared: Weak<Shared>,
    index: MirrorIndex,
}

impl NotificationListener for MirrorListener {
    fn on_notification(&self, notification: &Notification) -> Result<(), CoreError> {
        match self.shared.upgrade() {
            Some(shared) => shared.apply_mirror(self.index, notification),
            None => Ok(()),
        }
    }
}

// ── RemoteProperties ───────────────────────────────────────────

/// Remote access to and from one participant's property tree.
///
/// Dropping it unsubscribes from the transport and discards every
/// mirror's local subtree.
pub struct RemoteProperties {
    shared: Arc<Shared>,
    command_listener: ListenerId,
    notification_listener: ListenerId,
}

// Compile-time assertion: RemoteProperties must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<RemoteProperties>();
};

impl RemoteProperties {
    /// Attach `tree` to `transport` as participant `element`.
    ///
    /// Writes the element name to [`ELEMENT_NAME_PATH`].
    pub fn new(
        element: &str,
        tree: Arc<PropertyTree>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CoreError> {
        validate_element(element)?;
        tree.set_value(ELEMENT_NAME_PATH, element)?;
        let shared = Arc::new(Shared {
            element: RwLock::new(element.to_owned()),
            tree,
            transport,
            pending: Mutex::new(Vec::new()),
            proxies: Mutex::new(Vec::new()),
            mirrors: Mutex::new(MirrorTable::default()),
        });
        let command_listener = shared
            .transport
            .register_command_listener(Arc::new(CommandHook(Arc::downgrade(&shared))))?;
        let notification_listener = match shared
            .transport
            .register_notification_listener(Arc::new(NotificationHook(Arc::downgrade(&shared))))
        {
            Ok(id) => id,
            Err(e) => {
                let _ = shared.transport.unregister_command_listener(command_listener);
                return Err(e);
            }
        };
        Ok(Self {
            shared,
            command_listener,
            notification_listener,
        })
    }

    /// The local tree.
    pub fn tree(&self) -> &Arc<PropertyTree> {
        &self.shared.tree
    }

    /// Current element name.
    pub fn element_name(&self) -> String {
        self.shared.element()
    }

    /// Rename this participant and tell every peer, so their mirrors and
    /// subscriptions follow.
    pub fn rename_element(&self, new_name: &str) -> Result<(), CoreError> {
        validate_element(new_name)?;
        let old = std::mem::replace(&mut *self.shared.element.write(), new_name.to_owned());
        self.shared.tree.set_value(ELEMENT_NAME_PATH, new_name)?;
        tracing::info!(%old, new = %new_name, "element renamed");
        let note = Notification::new(new_name, BROADCAST, NotificationKind::NameChanged { old_name: old });
        self.shared.transport.transmit_notification(&note)
    }

    /// Number of active mirrors.
    pub fn mirror_count(&self) -> usize {
        self.shared.mirrors.lock().len()
    }

    /// Number of remote subscriptions served, counting each subscriber
    /// and path once.
    pub fn proxy_count(&self) -> usize {
        self.shared.proxies.lock().len()
    }

    fn round_trip(
        &self,
        element: &str,
        path: &str,
        expect: Expect,
        kind: CommandKind,
        timeout: Duration,
    ) -> Result<Notification, CoreError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = ListenerId::next();
        self.shared.pending.lock().push(PendingRequest {
            id,
            element: element.to_owned(),
            path: path.to_owned(),
            expect,
            reply: tx,
        });
        let forget = || self.shared.pending.lock().retain(|p| p.id != id);

        let command = Command::new(self.shared.element(), element, kind);
        if let Err(e) = self.shared.transport.transmit_command(&command) {
            forget();
            tracing::warn!(%element, %path, error = %e, "property command not sent");
            return Err(CoreError::Failed);
        }
        match rx.recv_timeout(timeout) {
            Ok(note) => {
                tracing::debug!(%element, %path, ?expect, "round trip complete");
                Ok(note)
            }
            Err(_) => {
                forget();
                tracing::warn!(%element, %path, ?expect, ?timeout, "round trip timed out");
                Err(CoreError::Timeout)
            }
        }
    }
}

impl RemotePropertyAccess for RemoteProperties {
    fn get_remote_property(
        &self,
        element: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<PropertyData, CoreError> {
        validate_element(element)?;
        let note = self.round_trip(
            element,
            path,
            Expect::Property,
            CommandKind::GetProperty {
                path: path.to_owned(),
            },
            timeout,
        )?;
        match note.kind {
            NotificationKind::Property { data, .. } => Ok(data),
            _ => Err(CoreError::Failed),
        }
    }

    fn set_remote_property_values(
        &self,
        element: &str,
        path: &str,
        values: &[Value],
        timeout: Duration,
    ) -> Result<(), CoreError> {
        validate_element(element)?;
        if values.is_empty() {
            return Err(CoreError::InvalidArgument);
        }
        let kind = CommandKind::SetProperty {
            path: path.to_owned(),
            values: values.to_vec(),
        };
        if timeout.is_zero() {
            let command = Command::new(self.shared.element(), element, kind);
            return self.shared.transport.transmit_command(&command);
        }
        self.round_trip(element, path, Expect::Property, kind, timeout)
            .map(|_| ())
    }

    fn delete_remote_property(&self, element: &str, path: &str) -> Result<(), CoreError> {
        validate_element(element)?;
        let command = Command::new(
            self.shared.element(),
            element,
            CommandKind::DeleteProperty {
                path: path.to_owned(),
            },
        );
        self.shared.transport.transmit_command(&command)
    }

    fn mirror_remote_property(
        &self,
        element: &str,
        remote_path: &str,
        local_path: &str,
        timeout: Duration,
    ) -> Result<(), CoreError> {
        validate_element(element)?;
        let previous = {
            let mut mirrors = self.shared.mirrors.lock();
            mirrors
                .find(element, remote_path, local_path)
                .and_then(|idx| mirrors.remove(idx))
        };
        if let Some(previous) = previous {
            self.shared.drop_local_mirror(&previous);
        }

        let index = self
            .shared
            .mirrors
            .lock()
            .insert(MirrorRecord::new(element, remote_path, local_path));
        let listener = Arc::new(MirrorListener {
            shared: Arc::downgrade(&self.shared),
            index,
        });
        let registered = self
            .shared
            .transport
            .register_notification_listener(listener)
            .and_then(|id| {
                if let Some(record) = self.shared.mirrors.lock().get_mut(index) {
                    record.listener = Some(id);
                }
                self.round_trip(
                    element,
                    remote_path,
                    Expect::RegAck,
                    CommandKind::RegPropListener {
                        path: remote_path.to_owned(),
                    },
                    timeout,
                )
            });

        let grafted = registered.and_then(|note| match note.kind {
            NotificationKind::RegPropListenerAck { mut data, .. } => {
                if remote_path.is_empty() {
                    data.name = element.to_owned();
                }
                self.shared.tree.merge_property(local_path, &data)?;
                if let Some(record) = self.shared.mirrors.lock().get_mut(index) {
                    record.grafted = true;
                }
                Ok(())
            }
            _ => Err(CoreError::Failed),
        });
        if let Err(e) = grafted {
            let record = self.shared.mirrors.lock().remove(index);
            if let Some(record) = record {
                self.shared.drop_local_mirror(&record);
            }
            return Err(e);
        }
        tracing::debug!(%element, %remote_path, %local_path, "mirror installed");
        Ok(())
    }

    fn unmirror_remote_property(
        &self,
        element: &str,
        remote_path: &str,
        local_path: &str,
        timeout: Duration,
    ) -> Result<(), CoreError> {
        validate_element(element)?;
        let record = {
            let mut mirrors = self.shared.mirrors.lock();
            let index = mirrors
                .find(element, remote_path, local_path)
                .ok_or(CoreError::InvalidArgument)?;
            mirrors.remove(index).ok_or(CoreError::InvalidArgument)?
        };
        self.shared.drop_local_mirror(&record);
        self.round_trip(
            element,
            remote_path,
            Expect::UnregAck,
            CommandKind::UnregPropListener {
                path: remote_path.to_owned(),
            },
            timeout,
        )
        .map(|_| ())
    }
}

impl Drop for RemoteProperties {
    fn drop(&mut self) {
        let transport = &self.shared.transport;
        let _ = transport.unregister_command_listener(self.command_listener);
        let _ = transport.unregister_notification_listener(self.notification_listener);
        let mirrors = self.shared.mirrors.lock().drain();
        for record in &mirrors {
            self.shared.drop_local_mirror(record);
        }
        let proxies = std::mem::take(&mut *self.shared.proxies.lock());
        for p in proxies {
            let _ = self.shared.tree.unregister_listener(&p.path, p.tree_listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_test_utils::{init_test_tracing, LoopbackBus};

    const WAIT: Duration = Duration::from_secs(2);

    fn pair(bus: &Arc<LoopbackBus>) -> (RemoteProperties, RemoteProperties) {
        init_test_tracing();
        let a = RemoteProperties::new("A", Arc::new(PropertyTree::new()), bus.endpoint("A"))
            .unwrap();
        let b = RemoteProperties::new("B", Arc::new(PropertyTree::new()), bus.endpoint("B"))
            .unwrap();
        (a, b)
    }

    #[test]
    fn get_remote_property_round_trip() {
        let bus = LoopbackBus::new();
        let (a, b) = pair(&bus);
        b.tree().set_value("Config.Rate", 50).unwrap();
        let data = a.get_remote_property("B", "Config", WAIT).unwrap();
        assert_eq!(data.find("Rate").and_then(|n| n.get::<i32>(0).ok()), Some(50));
    }

    #[test]
    fn missing_remote_property_times_out() {
        let bus = LoopbackBus::new();
        let (a, _b) = pair(&bus);
        let err = a
            .get_remote_property("B", "Nope", Duration::from_millis(100))
            .unwrap_err();
        assert_eq!(err, CoreError::Timeout);
        assert!(a.shared.pending.lock().is_empty());
    }

    #[test]
    fn wildcards_are_rejected_before_sending() {
        let bus = LoopbackBus::new();
        let (a, _b) = pair(&bus);
        bus.clear_recorded();
        for name in ["*", "B?", ""] {
            assert_eq!(
                a.get_remote_property(name, "X", WAIT).unwrap_err(),
                CoreError::InvalidArgument
            );
        }
        assert!(bus.sent_commands().is_empty());
    }

    #[test]
    fn transmit_failure_is_failed() {
        let bus = LoopbackBus::new();
        let (a, _b) = pair(&bus);
        bus.set_fail_transmit(true);
        assert_eq!(
            a.get_remote_property("B", "X", WAIT).unwrap_err(),
            CoreError::Failed
        );
        assert!(a.shared.pending.lock().is_empty());
    }

    #[test]
    fn set_remote_values_waits_for_confirmation() {
        let bus = LoopbackBus::new();
        let (a, b) = pair(&bus);
        a.set_remote_property_values("B", "Arr", &[Value::Int(1), Value::Float(2.5)], WAIT)
            .unwrap();
        assert_eq!(
            b.tree().values("Arr").unwrap(),
            vec![Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn fire_and_forget_set_and_delete() {
        let bus = LoopbackBus::new();
        let (a, b) = pair(&bus);
        a.set_remote_property_values("B", "Flag", &[Value::Bool(true)], Duration::ZERO)
            .unwrap();
        bus.flush();
        assert_eq!(b.tree().get_value::<bool>("Flag", 0), Ok(true));
        a.delete_remote_property("B", "Flag").unwrap();
        bus.flush();
        assert!(!b.tree().exists("Flag"));
    }

    #[test]
    fn subscriptions_are_refcounted() {
        let bus = LoopbackBus::new();
        let (a, b) = pair(&bus);
        b.tree().set_value("Shared.X", 1).unwrap();
        a.mirror_remote_property("B", "Shared", "M1", WAIT).unwrap();
        a.mirror_remote_property("B", "Shared", "M2", WAIT).unwrap();
        assert_eq!(b.proxy_count(), 1);
        assert_eq!(a.mirror_count(), 2);

        a.unmirror_remote_property("B", "Shared", "M1", WAIT).unwrap();
        assert_eq!(b.proxy_count(), 1);
        assert!(!a.tree().exists("M1.Shared"));

        b.tree().set_value("Shared.X", 2).unwrap();
        bus.flush();
        assert_eq!(a.tree().get_value::<i32>("M2.Shared.X", 0), Ok(2));

        a.unmirror_remote_property("B", "Shared", "M2", WAIT).unwrap();
        assert_eq!(b.proxy_count(), 0);
        assert_eq!(
            a.unmirror_remote_property("B", "Shared", "M2", WAIT),
            Err(CoreError::InvalidArgument)
        );
    }

    #[test]
    fn mirror_follows_add_and_delete() {
        let bus = LoopbackBus::new();
        let (a, b) = pair(&bus);
        b.tree().set_value("Sim.Step", 10).unwrap();
        a.mirror_remote_property("B", "Sim", "Remote", WAIT).unwrap();
        assert_eq!(a.tree().get_value::<i32>("Remote.Sim.Step", 0), Ok(10));

        b.tree().set_value("Sim.Extra", "hi").unwrap();
        bus.flush();
        assert_eq!(
            a.tree().get_value::<String>("Remote.Sim.Extra", 0),
            Ok("hi".to_owned())
        );

        b.tree().delete_property("Sim.Step").unwrap();
        bus.flush();
        assert!(!a.tree().exists("Remote.Sim.Step"));

        b.tree().delete_property("Sim").unwrap();
        bus.flush();
        assert!(!a.tree().exists("Remote.Sim"));
        assert_eq!(a.mirror_count(), 0);
        assert_eq!(b.proxy_count(), 0);
    }

    #[test]
    fn local_delete_ends_the_mirror() {
        let bus = LoopbackBus::new();
        let (a, b) = pair(&bus);
        b.tree().set_value("Sim.Step", 10).unwrap();
        a.mirror_remote_property("B", "Sim", "Remote", WAIT).unwrap();
        assert_eq!(b.proxy_count(), 1);

        a.tree().delete_property("Remote.Sim").unwrap();
        b.tree().set_value("Sim.Step", 11).unwrap();
        b.tree().set_value("Sim.Extra", "hi").unwrap();
        bus.flush();

        assert!(!a.tree().exists("Remote.Sim"));
        assert!(!a.tree().exists("Remote.Sim.Extra"));
        assert_eq!(a.mirror_count(), 0);
        assert_eq!(b.proxy_count(), 0);

        // The same mirror can be installed again afterwards.
        a.mirror_remote_property("B", "Sim", "Remote", WAIT).unwrap();
        assert_eq!(a.tree().get_value::<i32>("Remote.Sim.Step", 0), Ok(11));
        assert_eq!(a.mirror_count(), 1);
    }

    #[test]
    fn whole_tree_mirror_is_named_after_element() {
        let bus = LoopbackBus::new();
        let (a, b) = pair(&bus);
        b.tree().set_value("Top", 3).unwrap();
        a.mirror_remote_property("B", "", "Peers", WAIT).unwrap();
        assert_eq!(a.tree().get_value::<i32>("Peers.B.Top", 0), Ok(3));
        assert_eq!(
            a.tree().get_value::<String>("Peers.B.Header.ElementName", 0),
            Ok("B".to_owned())
        );
    }
}
