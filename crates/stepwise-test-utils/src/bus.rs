//! In-process message bus connecting several participants.
//!
//! Every participant gets a [`BusEndpoint`] implementing [`Transport`].
//! Commands and notifications are queued and delivered by a dispatcher
//! thread, so a listener that transmits from inside its callback never
//! re-enters the sender. Everything sent is also recorded for
//! assertions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use stepwise_core::{
    Command, CommandListener, CoreError, DataSample, ListenerId, Notification,
    NotificationListener, Transport, BROADCAST,
};

enum Envelope {
    Command(Command),
    Notification(Notification),
}

enum Subscriber {
    Command(Arc<dyn CommandListener>),
    Notification(Arc<dyn NotificationListener>),
}

struct Registration {
    id: ListenerId,
    endpoint: Arc<Mutex<String>>,
    subscriber: Subscriber,
}

#[derive(Default)]
struct Hub {
    registrations: Mutex<Vec<Registration>>,
    commands: Mutex<Vec<Command>>,
    notifications: Mutex<Vec<Notification>>,
    samples: Mutex<Vec<DataSample>>,
    fail_transmit: AtomicBool,
    in_flight: AtomicUsize,
}

impl Hub {
    fn dispatch(&self, envelope: Envelope) {
        let (sender, receiver) = match &envelope {
            Envelope::Command(c) => (c.header.sender.clone(), c.header.receiver.clone()),
            Envelope::Notification(n) => (n.header.sender.clone(), n.header.receiver.clone()),
        };
        let matches = |endpoint: &str| {
            if receiver == BROADCAST {
                endpoint != sender
            } else {
                endpoint == receiver
            }
        };
        match envelope {
            Envelope::Command(cmd) => {
                let listeners: Vec<Arc<dyn CommandListener>> = self
                    .registrations
                    .lock()
                    .iter()
                    .filter(|r| matches(&r.endpoint.lock()))
                    .filter_map(|r| match &r.subscriber {
                        Subscriber::Command(l) => Some(Arc::clone(l)),
                        Subscriber::Notification(_) => None,
                    })
                    .collect();
                for l in listeners {
                    if let Err(e) = l.on_command(&cmd) {
                        tracing::debug!(error = %e, "command listener failed");
                    }
                }
            }
            Envelope::Notification(note) => {
                let listeners: Vec<Arc<dyn NotificationListener>> = self
                    .registrations
                    .lock()
                    .iter()
                    .filter(|r| matches(&r.endpoint.lock()))
                    .filter_map(|r| match &r.subscriber {
                        Subscriber::Notification(l) => Some(Arc::clone(l)),
                        Subscriber::Command(_) => None,
                    })
                    .collect();
                for l in listeners {
                    if let Err(e) = l.on_notification(&note) {
                        tracing::debug!(error = %e, "notification listener failed");
                    }
                }
            }
        }
    }
}

/// Shared bus. Dropping it stops the dispatcher thread.
pub struct LoopbackBus {
    hub: Arc<Hub>,
    tx: Sender<Envelope>,
    closed: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackBus {
    /// Create a bus and start its dispatcher thread.
    pub fn new() -> Arc<Self> {
        let hub = Arc::new(Hub::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let handle = {
            let hub = Arc::clone(&hub);
            let closed = Arc::clone(&closed);
            thread::Builder::new()
                .name("loopback-bus".into())
                .spawn(move || dispatch_loop(hub, rx, closed))
                .expect("failed to spawn loopback bus dispatcher")
        };
        Arc::new(Self {
            hub,
            tx,
            closed,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    /// A transport endpoint for the participant called `name`.
    pub fn endpoint(&self, name: &str) -> Arc<BusEndpoint> {
        Arc::new(BusEndpoint {
            name: Arc::new(Mutex::new(name.to_owned())),
            hub: Arc::clone(&self.hub),
            tx: self.tx.clone(),
        })
    }

    /// Make every subsequent `transmit_*` call fail with `Failed`.
    pub fn set_fail_transmit(&self, fail: bool) {
        self.hub.fail_transmit.store(fail, Ordering::Release);
    }

    /// Block until every queued message has been delivered.
    pub fn flush(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.hub.in_flight.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Every command transmitted so far.
    pub fn sent_commands(&self) -> Vec<Command> {
        self.hub.commands.lock().clone()
    }

    /// Every notification transmitted so far.
    pub fn sent_notifications(&self) -> Vec<Notification> {
        self.hub.notifications.lock().clone()
    }

    /// Every data sample transmitted so far.
    pub fn sent_samples(&self) -> Vec<DataSample> {
        self.hub.samples.lock().clone()
    }

    /// Forget every recorded message and sample.
    pub fn clear_recorded(&self) {
        self.hub.commands.lock().clear();
        self.hub.notifications.lock().clear();
        self.hub.samples.lock().clear();
    }
}

impl Drop for LoopbackBus {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(h) = self.dispatcher.lock().take() {
            let _ = h.join();
        }
    }
}

fn dispatch_loop(hub: Arc<Hub>, rx: Receiver<Envelope>, closed: Arc<AtomicBool>) {
    while !closed.load(Ordering::Acquire) {
        match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(envelope) => {
                hub.dispatch(envelope);
                hub.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// One participant's view of a [`LoopbackBus`].
pub struct BusEndpoint {
    name: Arc<Mutex<String>>,
    hub: Arc<Hub>,
    tx: Sender<Envelope>,
}

impl BusEndpoint {
    /// Current participant name.
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Rename the participant; messages addressed to the new name reach
    /// the listeners registered so far.
    pub fn rename(&self, new_name: &str) {
        *self.name.lock() = new_name.to_owned();
    }

    fn check(&self) -> Result<(), CoreError> {
        if self.hub.fail_transmit.load(Ordering::Acquire) {
            Err(CoreError::Failed)
        } else {
            Ok(())
        }
    }

    fn enqueue(&self, envelope: Envelope) -> Result<(), CoreError> {
        self.hub.in_flight.fetch_add(1, Ordering::AcqRel);
        self.tx.send(envelope).map_err(|_| {
            self.hub.in_flight.fetch_sub(1, Ordering::AcqRel);
            CoreError::Failed
        })
    }

    fn register(&self, subscriber: Subscriber) -> ListenerId {
        let id = ListenerId::next();
        self.hub.registrations.lock().push(Registration {
            id,
            endpoint: Arc::clone(&self.name),
            subscriber,
        });
        id
    }

    fn unregister(&self, id: ListenerId) -> Result<(), CoreError> {
        let mut regs = self.hub.registrations.lock();
        let pos = regs.iter().position(|r| r.id == id).ok_or(CoreError::NotFound)?;
        regs.remove(pos);
        Ok(())
    }
}

impl Transport for BusEndpoint {
    fn transmit_command(&self, command: &Command) -> Result<(), CoreError> {
        self.check()?;
        self.hub.commands.lock().push(command.clone());
        self.enqueue(Envelope::Command(command.clone()))
    }

    fn register_command_listener(
        &self,
        listener: Arc<dyn CommandListener>,
    ) -> Result<ListenerId, CoreError> {
        Ok(self.register(Subscriber::Command(listener)))
    }

    fn unregister_command_listener(&self, id: ListenerId) -> Result<(), CoreError> {
        self.unregister(id)
    }

    fn transmit_notification(&self, notification: &Notification) -> Result<(), CoreError> {
        self.check()?;
        self.hub.notifications.lock().push(notification.clone());
        self.enqueue(Envelope::Notification(notification.clone()))
    }

    fn register_notification_listener(
        &self,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<ListenerId, CoreError> {
        Ok(self.register(Subscriber::Notification(listener)))
    }

    fn unregister_notification_listener(&self, id: ListenerId) -> Result<(), CoreError> {
        self.unregister(id)
    }

    fn transmit_data(&self, sample: &DataSample) -> Result<(), CoreError> {
        self.check()?;
        self.hub.samples.lock().push(sample.clone());
        Ok(())
    }
}
