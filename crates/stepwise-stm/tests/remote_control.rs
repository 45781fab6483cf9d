//! Integration test: two participants on one bus controlling each other.

use std::sync::Arc;
use std::time::Duration;

use stepwise_core::{paths, ControlEvent, CoreError, NotificationKind, State};
use stepwise_props::{PropertyTree, RemoteProperties};
use stepwise_stm::{StateMachine, StateMachineConfig, StateMachineContext};
use stepwise_test_utils::{init_test_tracing, LoopbackBus, RecordingIncidentSink};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

struct Participant {
    tree: Arc<PropertyTree>,
    stm: StateMachine,
}

fn participant(bus: &LoopbackBus, name: &str) -> Participant {
    let endpoint = bus.endpoint(name);
    let tree = Arc::new(PropertyTree::new());
    let remote = RemoteProperties::new(name, Arc::clone(&tree), endpoint.clone()).unwrap();
    let mut config = StateMachineConfig::new(name);
    config.queue_poll_interval = Duration::from_millis(10);
    config.shutdown_retry_interval = Duration::from_millis(50);
    let stm = StateMachine::new(
        config,
        StateMachineContext {
            transport: endpoint,
            properties: tree.clone(),
            remote: Arc::new(remote),
            incidents: Arc::new(RecordingIncidentSink::new()),
        },
    )
    .unwrap();
    stm.fire_up().unwrap();
    stm.startup_done_event().unwrap();
    stm.wait_for_state(State::Idle, WAIT, true).unwrap();
    Participant { tree, stm }
}

#[test]
fn master_drives_slave_through_lifecycle() {
    init_test_tracing();
    let bus = LoopbackBus::new();
    let master = participant(&bus, "Master");
    let slave = participant(&bus, "Slave");

    master
        .stm
        .trigger_remote_event(ControlEvent::Initialize, "Slave")
        .unwrap();
    slave
        .stm
        .wait_for_state(State::Initializing, WAIT, true)
        .unwrap();
    assert_eq!(master.stm.get_state(), State::Idle);

    let remote = master
        .stm
        .get_remote_state("Slave", Duration::from_secs(2))
        .unwrap();
    assert_eq!(remote, State::Initializing);

    bus.flush();
    let announced = bus.sent_notifications().into_iter().any(|n| {
        n.header.sender == "Slave" && n.kind == NotificationKind::State(State::Initializing)
    });
    assert!(announced);
}

#[test]
fn standalone_participant_ignores_remote_commands() {
    init_test_tracing();
    let bus = LoopbackBus::new();
    let master = participant(&bus, "Master");
    let slave = participant(&bus, "Slave");
    slave.tree.set_value(paths::STANDALONE_MODE, true).unwrap();

    master
        .stm
        .trigger_remote_event(ControlEvent::Initialize, "Slave")
        .unwrap();
    bus.flush();
    assert_eq!(
        slave
            .stm
            .wait_for_state(State::Initializing, Some(Duration::from_millis(100)), true),
        Err(CoreError::Timeout)
    );

    slave.stm.initialize_event().unwrap();
    slave
        .stm
        .wait_for_state(State::Initializing, WAIT, true)
        .unwrap();
}

#[test]
fn broadcast_shutdown_reaches_everyone() {
    init_test_tracing();
    let bus = LoopbackBus::new();
    let master = participant(&bus, "Master");
    let a = participant(&bus, "A");
    let b = participant(&bus, "B");

    master
        .stm
        .trigger_remote_event(ControlEvent::Shutdown, "*")
        .unwrap();
    a.stm.wait_for_state(State::Shutdown, WAIT, false).unwrap();
    b.stm.wait_for_state(State::Shutdown, WAIT, false).unwrap();
    assert_eq!(master.stm.get_state(), State::Idle);
}

#[test]
fn unknown_participant_times_out() {
    init_test_tracing();
    let bus = LoopbackBus::new();
    let master = participant(&bus, "Master");
    assert_eq!(
        master
            .stm
            .get_remote_state("Nobody", Duration::from_millis(50)),
        Err(CoreError::Timeout)
    );
}
