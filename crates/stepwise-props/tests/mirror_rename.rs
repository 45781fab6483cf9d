//! Integration test: a mirror keeps tracking its remote element across
//! a rename of that element.

use std::sync::Arc;
use std::time::Duration;

use stepwise_core::{CoreError, RemotePropertyAccess, Value};
use stepwise_props::{PropertyTree, RemoteProperties, ELEMENT_NAME_PATH};
use stepwise_test_utils::{init_test_tracing, LoopbackBus};

const WAIT: Duration = Duration::from_secs(2);

#[test]
fn mirror_survives_remote_rename() {
    init_test_tracing();
    let bus = LoopbackBus::new();
    let observer = RemoteProperties::new(
        "Observer",
        Arc::new(PropertyTree::new()),
        bus.endpoint("Observer"),
    )
    .unwrap();
    let sensor_endpoint = bus.endpoint("Sensor");
    let sensor = RemoteProperties::new(
        "Sensor",
        Arc::new(PropertyTree::new()),
        sensor_endpoint.clone(),
    )
    .unwrap();

    sensor.tree().set_value("Output.Value", 1.0).unwrap();
    observer
        .mirror_remote_property("Sensor", "Output", "Peers", WAIT)
        .unwrap();
    assert_eq!(
        observer.tree().get_value::<f64>("Peers.Output.Value", 0),
        Ok(1.0)
    );

    sensor_endpoint.rename("Sensor2");
    sensor.rename_element("Sensor2").unwrap();
    bus.flush();
    assert_eq!(
        sensor.tree().get_value::<String>(ELEMENT_NAME_PATH, 0),
        Ok("Sensor2".to_owned())
    );

    sensor.tree().set_value("Output.Value", 2.5).unwrap();
    bus.flush();
    assert_eq!(
        observer.tree().get_value::<f64>("Peers.Output.Value", 0),
        Ok(2.5)
    );

    // The mirror is now keyed by the new name.
    assert_eq!(
        observer.unmirror_remote_property("Sensor", "Output", "Peers", WAIT),
        Err(CoreError::InvalidArgument)
    );
    observer
        .unmirror_remote_property("Sensor2", "Output", "Peers", WAIT)
        .unwrap();
    assert_eq!(sensor.proxy_count(), 0);
}

#[test]
fn remote_set_is_visible_to_mirror() {
    init_test_tracing();
    let bus = LoopbackBus::new();
    let a = RemoteProperties::new("A", Arc::new(PropertyTree::new()), bus.endpoint("A")).unwrap();
    let b = RemoteProperties::new("B", Arc::new(PropertyTree::new()), bus.endpoint("B")).unwrap();
    b.tree().set_value("Limits.Max", 10).unwrap();
    a.mirror_remote_property("B", "Limits", "Remote", WAIT).unwrap();

    a.set_remote_property_values("B", "Limits.Max", &[Value::Int(20)], WAIT)
        .unwrap();
    bus.flush();
    assert_eq!(a.tree().get_value::<i32>("Remote.Limits.Max", 0), Ok(20));
}
