//! Publishes every entered state to the property tree and the transport.

use std::sync::Arc;

use stepwise_core::paths;
use stepwise_core::{Notification, NotificationKind, PropertyStore, State, Transport, BROADCAST};

pub(crate) struct StateNotifier {
    transport: Arc<dyn Transport>,
    properties: Arc<dyn PropertyStore>,
    fallback_name: String,
}

impl StateNotifier {
    pub fn new(
        transport: Arc<dyn Transport>,
        properties: Arc<dyn PropertyStore>,
        fallback_name: String,
    ) -> Self {
        Self {
            transport,
            properties,
            fallback_name,
        }
    }

    /// Current element name; the configured name until the tree has one.
    pub fn element_name(&self) -> String {
        self.properties
            .get_property(paths::ELEMENT_NAME)
            .and_then(|d| d.get::<String>(0).ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.fallback_name.clone())
    }

    /// Write `Header.CurrentState` and broadcast a `State` notification.
    ///
    /// Failures are logged, not escalated.
    pub fn publish(&self, state: State) {
        if let Err(error) = self
            .properties
            .set_property_value(paths::CURRENT_STATE, state.as_str().into())
        {
            tracing::warn!(%state, %error, "failed to record current state");
        }
        let note = Notification::new(self.element_name(), BROADCAST, NotificationKind::State(state));
        if let Err(error) = self.transport.transmit_notification(&note) {
            tracing::warn!(%state, %error, "failed to broadcast state change");
        }
    }
}
