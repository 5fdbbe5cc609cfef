//! Shared test harness for E2E integration tests.
//!
//! Wires a `HubConnector` to an in-memory `MockHub`, so device sessions run
//! their real authentication, dispatch and renewal paths end to end.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use ih_amqp_channel::{HubConfig, HubConnector, MockHub};
use ih_device_agent::{
    DeviceResult, DeviceSession, Observer, SessionClosedError, SessionOptions, connect_device,
};
use ih_protocol::Message;

pub const HUB_HOST: &str = "test-hub.azure-devices.net";

/// Base64 of "secret-device-key-0123456789".
pub const DEVICE_KEY: &str = "c2VjcmV0LWRldmljZS1rZXktMDEyMzQ1Njc4OQ==";

/// End-to-end harness: one mock hub, one connector pointing at it.
pub struct TestHarness {
    pub hub: Arc<MockHub>,
    pub connector: HubConnector,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(HubConfig::new(HUB_HOST))
    }

    pub fn with_config(config: HubConfig) -> Self {
        let hub = MockHub::new();
        let connector = HubConnector::new(config, hub.factory());
        Self { hub, connector }
    }

    /// Connect `dev1` with default options.
    pub async fn connect(&self) -> DeviceResult<DeviceSession> {
        self.connect_as("dev1", SessionOptions::default()).await
    }

    pub async fn connect_as(
        &self,
        device_id: &str,
        options: SessionOptions,
    ) -> DeviceResult<DeviceSession> {
        connect_device(&self.connector, device_id, DEVICE_KEY, options).await
    }

    /// Events the hub received from `device_id`.
    pub fn events_of(&self, device_id: &str) -> Vec<Message> {
        self.hub
            .sent_to(&ih_protocol::addresses::events(device_id))
    }
}

/// Observer recording every notification for later inspection.
#[derive(Default)]
pub struct RecordingObserver {
    pub messages: Mutex<Vec<Arc<Message>>>,
    pub errors: Mutex<Vec<SessionClosedError>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bodies(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.body_text().unwrap_or_default().to_string())
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl Observer for RecordingObserver {
    fn on_next(&self, message: &Arc<Message>) {
        self.messages.lock().unwrap().push(message.clone());
    }

    fn on_error(&self, error: &SessionClosedError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}
