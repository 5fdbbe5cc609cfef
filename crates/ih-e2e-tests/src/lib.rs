//! End-to-end tests wiring `HubConnector`, `DeviceSession` and observers
//! through the in-memory `MockHub`. See `tests/`.
