//! Periodic "alive" publisher.
//!
//! Sends an `alive` event at a configurable interval so the hub knows the
//! device is still there.

use std::time::Duration;

use tokio::time;

use crate::session::DeviceSession;

/// Subject of the alive event.
pub const ALIVE_SUBJECT: &str = "alive";

/// Body of the alive event.
pub const ALIVE_BODY: &str = "I am alive!";

/// Run the alive loop, publishing immediately and then every `interval`.
///
/// Returns once the session reaches a terminal state. Intended to be
/// spawned as a background tokio task or raced against a shutdown signal.
pub async fn run(session: &DeviceSession, interval: Duration) {
    let mut ticker = time::interval(interval);
    let mut state = session.state_changes();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = state.wait_for(|s| s.is_terminal()) => break,
        }

        let device = [("device", session.device_id())];
        if let Err(e) = session.send_message(ALIVE_SUBJECT, device, ALIVE_BODY).await {
            tracing::warn!(error = %e, "failed to publish alive event");
        } else {
            tracing::debug!("alive event sent");
        }
    }
    tracing::debug!(state = %session.state(), "alive publisher stopped");
}
