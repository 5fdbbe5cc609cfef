//! Periodic token renewal.

use std::sync::Arc;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionInner;

/// Renew the session token every renewal period until cancelled.
///
/// Exchanges run one at a time; a slow exchange delays the next tick
/// instead of stacking up. After `renewal_failure_limit` consecutive
/// failures the session is failed.
pub(crate) async fn run(inner: Arc<SessionInner>, cancel: CancellationToken) {
    let period = inner.options.renewal_period;
    let limit = inner.options.renewal_failure_limit;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = inner.authenticate() => result,
        };

        match result {
            Ok(()) => {
                if failures > 0 {
                    info!(after_failures = failures, "token renewal recovered");
                } else {
                    debug!("token renewed");
                }
                failures = 0;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(error = %e, consecutive_failures = failures, "token renewal failed");
                if limit > 0 && failures >= limit {
                    inner
                        .fail(format!("token renewal failed {failures} times: {e}"))
                        .await;
                    break;
                }
            }
        }
    }
}
