//! Minimum-interval request pacing. No bursts: each dispatch starts at
//! least `min_interval` after the previous one started.
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RequestPacer {
    min_interval: Duration,
    last_dispatch: Mutex<Option<Instant>>,
    // wall-clock millis of the last dispatch, 0 when none yet
    last_dispatch_ms: AtomicI64,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: Mutex::new(None),
            last_dispatch_ms: AtomicI64::new(0),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a dispatch is allowed and claim the slot. Returns how long
    /// the caller was held back. Dropping the future before it completes
    /// leaves the slot unclaimed.
    pub async fn wait_turn(&self) -> Duration {
        let mut last = self.last_dispatch.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                waited = ready_at - now;
                debug!("Pacing request for {:?}", waited);
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        self.last_dispatch_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        waited
    }

    pub fn last_dispatch(&self) -> Option<DateTime<Utc>> {
        match self.last_dispatch_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}
