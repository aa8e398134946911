//! Per-platform outbound rate limiting
//!
//! Each platform gets a minimum spacing between calls derived from its hourly
//! budget (`3600s / calls_per_hour`). Calls to one platform are serialized;
//! calls to different platforms never wait on each other. A [`RateLimitSlot`]
//! keeps the platform closed from the end of the wait until the call starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(3600);

/// Rate limiter for platform posting
pub struct RateLimiter {
    /// Minimum spacing per platform; absent platforms are unrestricted
    intervals: HashMap<String, Duration>,
    /// Time of the last granted call, one gate per platform
    gates: Mutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
}

impl RateLimiter {
    /// Create a limiter from calls-per-hour budgets.
    pub fn new(limits: HashMap<String, u32>) -> Self {
        let intervals = limits
            .into_iter()
            .filter(|(_, calls)| *calls > 0)
            .map(|(platform, calls)| (platform, WINDOW / calls))
            .collect();
        Self::with_intervals(intervals)
    }

    /// Create a limiter from explicit minimum intervals.
    pub fn with_intervals(intervals: HashMap<String, Duration>) -> Self {
        Self {
            intervals,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self, platform: &str) -> Option<Duration> {
        self.intervals.get(platform).copied()
    }

    /// Wait until `platform` may be called again and claim the slot.
    ///
    /// Returns how long the caller was held back.
    pub async fn acquire(&self, platform: &str) -> Duration {
        let slot = self.reserve(platform).await;
        let waited = slot.waited();
        slot.commit();
        waited
    }

    /// Wait until `platform` may be called again and hold its gate.
    ///
    /// The interval is measured from [`RateLimitSlot::commit`], so the holder
    /// should commit right before making the call. Dropping the slot without
    /// committing lets the next caller in without recording a call.
    pub async fn reserve(&self, platform: &str) -> RateLimitSlot {
        let Some(interval) = self.min_interval(platform) else {
            return RateLimitSlot::unrestricted();
        };

        let gate = self.gate(platform).await;
        let started = Instant::now();
        let last_call = gate.lock_owned().await;
        if let Some(last) = *last_call {
            let ready_at = last + interval;
            let now = Instant::now();
            if ready_at > now {
                tracing::debug!(
                    platform = %platform,
                    wait_ms = (ready_at - now).as_millis() as u64,
                    "Rate limit wait"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        RateLimitSlot {
            last_call: Some(last_call),
            waited: started.elapsed(),
        }
    }

    /// Whether a call to `platform` could start now without waiting.
    ///
    /// `false` while another caller holds the platform's slot.
    pub async fn is_ready(&self, platform: &str) -> bool {
        let Some(interval) = self.min_interval(platform) else {
            return true;
        };

        let gate = self.gate(platform).await;
        let ready = match gate.try_lock() {
            Ok(last_call) => last_call.map_or(true, |last| last + interval <= Instant::now()),
            Err(_) => false,
        };
        ready
    }

    async fn gate(&self, platform: &str) -> Arc<Mutex<Option<Instant>>> {
        let mut gates = self.gates.lock().await;
        gates.entry(platform.to_string()).or_default().clone()
    }
}

/// Exclusive right to the next call on one platform.
pub struct RateLimitSlot {
    last_call: Option<OwnedMutexGuard<Option<Instant>>>,
    waited: Duration,
}

impl RateLimitSlot {
    fn unrestricted() -> Self {
        Self {
            last_call: None,
            waited: Duration::ZERO,
        }
    }

    /// Time spent waiting for the slot.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Record the call as starting now and release the platform.
    pub fn commit(mut self) {
        if let Some(mut last_call) = self.last_call.take() {
            *last_call = Some(Instant::now());
        }
    }
}
