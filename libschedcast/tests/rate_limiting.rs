//! Rate limiting through the worker
//!
//! Uses a paused clock, so the spacing between publish calls is exact.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use libschedcast::platforms::Publisher;
use libschedcast::store::MemoryStore;
use libschedcast::types::{self, Metadata, PostStatus, PublishReceipt};
use libschedcast::{EngineConfig, Manager, PlatformError, ScheduleRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Records when each publish happened.
#[derive(Clone, Default)]
struct Stopwatch {
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl Stopwatch {
    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn times(&self, platform: &str) -> Vec<Instant> {
        let mut times: Vec<Instant> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == platform)
            .map(|(_, at)| *at)
            .collect();
        times.sort();
        times
    }
}

struct TimedPublisher {
    platform: String,
    stopwatch: Stopwatch,
    /// How long the call takes after it has been recorded
    latency: Duration,
}

#[async_trait]
impl Publisher for TimedPublisher {
    async fn authenticate(&self) -> bool {
        true
    }

    async fn publish(
        &self,
        content_ref: &str,
        _caption: &str,
        _options: &Metadata,
    ) -> Result<PublishReceipt, PlatformError> {
        self.stopwatch
            .calls
            .lock()
            .unwrap()
            .push((self.platform.clone(), Instant::now()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(PublishReceipt {
            external_post_id: format!("{}:{}", self.platform, content_ref),
            external_url: None,
        })
    }
}

fn setup(limits: &[(&str, u32)], stopwatch: &Stopwatch) -> Manager {
    let config = EngineConfig {
        rate_limits: limits
            .iter()
            .map(|(platform, calls)| (platform.to_string(), *calls))
            .collect::<HashMap<_, _>>(),
        ..EngineConfig::default()
    };
    let manager = Manager::new(config, Arc::new(MemoryStore::new()));
    for (platform, _) in limits {
        register(&manager, platform, stopwatch, Duration::ZERO);
    }
    manager
}

fn register(manager: &Manager, platform: &str, stopwatch: &Stopwatch, latency: Duration) {
    manager.register_publisher(
        platform,
        Arc::new(TimedPublisher {
            platform: platform.to_string(),
            stopwatch: stopwatch.clone(),
            latency,
        }),
    );
}

/// Tick every 100ms until `expected` publishes have been recorded.
async fn tick_until(manager: &Manager, stopwatch: &Stopwatch, expected: usize) -> Result<()> {
    for _ in 0..10_000 {
        if stopwatch.count() >= expected {
            return Ok(());
        }
        manager.tick().await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("only {} of {} publishes happened", stopwatch.count(), expected)
}

fn assert_spaced(times: &[Instant], interval: Duration) {
    for pair in times.windows(2) {
        assert!(
            pair[1] - pair[0] >= interval,
            "publishes {:?} apart, expected at least {:?}",
            pair[1] - pair[0],
            interval
        );
    }
}

async fn schedule_due(manager: &Manager, platform: &str, content: &str) -> Result<()> {
    manager
        .schedule(
            ScheduleRequest::new(platform, content, "caption")
                .at(types::now() - ChronoDuration::seconds(1)),
        )
        .await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_same_platform_calls_are_spaced() -> Result<()> {
    let stopwatch = Stopwatch::default();
    // 3600 calls per hour gives one call per second.
    let manager = setup(&[("twitter", 3600)], &stopwatch);

    for i in 0..3 {
        schedule_due(&manager, "twitter", &format!("{}.png", i)).await?;
    }
    tick_until(&manager, &stopwatch, 3).await?;

    let times = stopwatch.times("twitter");
    assert_eq!(times.len(), 3);
    assert_spaced(&times, Duration::from_secs(1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_spacing_holds_when_pool_is_saturated() -> Result<()> {
    let stopwatch = Stopwatch::default();
    let mut config = EngineConfig {
        workers: 1,
        ..EngineConfig::default()
    };
    config.rate_limits.insert("twitter".into(), 3600);
    let manager = Manager::new(config, Arc::new(MemoryStore::new()));
    register(&manager, "twitter", &stopwatch, Duration::ZERO);
    register(&manager, "slow", &stopwatch, Duration::from_secs(5));

    // The slow post occupies the only worker ahead of the twitter posts.
    manager
        .schedule(
            ScheduleRequest::new("slow", "big.mov", "caption")
                .at(types::now() - ChronoDuration::seconds(2)),
        )
        .await?;
    schedule_due(&manager, "twitter", "1.png").await?;
    schedule_due(&manager, "twitter", "2.png").await?;

    tick_until(&manager, &stopwatch, 3).await?;

    let times = stopwatch.times("twitter");
    assert_eq!(times.len(), 2);
    assert_spaced(&times, Duration::from_secs(1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_platforms_are_not_serialized_together() -> Result<()> {
    let stopwatch = Stopwatch::default();
    let manager = setup(&[("twitter", 3600), ("tiktok", 3600)], &stopwatch);

    let start = Instant::now();
    schedule_due(&manager, "twitter", "a.png").await?;
    schedule_due(&manager, "tiktok", "b.mp4").await?;
    assert_eq!(manager.tick().await?, 2);

    let calls = stopwatch.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    for (platform, at) in calls.iter() {
        assert!(
            *at - start < Duration::from_secs(1),
            "{} waited behind another platform",
            platform
        );
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_throttled_platform_does_not_hold_workers() -> Result<()> {
    let stopwatch = Stopwatch::default();
    // Slow budget on twitter, nothing on facebook, a single worker.
    let mut config = EngineConfig {
        workers: 1,
        ..EngineConfig::default()
    };
    config.rate_limits.insert("twitter".into(), 60);
    let manager = Manager::new(config, Arc::new(MemoryStore::new()));
    register(&manager, "twitter", &stopwatch, Duration::ZERO);
    register(&manager, "facebook", &stopwatch, Duration::ZERO);

    let start = Instant::now();
    schedule_due(&manager, "twitter", "1.png").await?;
    schedule_due(&manager, "twitter", "2.png").await?;
    schedule_due(&manager, "facebook", "3.png").await?;

    // One twitter post and the facebook post; the other twitter post waits
    // in the queue, not in the pool.
    assert_eq!(manager.tick().await?, 2);
    let facebook = stopwatch.times("facebook");
    assert_eq!(facebook.len(), 1);
    assert!(facebook[0] - start < Duration::from_secs(1));

    let queued = manager
        .list(Some("twitter"), Some(PostStatus::Scheduled), 0)
        .await?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempt_count, 0);

    tick_until(&manager, &stopwatch, 3).await?;
    let twitter = stopwatch.times("twitter");
    assert_eq!(twitter.len(), 2);
    assert_spaced(&twitter, Duration::from_secs(60));
    Ok(())
}
