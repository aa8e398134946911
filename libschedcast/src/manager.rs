//! Public façade
//!
//! A [`Manager`] is built once at process start from an [`EngineConfig`] and a
//! store, and handed to whatever needs it. It owns the publisher registry, the
//! event bus and the worker loop.
//!
//! ```no_run
//! use std::sync::Arc;
//! use libschedcast::platforms::mock::MockPublisher;
//! use libschedcast::store::MemoryStore;
//! use libschedcast::{EngineConfig, Manager, ScheduleRequest};
//!
//! # async fn example() -> libschedcast::Result<()> {
//! let manager = Manager::new(EngineConfig::default(), Arc::new(MemoryStore::new()));
//! manager.register_publisher("twitter", Arc::new(MockPublisher::success("twitter")));
//! manager.start().await?;
//!
//! let post = manager
//!     .schedule(ScheduleRequest::new("twitter", "/media/cat.png", "hello").at("30m"))
//!     .await?;
//! println!("scheduled {} for {}", post.id, post.scheduled_time);
//!
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::{Config, EngineConfig, PublisherMode};
use crate::error::{Result, SchedcastError};
use crate::events::{Event, EventBus, EventKind, EventReceiver};
use crate::platforms::mock::MockPublisher;
use crate::platforms::{Publisher, PublisherRegistry};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::scheduling::{self, ScheduleTime};
use crate::store::{PostFilter, PostStore, SqliteStore};
use crate::types::{self, Metadata, Post, PostStatus};
use crate::worker::Worker;

/// Everything needed to create a post.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub platform: String,
    pub content_ref: String,
    pub caption: String,
    /// `None` means now plus the configured default delay
    pub scheduled_time: Option<ScheduleTime>,
    pub metadata: Metadata,
}

impl ScheduleRequest {
    pub fn new(
        platform: impl Into<String>,
        content_ref: impl Into<String>,
        caption: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            content_ref: content_ref.into(),
            caption: caption.into(),
            scheduled_time: None,
            metadata: Metadata::new(),
        }
    }

    pub fn at(mut self, time: impl Into<ScheduleTime>) -> Self {
        self.scheduled_time = Some(time.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Snapshot of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub by_status: BTreeMap<PostStatus, usize>,
    pub by_platform: BTreeMap<String, usize>,
    /// Earliest scheduled time among `Scheduled` posts
    pub next_due: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Lifecycle {
    handle: Option<JoinHandle<()>>,
    shut_down: bool,
}

pub struct Manager {
    config: EngineConfig,
    store: Arc<dyn PostStore>,
    publishers: Arc<PublisherRegistry>,
    events: EventBus,
    worker: Arc<Worker>,
    shutdown_tx: watch::Sender<bool>,
    lifecycle: Mutex<Lifecycle>,
}

impl Manager {
    /// Build a manager. Nothing runs until [`Manager::start`].
    pub fn new(config: EngineConfig, store: Arc<dyn PostStore>) -> Self {
        let publishers = Arc::new(PublisherRegistry::new());
        let events = EventBus::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Arc::new(Worker::new(
            store.clone(),
            publishers.clone(),
            Arc::new(RateLimiter::new(config.rate_limits.clone())),
            RetryPolicy::new(config.max_attempts, config.retry_delay),
            events.clone(),
            config.workers,
            shutdown_rx,
        ));

        Self {
            config,
            store,
            publishers,
            events,
            worker,
            shutdown_tx,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Open the configured database and register a mock publisher for every
    /// enabled `mode = "mock"` platform.
    ///
    /// Platforms in `external` mode are left for the caller to register.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = SqliteStore::new(&config.database_path()).await?;
        let manager = Self::new(config.engine(), Arc::new(store));

        for (name, platform) in config.enabled_platforms() {
            match platform.mode {
                PublisherMode::Mock => {
                    tracing::warn!(
                        platform = %name,
                        "Using mock publisher; posts are marked delivered without reaching the platform"
                    );
                    manager.register_publisher(name.clone(), Arc::new(MockPublisher::success(name)))
                }
                PublisherMode::External => {
                    tracing::debug!(platform = %name, "Awaiting external publisher")
                }
            }
        }
        Ok(manager)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PostStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn publishers(&self) -> &PublisherRegistry {
        &self.publishers
    }

    pub fn register_publisher(&self, name: impl Into<String>, publisher: Arc<dyn Publisher>) {
        self.publishers.register(name, publisher);
    }

    /// Subscribe `callback` to `kind`. Callbacks run in registration order.
    pub fn register_callback<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.register(kind, callback);
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Fail posts interrupted mid-delivery by a previous process.
    pub async fn recover(&self) -> Result<usize> {
        let recovered = self.worker.recover_interrupted().await?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered interrupted posts");
        }
        Ok(recovered)
    }

    /// Recover interrupted posts and start the background worker.
    ///
    /// Calling `start` on a running manager does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.shut_down {
            return Err(SchedcastError::InvalidInput(
                "manager has been shut down".to_string(),
            ));
        }
        if lifecycle.handle.is_some() {
            return Ok(());
        }

        self.recover().await?;
        let worker = self.worker.clone();
        lifecycle.handle = Some(tokio::spawn(worker.run(self.config.tick_interval)));
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run one scan in the foreground and wait for its dispatches.
    pub async fn tick(&self) -> Result<usize> {
        self.worker.tick().await
    }

    /// Stop the worker, wait for in-flight deliveries, and flush the store.
    ///
    /// Each wait is bounded by `shutdown_timeout`. Later calls return once
    /// the first has finished.
    pub async fn shutdown(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.shut_down {
            return Ok(());
        }
        lifecycle.shut_down = true;

        tracing::info!("Shutting down");
        self.shutdown_tx.send_replace(true);
        let timeout = self.config.shutdown_timeout;

        if let Some(mut handle) = lifecycle.handle.take() {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Worker loop ended abnormally"),
                Err(_) => {
                    tracing::warn!("Worker loop did not stop in time, aborting it");
                    handle.abort();
                }
            }
        }

        if !self.worker.wait_idle(timeout).await {
            tracing::warn!(
                in_flight = self.worker.in_flight(),
                "Shutdown timed out with deliveries still in flight"
            );
        }

        self.store.flush().await?;
        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Create a `Scheduled` post.
    ///
    /// # Errors
    ///
    /// - [`SchedcastError::UnknownPlatform`] if no publisher is registered for the platform
    /// - [`SchedcastError::InvalidTime`] if the schedule expression cannot be parsed
    /// - [`SchedcastError::InvalidInput`] if `content_ref` is empty
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<Post> {
        let post = self.build_post(request).await?;
        self.store.create(&post).await?;

        tracing::info!(
            post_id = %post.id,
            platform = %post.platform,
            scheduled_time = %post.scheduled_time,
            "Scheduled post"
        );
        self.events
            .emit(Event::new(EventKind::PostScheduled, post.clone()));
        Ok(post)
    }

    /// Create a `Draft` post. Drafts are never dispatched until scheduled.
    pub async fn create_draft(&self, request: ScheduleRequest) -> Result<Post> {
        let mut post = self.build_post(request).await?;
        post.status = PostStatus::Draft;
        self.store.create(&post).await?;

        tracing::info!(post_id = %post.id, platform = %post.platform, "Created draft");
        Ok(post)
    }

    /// Move a draft into the queue.
    pub async fn schedule_draft(&self, id: &str, time: Option<ScheduleTime>) -> Result<Post> {
        let draft = self.get(id).await?;
        if draft.status != PostStatus::Draft {
            return Err(SchedcastError::InvalidTransition {
                from: draft.status,
                to: PostStatus::Scheduled,
            });
        }

        let at = self.resolve_time(&draft.platform, time).await?;
        let scheduled = self
            .store
            .compare_and_transition(
                id,
                PostStatus::Draft,
                PostStatus::Scheduled,
                Box::new(move |p| p.scheduled_time = at),
            )
            .await?;

        let Some(post) = scheduled else {
            let current = self.get(id).await?;
            return Err(SchedcastError::InvalidTransition {
                from: current.status,
                to: PostStatus::Scheduled,
            });
        };

        tracing::info!(
            post_id = %post.id,
            platform = %post.platform,
            scheduled_time = %post.scheduled_time,
            "Scheduled draft"
        );
        self.events
            .emit(Event::new(EventKind::PostScheduled, post.clone()));
        Ok(post)
    }

    /// Cancel a draft or scheduled post.
    ///
    /// Returns `false` when the post is missing, already terminal, or being
    /// delivered; cancellation never interrupts a delivery in progress.
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        match self.try_cancel(id).await {
            Ok(_) => Ok(true),
            Err(
                SchedcastError::NotFound(_)
                | SchedcastError::AlreadyTerminal { .. }
                | SchedcastError::InFlight(_),
            ) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Like [`Manager::cancel`], but says why a post could not be cancelled.
    pub async fn try_cancel(&self, id: &str) -> Result<Post> {
        loop {
            let post = self.get(id).await?;
            match post.status {
                PostStatus::Draft | PostStatus::Scheduled => {
                    let cancelled = self
                        .store
                        .compare_and_transition(
                            id,
                            post.status,
                            PostStatus::Cancelled,
                            crate::store::no_change(),
                        )
                        .await?;
                    if let Some(cancelled) = cancelled {
                        tracing::info!(
                            post_id = %cancelled.id,
                            platform = %cancelled.platform,
                            "Cancelled post"
                        );
                        self.events
                            .emit(Event::new(EventKind::PostCancelled, cancelled.clone()));
                        return Ok(cancelled);
                    }
                    // Lost a race with the worker; look again.
                }
                PostStatus::Posting => return Err(SchedcastError::InFlight(id.to_string())),
                status => {
                    return Err(SchedcastError::AlreadyTerminal {
                        id: id.to_string(),
                        status,
                    })
                }
            }
        }
    }

    /// Change when a post goes out.
    ///
    /// Drafts and scheduled posts are updated in place. Failed and cancelled
    /// posts are left untouched and a new scheduled copy is returned instead.
    pub async fn reschedule(&self, id: &str, time: Option<ScheduleTime>) -> Result<Post> {
        loop {
            let post = self.get(id).await?;
            match post.status {
                PostStatus::Draft | PostStatus::Scheduled => {
                    let at = self.resolve_time(&post.platform, time.clone()).await?;
                    let updated = self
                        .store
                        .compare_and_transition(
                            id,
                            post.status,
                            post.status,
                            Box::new(move |p| p.scheduled_time = at),
                        )
                        .await?;
                    if let Some(updated) = updated {
                        tracing::info!(
                            post_id = %updated.id,
                            scheduled_time = %updated.scheduled_time,
                            "Rescheduled post"
                        );
                        return Ok(updated);
                    }
                }
                PostStatus::Failed | PostStatus::Cancelled => {
                    self.ensure_registered(&post.platform)?;
                    let at = self.resolve_time(&post.platform, time).await?;
                    let fresh = post.duplicate_for(at);
                    self.store.create(&fresh).await?;

                    tracing::info!(
                        post_id = %fresh.id,
                        previous_id = %post.id,
                        platform = %fresh.platform,
                        scheduled_time = %fresh.scheduled_time,
                        "Rescheduled post as a new post"
                    );
                    self.events
                        .emit(Event::new(EventKind::PostScheduled, fresh.clone()));
                    return Ok(fresh);
                }
                PostStatus::Posting => return Err(SchedcastError::InFlight(id.to_string())),
                PostStatus::Posted => {
                    return Err(SchedcastError::AlreadyTerminal {
                        id: id.to_string(),
                        status: PostStatus::Posted,
                    })
                }
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Post> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SchedcastError::NotFound(id.to_string()))
    }

    /// Posts ordered by scheduled time. A `limit` of 0 means no limit.
    pub async fn list(
        &self,
        platform: Option<&str>,
        status: Option<PostStatus>,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let filter = PostFilter {
            platform: platform.map(str::to_string),
            status,
            due_before: None,
            limit: (limit > 0).then_some(limit),
        };
        self.store.query(&filter).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let posts = self.store.query(&PostFilter::default()).await?;
        let mut stats = QueueStats {
            total: posts.len(),
            ..QueueStats::default()
        };
        for post in &posts {
            *stats.by_status.entry(post.status).or_default() += 1;
            *stats.by_platform.entry(post.platform.clone()).or_default() += 1;
            if post.status == PostStatus::Scheduled {
                stats.next_due = Some(match stats.next_due {
                    Some(due) if due <= post.scheduled_time => due,
                    _ => post.scheduled_time,
                });
            }
        }
        Ok(stats)
    }

    fn ensure_registered(&self, platform: &str) -> Result<()> {
        if self.publishers.contains(platform) {
            Ok(())
        } else {
            Err(SchedcastError::UnknownPlatform(platform.to_string()))
        }
    }

    async fn build_post(&self, request: ScheduleRequest) -> Result<Post> {
        self.ensure_registered(&request.platform)?;
        if request.content_ref.trim().is_empty() {
            return Err(SchedcastError::InvalidInput(
                "content reference cannot be empty".to_string(),
            ));
        }

        let at = self
            .resolve_time(&request.platform, request.scheduled_time)
            .await?;
        Ok(Post::new(
            request.platform,
            request.content_ref,
            request.caption,
            at,
            request.metadata,
        ))
    }

    async fn resolve_time(&self, platform: &str, time: Option<ScheduleTime>) -> Result<DateTime<Utc>> {
        let now = types::now();
        let Some(time) = time else {
            let delay = chrono::Duration::from_std(self.config.default_delay).map_err(|_| {
                SchedcastError::InvalidTime("default delay is out of range".to_string())
            })?;
            return scheduling::offset(now, delay);
        };

        let last_scheduled = if time.is_random() {
            self.last_scheduled(platform).await?
        } else {
            None
        };
        time.resolve(now, last_scheduled)
    }

    /// Latest scheduled time among the platform's queued posts.
    async fn last_scheduled(&self, platform: &str) -> Result<Option<DateTime<Utc>>> {
        let filter = PostFilter {
            platform: Some(platform.to_string()),
            status: Some(PostStatus::Scheduled),
            ..PostFilter::default()
        };
        let queued = self.store.query(&filter).await?;
        Ok(queued.last().map(|p| p.scheduled_time))
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        // Stops a still-running loop if shutdown was never awaited.
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockPublisher;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, SubsecRound};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn manager() -> (Manager, MockPublisher) {
        let config = EngineConfig {
            tick_interval: Duration::from_millis(20),
            retry_delay: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(2),
            ..EngineConfig::default()
        };
        let manager = Manager::new(config, Arc::new(MemoryStore::new()));
        let mock = MockPublisher::success("twitter");
        manager.register_publisher("twitter", Arc::new(mock.clone()));
        (manager, mock)
    }

    fn due_request() -> ScheduleRequest {
        ScheduleRequest::new("twitter", "img.png", "hello")
            .at(types::now() - ChronoDuration::seconds(1))
    }

    #[tokio::test]
    async fn test_schedule_defaults_to_grace_delay() {
        let (manager, _) = manager();
        let before = types::now();
        let post = manager
            .schedule(ScheduleRequest::new("twitter", "img.png", "hi"))
            .await
            .unwrap();

        assert_eq!(post.status, PostStatus::Scheduled);
        assert!(post.scheduled_time >= before + ChronoDuration::seconds(300));
        assert_eq!(manager.get(&post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn test_schedule_rejects_unknown_platform() {
        let (manager, _) = manager();
        let err = manager
            .schedule(ScheduleRequest::new("myspace", "img.png", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedcastError::UnknownPlatform(ref p) if p == "myspace"));
        assert!(manager.list(None, None, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_rejects_bad_time() {
        let (manager, _) = manager();
        let err = manager
            .schedule(ScheduleRequest::new("twitter", "img.png", "hi").at("whenever"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedcastError::InvalidTime(_)));
    }

    #[tokio::test]
    async fn test_schedule_emits_event() {
        let (manager, _) = manager();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        manager.register_callback(EventKind::PostScheduled, move |event| {
            sink.lock().unwrap().push(event.post.id.clone());
            Ok(())
        });

        let post = manager.schedule(due_request()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![post.id]);
    }

    #[tokio::test]
    async fn test_out_of_range_default_delay_is_invalid_time() {
        for delay in [Duration::from_secs(u64::MAX), Duration::from_secs(200_000 * 366 * 86_400)] {
            let config = EngineConfig {
                default_delay: delay,
                ..EngineConfig::default()
            };
            let manager = Manager::new(config, Arc::new(MemoryStore::new()));
            manager.register_publisher("twitter", Arc::new(MockPublisher::success("twitter")));

            let err = manager
                .schedule(ScheduleRequest::new("twitter", "img.png", "hi"))
                .await
                .unwrap_err();
            assert!(matches!(err, SchedcastError::InvalidTime(_)), "{delay:?}: {err}");
        }
    }

    #[tokio::test]
    async fn test_schedule_rejects_huge_relative_time() {
        let (manager, _) = manager();
        let err = manager
            .schedule(ScheduleRequest::new("twitter", "img.png", "hi").at("200000 years"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedcastError::InvalidTime(_)));
        assert!(manager.list(None, None, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_random_time_follows_latest_queued_post() {
        let (manager, _) = manager();
        let anchor = types::now() + ChronoDuration::hours(5);
        manager
            .schedule(ScheduleRequest::new("twitter", "a.png", "a").at(anchor))
            .await
            .unwrap();

        let post = manager
            .schedule(ScheduleRequest::new("twitter", "b.png", "b").at("random:10m-20m"))
            .await
            .unwrap();
        assert!(post.scheduled_time >= anchor + ChronoDuration::minutes(10));
        assert!(post.scheduled_time <= anchor + ChronoDuration::minutes(20));
    }

    #[tokio::test]
    async fn test_cancel_semantics() {
        let (manager, _) = manager();
        let post = manager
            .schedule(ScheduleRequest::new("twitter", "img.png", "hi"))
            .await
            .unwrap();

        assert!(manager.cancel(&post.id).await.unwrap());
        assert_eq!(
            manager.get(&post.id).await.unwrap().status,
            PostStatus::Cancelled
        );
        // Second cancel and unknown ids are advisory misses.
        assert!(!manager.cancel(&post.id).await.unwrap());
        assert!(!manager.cancel("no-such-post").await.unwrap());

        let err = manager.try_cancel(&post.id).await.unwrap_err();
        assert!(matches!(
            err,
            SchedcastError::AlreadyTerminal { status: PostStatus::Cancelled, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_post_is_never_dispatched() {
        let (manager, mock) = manager();
        let post = manager.schedule(due_request()).await.unwrap();
        manager.cancel(&post.id).await.unwrap();

        assert_eq!(manager.tick().await.unwrap(), 0);
        assert_eq!(mock.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_draft_lifecycle() {
        let (manager, mock) = manager();
        let draft = manager.create_draft(due_request()).await.unwrap();
        assert_eq!(draft.status, PostStatus::Draft);

        assert_eq!(manager.tick().await.unwrap(), 0);

        let scheduled = manager
            .schedule_draft(&draft.id, Some((types::now() - ChronoDuration::seconds(1)).into()))
            .await
            .unwrap();
        assert_eq!(scheduled.status, PostStatus::Scheduled);

        manager.tick().await.unwrap();
        assert_eq!(mock.publish_call_count(), 1);

        let err = manager.schedule_draft(&draft.id, None).await.unwrap_err();
        assert!(matches!(err, SchedcastError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reschedule_in_place_and_as_copy() {
        let (manager, _) = manager();
        let post = manager
            .schedule(ScheduleRequest::new("twitter", "img.png", "hi"))
            .await
            .unwrap();

        let target = types::now() + ChronoDuration::days(2);
        let moved = manager.reschedule(&post.id, Some(target.into())).await.unwrap();
        assert_eq!(moved.id, post.id);
        assert_eq!(moved.scheduled_time, target.trunc_subsecs(3));

        manager.cancel(&post.id).await.unwrap();
        let copy = manager.reschedule(&post.id, Some(target.into())).await.unwrap();
        assert_ne!(copy.id, post.id);
        assert_eq!(copy.status, PostStatus::Scheduled);
        assert_eq!(copy.attempt_count, 0);
        assert_eq!(
            manager.get(&post.id).await.unwrap().status,
            PostStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_reschedule_posted_is_rejected() {
        let (manager, _) = manager();
        let post = manager.schedule(due_request()).await.unwrap();
        manager.tick().await.unwrap();

        let err = manager.reschedule(&post.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            SchedcastError::AlreadyTerminal { status: PostStatus::Posted, .. }
        ));
        assert!(matches!(
            manager.reschedule("missing", None).await.unwrap_err(),
            SchedcastError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let (manager, _) = manager();
        manager.register_publisher("tiktok", Arc::new(MockPublisher::success("tiktok")));
        let later = types::now() + ChronoDuration::hours(1);
        let first = manager
            .schedule(ScheduleRequest::new("tiktok", "a.mp4", "a").at(later))
            .await
            .unwrap();
        let second = manager
            .schedule(ScheduleRequest::new("twitter", "b.png", "b").at(later + ChronoDuration::hours(1)))
            .await
            .unwrap();
        let draft = manager
            .create_draft(ScheduleRequest::new("twitter", "c.png", "c"))
            .await
            .unwrap();

        let all = manager.list(None, None, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].scheduled_time <= w[1].scheduled_time));

        let twitter = manager.list(Some("twitter"), None, 0).await.unwrap();
        assert_eq!(twitter.len(), 2);
        let drafts = manager.list(None, Some(PostStatus::Draft), 0).await.unwrap();
        assert_eq!(drafts[0].id, draft.id);
        assert_eq!(manager.list(None, None, 1).await.unwrap().len(), 1);

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status[&PostStatus::Scheduled], 2);
        assert_eq!(stats.by_status[&PostStatus::Draft], 1);
        assert_eq!(stats.by_platform["twitter"], 2);
        assert_eq!(stats.next_due, Some(first.scheduled_time));
        assert!(second.scheduled_time > first.scheduled_time);
    }

    #[tokio::test]
    async fn test_start_delivers_and_shutdown_is_idempotent() {
        let (manager, mock) = manager();
        manager.start().await.unwrap();
        manager.start().await.unwrap();
        assert!(manager.is_running().await);

        let post = manager.schedule(due_request()).await.unwrap();
        for _ in 0..50 {
            if mock.publish_call_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        manager.shutdown().await.unwrap();
        manager.shutdown().await.unwrap();
        assert!(!manager.is_running().await);
        assert_eq!(
            manager.get(&post.id).await.unwrap().status,
            PostStatus::Posted
        );
        assert!(manager.start().await.is_err());
    }

    #[test]
    fn test_stats_serialize_with_status_names() {
        let mut stats = QueueStats::default();
        stats.by_status.insert(PostStatus::Scheduled, 2);
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["by_status"]["Scheduled"], 2);
    }
}
