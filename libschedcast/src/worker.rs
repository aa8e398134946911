//! Dispatch worker
//!
//! Each tick scans the store for due posts and claims them one by one with a
//! `Scheduled -> Posting` compare-and-transition; a lost claim means another
//! tick (or process) owns the post and it is skipped. A rate-limited platform
//! gets at most one claim per tick, and none while its limiter is closed, so
//! posts only sit in `Posting` when they are about to go out. Every claimed
//! post is handled on its own task:
//!
//! 1. look up the publisher (unknown platform fails the post immediately)
//! 2. reserve the platform's rate-limit slot
//! 3. take a permit from the bounded executor pool
//! 4. commit the slot, authenticate if needed and publish
//! 5. record `Posted`, or let the retry policy choose `Scheduled` or `Failed`
//!
//! Rate-limit waits do not hold a permit, so one throttled platform cannot
//! starve the others. The slot stays reserved while waiting for a permit, so
//! two publishes to one platform are never closer than its interval. If
//! shutdown begins before step 4, the post is released back to `Scheduled`
//! untouched.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{PlatformError, Result};
use crate::events::{Event, EventBus, EventKind};
use crate::platforms::PublisherRegistry;
use crate::rate_limiter::RateLimiter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{no_change, PostFilter, PostStore};
use crate::types::{self, Post, PostStatus, PublishReceipt};

/// Error recorded on posts found mid-delivery when the worker starts.
pub const INTERRUPTED_ERROR: &str = "interrupted during delivery; outcome unknown";

pub struct Worker {
    store: Arc<dyn PostStore>,
    publishers: Arc<PublisherRegistry>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    events: EventBus,
    permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// Keeps the in-flight count accurate however a dispatch task ends.
struct DispatchGuard {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl DispatchGuard {
    fn new(in_flight: Arc<AtomicUsize>, idle: Arc<Notify>) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self { in_flight, idle }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl Worker {
    pub fn new(
        store: Arc<dyn PostStore>,
        publishers: Arc<PublisherRegistry>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        events: EventBus,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            publishers,
            limiter,
            retry,
            events,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            shutdown,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Number of claimed posts whose dispatch has not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Fail posts left in `Posting` by a previous process.
    ///
    /// Whether their publish went through is unknown; failing them rather than
    /// retrying keeps delivery at-most-once.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let stranded = self
            .store
            .query(&PostFilter::with_status(PostStatus::Posting))
            .await?;

        let mut recovered = 0;
        for post in stranded {
            let failed = self
                .store
                .compare_and_transition(
                    &post.id,
                    PostStatus::Posting,
                    PostStatus::Failed,
                    Box::new(|p| {
                        p.attempt_count += 1;
                        p.last_error = Some(INTERRUPTED_ERROR.to_string());
                    }),
                )
                .await?;

            if let Some(failed) = failed {
                tracing::warn!(
                    post_id = %failed.id,
                    platform = %failed.platform,
                    "Post was interrupted during delivery, marking failed"
                );
                self.events
                    .emit(Event::new(EventKind::PostFailed, failed).with_error(INTERRUPTED_ERROR));
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Claim every post due at `now` and start its dispatch task.
    pub async fn claim_and_spawn(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>> {
        let due = self.store.query(&PostFilter::due(now)).await?;
        let mut handles = Vec::with_capacity(due.len());
        let mut throttled = HashSet::new();

        for candidate in due {
            if self.stopping() {
                break;
            }

            let limited = self.limiter.min_interval(&candidate.platform).is_some();
            if limited
                && (throttled.contains(&candidate.platform)
                    || !self.limiter.is_ready(&candidate.platform).await)
            {
                tracing::debug!(
                    post_id = %candidate.id,
                    platform = %candidate.platform,
                    "Platform is rate limited, leaving post for a later tick"
                );
                throttled.insert(candidate.platform);
                continue;
            }

            let claimed = self
                .store
                .compare_and_transition(
                    &candidate.id,
                    PostStatus::Scheduled,
                    PostStatus::Posting,
                    no_change(),
                )
                .await?;

            let Some(post) = claimed else {
                tracing::debug!(post_id = %candidate.id, "Post already claimed, skipping");
                continue;
            };
            if limited {
                throttled.insert(post.platform.clone());
            }

            tracing::info!(
                post_id = %post.id,
                platform = %post.platform,
                attempt = post.attempt_count + 1,
                "Dispatching post"
            );
            self.events.emit(Event::new(EventKind::PostStarted, post.clone()));

            let guard = DispatchGuard::new(self.in_flight.clone(), self.idle.clone());
            let worker = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                worker.dispatch(post).await;
            }));
        }

        Ok(handles)
    }

    /// Run one scan and wait for every dispatch it started. Returns the number claimed.
    pub async fn tick(self: &Arc<Self>) -> Result<usize> {
        let handles = self.claim_and_spawn(types::now()).await?;
        let claimed = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Dispatch task aborted");
            }
        }
        Ok(claimed)
    }

    /// Tick every `interval` until shutdown is signalled. Dispatches run detached.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Worker started");

        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if self.stopping() {
                        break;
                    }
                    if let Err(e) = self.claim_and_spawn(types::now()).await {
                        tracing::error!(error = %e, "Worker tick failed");
                    }
                }
            }
        }

        tracing::info!("Worker stopped");
    }

    /// Wait until no dispatch is in flight. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Resolves once shutdown is signalled; never resolves if the signal is gone.
    async fn shutdown_signalled(&self) {
        let mut shutdown = self.shutdown.clone();
        let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
        if !signalled {
            std::future::pending::<()>().await;
        }
    }

    async fn dispatch(&self, post: Post) {
        let Some(publisher) = self.publishers.get(&post.platform) else {
            let message = format!("no publisher registered for platform '{}'", post.platform);
            self.give_up(post, message, false).await;
            return;
        };

        let slot = tokio::select! {
            slot = self.limiter.reserve(&post.platform) => slot,
            _ = self.shutdown_signalled() => {
                self.release(post).await;
                return;
            }
        };
        if !slot.waited().is_zero() {
            tracing::debug!(
                post_id = %post.id,
                platform = %post.platform,
                waited_ms = slot.waited().as_millis() as u64,
                "Rate limiter released post"
            );
        }

        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.release(post).await;
                    return;
                }
            },
            _ = self.shutdown_signalled() => {
                self.release(post).await;
                return;
            }
        };

        if self.stopping() {
            self.release(post).await;
            return;
        }

        slot.commit();
        match publisher
            .deliver(&post.content_ref, &post.caption, &post.metadata)
            .await
        {
            Ok(receipt) => self.complete(post, receipt).await,
            Err(e) => self.handle_failure(post, e).await,
        }
    }

    async fn complete(&self, post: Post, receipt: PublishReceipt) {
        let stored = receipt.clone();
        let result = self
            .store
            .compare_and_transition(
                &post.id,
                PostStatus::Posting,
                PostStatus::Posted,
                Box::new(move |p| {
                    p.attempt_count += 1;
                    p.last_error = None;
                    p.external_post_id = Some(stored.external_post_id);
                    p.external_url = stored.external_url;
                }),
            )
            .await;

        match result {
            Ok(Some(posted)) => {
                tracing::info!(
                    post_id = %posted.id,
                    platform = %posted.platform,
                    attempt = posted.attempt_count,
                    external_id = %receipt.external_post_id,
                    "Post delivered"
                );
                self.events
                    .emit(Event::new(EventKind::PostCompleted, posted).with_receipt(receipt));
            }
            Ok(None) => tracing::error!(
                post_id = %post.id,
                "Delivered post changed state underneath the worker"
            ),
            Err(e) => tracing::error!(
                post_id = %post.id,
                error = %e,
                "Failed to record delivery; post stays in Posting until restart"
            ),
        }
    }

    async fn handle_failure(&self, post: Post, error: PlatformError) {
        let attempts = post.attempt_count + 1;
        let message = error.to_string();

        match self.retry.decide(attempts, types::now()) {
            RetryDecision::Retry { next_attempt_at } => {
                self.retry_later(post, message, next_attempt_at).await
            }
            RetryDecision::GiveUp => self.give_up(post, message, true).await,
        }
    }

    async fn retry_later(&self, post: Post, message: String, next_attempt_at: DateTime<Utc>) {
        let stored = message.clone();
        let result = self
            .store
            .compare_and_transition(
                &post.id,
                PostStatus::Posting,
                PostStatus::Scheduled,
                Box::new(move |p| {
                    p.attempt_count += 1;
                    p.scheduled_time = next_attempt_at;
                    p.last_error = Some(stored);
                }),
            )
            .await;

        match result {
            Ok(Some(rescheduled)) => {
                tracing::warn!(
                    post_id = %rescheduled.id,
                    platform = %rescheduled.platform,
                    attempt = rescheduled.attempt_count,
                    next_attempt_at = %next_attempt_at,
                    error = %message,
                    "Delivery failed, retry scheduled"
                );
                self.events.emit(
                    Event::new(EventKind::PostRetryScheduled, rescheduled)
                        .with_error(message)
                        .with_next_attempt(next_attempt_at),
                );
            }
            Ok(None) => tracing::error!(
                post_id = %post.id,
                "Failed post changed state underneath the worker"
            ),
            Err(e) => tracing::error!(
                post_id = %post.id,
                error = %e,
                "Failed to record retry; post stays in Posting until restart"
            ),
        }
    }

    /// Terminal failure. `attempted` is false when no publish call was made.
    async fn give_up(&self, post: Post, message: String, attempted: bool) {
        let stored = message.clone();
        let result = self
            .store
            .compare_and_transition(
                &post.id,
                PostStatus::Posting,
                PostStatus::Failed,
                Box::new(move |p| {
                    if attempted {
                        p.attempt_count += 1;
                    }
                    p.last_error = Some(stored);
                }),
            )
            .await;

        match result {
            Ok(Some(failed)) => {
                tracing::error!(
                    post_id = %failed.id,
                    platform = %failed.platform,
                    attempt = failed.attempt_count,
                    error = %message,
                    "Post failed permanently"
                );
                self.events
                    .emit(Event::new(EventKind::PostFailed, failed).with_error(message));
            }
            Ok(None) => tracing::error!(
                post_id = %post.id,
                "Failed post changed state underneath the worker"
            ),
            Err(e) => tracing::error!(
                post_id = %post.id,
                error = %e,
                "Failed to record failure; post stays in Posting until restart"
            ),
        }
    }

    /// Hand a claimed but unattempted post back for the next run.
    async fn release(&self, post: Post) {
        match self
            .store
            .compare_and_transition(&post.id, PostStatus::Posting, PostStatus::Scheduled, no_change())
            .await
        {
            Ok(_) => tracing::info!(post_id = %post.id, "Released post during shutdown"),
            Err(e) => tracing::error!(post_id = %post.id, error = %e, "Failed to release post"),
        }
    }
}
