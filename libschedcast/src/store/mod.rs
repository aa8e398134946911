//! Durable post storage
//!
//! [`PostStore::compare_and_transition`] is the only way a stored post changes
//! after creation. Implementations serialize it per post id, never across the
//! whole store, so unrelated posts can move through their lifecycles in parallel.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Result, SchedcastError};
use crate::types::{self, Post, PostStatus};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Field updates applied while a transition holds the post's lock.
pub type Mutator = Box<dyn FnOnce(&mut Post) + Send>;

/// A mutator that changes nothing beyond the status itself.
pub fn no_change() -> Mutator {
    Box::new(|_| {})
}

/// Selection criteria for [`PostStore::query`]; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilter {
    pub platform: Option<String>,
    pub status: Option<PostStatus>,
    /// Only posts with `scheduled_time <= due_before`
    pub due_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl PostFilter {
    /// Scheduled posts whose time has come.
    pub fn due(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(PostStatus::Scheduled),
            due_before: Some(now),
            ..Self::default()
        }
    }

    pub fn with_status(status: PostStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, post: &Post) -> bool {
        self.platform.as_deref().map_or(true, |p| post.platform == p)
            && self.status.map_or(true, |s| post.status == s)
            && self.due_before.map_or(true, |t| post.scheduled_time <= t)
    }
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a new post and return its id.
    async fn create(&self, post: &Post) -> Result<String>;

    async fn get(&self, id: &str) -> Result<Option<Post>>;

    /// Posts matching `filter`, ordered by scheduled time ascending.
    async fn query(&self, filter: &PostFilter) -> Result<Vec<Post>>;

    /// Atomically move `id` from `expected` to `new`, applying `mutator` first.
    ///
    /// Returns the stored post on success and `None` when the post is missing or
    /// its status no longer equals `expected` (the caller should re-read). The
    /// change is durable before this returns.
    ///
    /// # Errors
    ///
    /// [`SchedcastError::InvalidTransition`] if `expected -> new` is not a
    /// lifecycle edge, or if the mutator tries to lower `attempt_count`.
    async fn compare_and_transition(
        &self,
        id: &str,
        expected: PostStatus,
        new: PostStatus,
        mutator: Mutator,
    ) -> Result<Option<Post>>;

    /// Push buffered writes to stable storage.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Compute the post that a successful transition will store.
pub(crate) fn apply_transition(
    current: &Post,
    new: PostStatus,
    mutator: Mutator,
) -> Result<Post> {
    let mut next = current.clone();
    mutator(&mut next);

    // Identity and creation time are immutable.
    next.id = current.id.clone();
    next.created_at = current.created_at;
    next.status = new;

    if next.attempt_count < current.attempt_count {
        return Err(SchedcastError::InvalidTransition {
            from: current.status,
            to: new,
        });
    }

    let now = types::now();
    next.updated_at = if now > current.updated_at {
        now
    } else {
        current.updated_at
    };
    Ok(next)
}

pub(crate) fn check_edge(expected: PostStatus, new: PostStatus) -> Result<()> {
    if expected.can_transition_to(new) {
        Ok(())
    } else {
        Err(SchedcastError::InvalidTransition {
            from: expected,
            to: new,
        })
    }
}

/// One async mutex per post id.
#[derive(Default)]
pub(crate) struct IdLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdLocks {
    pub(crate) async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody is waiting on so the map tracks only live ids.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Stable ordering shared by every store: time, then creation, then id.
pub(crate) fn sort_posts(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        a.scheduled_time
            .cmp(&b.scheduled_time)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}
