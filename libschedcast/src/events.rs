//! Lifecycle event bus
//!
//! Two ways to observe post lifecycle transitions:
//!
//! - **Callbacks** registered per [`EventKind`] run synchronously on the
//!   emitting task, in registration order. A callback that returns an error or
//!   panics is logged and skipped; it never reaches the worker.
//! - **Subscriptions** hand out a `tokio::sync::broadcast` receiver carrying
//!   every event. Lagging receivers lose the oldest events; emitters never block.
//!
//! ```no_run
//! use libschedcast::events::{EventBus, EventKind};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! bus.register(EventKind::PostFailed, |event| {
//!     eprintln!("giving up on {}", event.post.id);
//!     Ok(())
//! });
//!
//! let mut receiver = bus.subscribe();
//! while let Ok(event) = receiver.recv().await {
//!     println!("{}: {}", event.kind, event.post.id);
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::types::{Post, PublishReceipt};

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// A lifecycle subscriber.
pub type Callback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PostScheduled,
    PostStarted,
    PostCompleted,
    PostFailed,
    PostRetryScheduled,
    PostCancelled,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::PostScheduled,
        EventKind::PostStarted,
        EventKind::PostCompleted,
        EventKind::PostFailed,
        EventKind::PostRetryScheduled,
        EventKind::PostCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PostScheduled => "post_scheduled",
            EventKind::PostStarted => "post_started",
            EventKind::PostCompleted => "post_completed",
            EventKind::PostFailed => "post_failed",
            EventKind::PostRetryScheduled => "post_retry_scheduled",
            EventKind::PostCancelled => "post_cancelled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown event '{}'", s))
    }
}

/// Details that only some events carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventExtra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PublishReceipt>,
}

/// A lifecycle transition together with the post as stored after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub post: Post,
    #[serde(default)]
    pub extra: EventExtra,
}

impl Event {
    pub fn new(kind: EventKind, post: Post) -> Self {
        Self {
            kind,
            post,
            extra: EventExtra::default(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.extra.error = Some(error.into());
        self
    }

    pub fn with_next_attempt(mut self, at: DateTime<Utc>) -> Self {
        self.extra.next_attempt_at = Some(at);
        self
    }

    pub fn with_receipt(mut self, receipt: PublishReceipt) -> Self {
        self.extra.receipt = Some(receipt);
        self
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    callbacks: Arc<RwLock<HashMap<EventKind, Vec<Callback>>>>,
}

impl EventBus {
    /// `capacity` bounds how far a subscription may lag before losing events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            callbacks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append a callback for `kind`; callbacks run in the order registered.
    pub fn register<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_arc(kind, Arc::new(callback));
    }

    pub fn register_arc(&self, kind: EventKind, callback: Callback) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(callback);
    }

    pub fn callback_count(&self, kind: EventKind) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver `event` to its callbacks, then to subscriptions.
    pub fn emit(&self, event: Event) {
        // Snapshot so callbacks may register further callbacks.
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    event = %event.kind,
                    post_id = %event.post.id,
                    callback = index,
                    error = %e,
                    "Event callback failed"
                ),
                Err(panic) => tracing::error!(
                    event = %event.kind,
                    post_id = %event.post.id,
                    callback = index,
                    panic = %panic_message(panic.as_ref()),
                    "Event callback panicked"
                ),
            }
        }

        // Err only means nobody is subscribed
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
