//! Failure notifications
//!
//! A [`Notifier`] is told when a post has exhausted its retries. It plugs into
//! the event bus through [`failure_callback`], so delivery problems in the
//! notifier (an SMTP outage, say) are logged by the bus and never affect the worker.

use std::sync::Arc;

use crate::events::{Callback, Event};

pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Writes notifications to the log at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::error!(subject = %subject, body = %body, "Delivery failure notification");
        Ok(())
    }
}

pub fn failure_subject(event: &Event) -> String {
    format!(
        "[schedcast] Post failed after {} attempts",
        event.post.attempt_count
    )
}

pub fn failure_body(event: &Event) -> String {
    let post = &event.post;
    let error = event
        .extra
        .error
        .as_deref()
        .or(post.last_error.as_deref())
        .unwrap_or("unknown");
    format!(
        "Post: {}\nPlatform: {}\nContent: {}\nCaption: {}\nAttempts: {}\nStatus: {}\nLast error: {}",
        post.id,
        post.platform,
        post.content_ref,
        post.caption,
        post.attempt_count,
        post.status,
        error
    )
}

/// An event-bus callback that forwards `post_failed` events to `notifier`.
pub fn failure_callback(notifier: Arc<dyn Notifier>) -> Callback {
    Arc::new(move |event: &Event| {
        notifier.notify(&failure_subject(event), &failure_body(event))
    })
}
