//! Publisher capability and registry
//!
//! The engine never sees concrete platform clients. Anything that can
//! authenticate and publish implements [`Publisher`] and is registered under a
//! platform name; posts name the platform they are meant for.
//!
//! ```no_run
//! use std::sync::Arc;
//! use libschedcast::platforms::{mock::MockPublisher, PublisherRegistry};
//!
//! let registry = PublisherRegistry::new();
//! registry.register("twitter", Arc::new(MockPublisher::success("twitter")));
//! assert!(registry.contains("twitter"));
//! ```

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::PlatformError;
use crate::events::panic_message;
use crate::types::{Metadata, PublishReceipt};

pub mod mock;

/// A destination that content can be delivered to.
///
/// Implementations use interior mutability for session state; the engine may
/// call them from several tasks. Timeouts on network calls are the
/// implementation's responsibility.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Establish a session. `false` means the credentials were rejected.
    async fn authenticate(&self) -> bool;

    /// Deliver `content_ref` with `caption`.
    ///
    /// `options` is the post's metadata, passed through untouched.
    ///
    /// # Errors
    ///
    /// Any [`PlatformError`]; the engine treats all of them as retryable.
    async fn publish(
        &self,
        content_ref: &str,
        caption: &str,
        options: &Metadata,
    ) -> Result<PublishReceipt, PlatformError>;
}

/// A publisher plus the engine's view of its session.
pub struct RegisteredPublisher {
    name: String,
    publisher: Arc<dyn Publisher>,
    authenticated: AtomicBool,
}

impl RegisteredPublisher {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Authenticate if needed, then publish.
    ///
    /// Panics inside the publisher are caught and reported as
    /// [`PlatformError::Panicked`]. An authentication failure from `publish`
    /// drops the session so the next attempt signs in again.
    pub async fn deliver(
        &self,
        content_ref: &str,
        caption: &str,
        options: &Metadata,
    ) -> Result<PublishReceipt, PlatformError> {
        if !self.is_authenticated() {
            let authenticated = AssertUnwindSafe(self.publisher.authenticate())
                .catch_unwind()
                .await
                .map_err(|panic| PlatformError::Panicked(panic_message(panic.as_ref())))?;
            if !authenticated {
                return Err(PlatformError::Authentication(format!(
                    "{} rejected the credentials",
                    self.name
                )));
            }
            self.authenticated.store(true, Ordering::Release);
            tracing::debug!(platform = %self.name, "Authenticated publisher");
        }

        let result = AssertUnwindSafe(self.publisher.publish(content_ref, caption, options))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(PlatformError::Panicked(panic_message(panic.as_ref()))));

        if let Err(e) = &result {
            if e.is_authentication() {
                self.authenticated.store(false, Ordering::Release);
            }
        }
        result
    }
}

/// Platform name -> publisher.
#[derive(Default)]
pub struct PublisherRegistry {
    entries: RwLock<HashMap<String, Arc<RegisteredPublisher>>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `publisher` for `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, publisher: Arc<dyn Publisher>) {
        let name = name.into();
        let entry = Arc::new(RegisteredPublisher {
            name: name.clone(),
            publisher,
            authenticated: AtomicBool::new(false),
        });
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), entry);
        if previous.is_some() {
            tracing::info!(platform = %name, "Replaced publisher");
        } else {
            tracing::info!(platform = %name, "Registered publisher");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredPublisher>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered platform names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
