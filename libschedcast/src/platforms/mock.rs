//! Mock publisher
//!
//! Configurable stand-in for a real platform: it can reject credentials, fail
//! every call or only the first few, add latency, or panic. Clones share their
//! counters, so a test can register one clone and inspect another.
//! The daemon also uses it for platforms configured with `mode = "mock"`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::PlatformError;
use crate::platforms::Publisher;
use crate::types::{Metadata, PublishReceipt};

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Used in generated ids and urls
    pub name: String,
    pub auth_succeeds: bool,
    /// Fail every publish call
    pub fail_always: bool,
    /// Fail this many publish calls before succeeding
    pub fail_first: usize,
    /// Error returned by failing calls
    pub failure: PlatformError,
    /// Simulated network latency per call
    pub delay: Duration,
    /// Panic with this message instead of publishing
    pub panic_message: Option<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            auth_succeeds: true,
            fail_always: false,
            fail_first: 0,
            failure: PlatformError::Posting("Mock posting failed".to_string()),
            delay: Duration::ZERO,
            panic_message: None,
        }
    }
}

/// One recorded `publish` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishCall {
    pub content_ref: String,
    pub caption: String,
    pub options: Metadata,
}

#[derive(Default)]
struct MockState {
    auth_calls: AtomicUsize,
    publish_calls: AtomicUsize,
    /// Calls currently inside `publish`
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<PublishCall>>,
}

#[derive(Clone)]
pub struct MockPublisher {
    config: MockConfig,
    state: Arc<MockState>,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            state: Arc::default(),
        }
    }

    /// A publisher that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// A publisher whose `authenticate` returns false
    pub fn auth_failure(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            auth_succeeds: false,
            ..Default::default()
        })
    }

    /// A publisher whose every publish fails with `error`
    pub fn always_fail(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            fail_always: true,
            failure: PlatformError::Posting(error.to_string()),
            ..Default::default()
        })
    }

    /// A publisher that fails `n` times, then succeeds
    pub fn fail_first(name: &str, n: usize, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            fail_first: n,
            failure: PlatformError::Posting(error.to_string()),
            ..Default::default()
        })
    }

    /// A publisher that takes `delay` per call
    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    /// A publisher that panics inside `publish`
    pub fn panicking(name: &str, message: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            panic_message: Some(message.to_string()),
            ..Default::default()
        })
    }

    pub fn auth_call_count(&self) -> usize {
        self.state.auth_calls.load(Ordering::SeqCst)
    }

    pub fn publish_call_count(&self) -> usize {
        self.state.publish_calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `publish` calls observed
    pub fn max_concurrent_publishes(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every `publish` call so far, including failed ones
    pub fn calls(&self) -> Vec<PublishCall> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Decrements the in-flight counter however `publish` exits.
struct InFlight<'a>(&'a MockState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn authenticate(&self) -> bool {
        self.state.auth_calls.fetch_add(1, Ordering::SeqCst);
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
        self.config.auth_succeeds
    }

    async fn publish(
        &self,
        content_ref: &str,
        caption: &str,
        options: &Metadata,
    ) -> Result<PublishReceipt, PlatformError> {
        let call_number = self.state.publish_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let concurrent = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);
        let _in_flight = InFlight(&self.state);

        self.state
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishCall {
                content_ref: content_ref.to_string(),
                caption: caption.to_string(),
                options: options.clone(),
            });

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let Some(message) = &self.config.panic_message {
            panic!("{}", message);
        }

        if self.config.fail_always || call_number <= self.config.fail_first {
            return Err(self.config.failure.clone());
        }

        let id = format!("{}-mock-{}", self.config.name, uuid::Uuid::new_v4());
        Ok(PublishReceipt {
            external_url: Some(format!("https://mock.invalid/{}/{}", self.config.name, id)),
            external_post_id: id,
        })
    }
}
