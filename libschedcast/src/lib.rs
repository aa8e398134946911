//! Schedcast - scheduled delivery of social media posts
//!
//! Posts are queued in a durable store and delivered to per-platform
//! publishers by a background worker that honours per-platform rate limits
//! and retries failed deliveries. [`Manager`] is the entry point.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod notifier;
pub mod platforms;
pub mod rate_limiter;
pub mod retry;
pub mod scheduling;
pub mod store;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::{Config, EngineConfig, PublisherMode};
pub use error::{ConfigError, DbError, PlatformError, Result, SchedcastError};
pub use events::{Event, EventBus, EventKind};
pub use manager::{Manager, QueueStats, ScheduleRequest};
pub use platforms::{Publisher, PublisherRegistry};
pub use scheduling::ScheduleTime;
pub use store::{MemoryStore, PostFilter, PostStore, SqliteStore};
pub use types::{Metadata, Post, PostStatus, PublishReceipt};
