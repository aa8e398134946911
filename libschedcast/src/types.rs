//! Core types for Schedcast

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Platform-specific options passed through to the publisher untouched.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Current time truncated to the millisecond precision the store persists.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Converts a timestamp to the integer form stored in SQLite.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Converts a stored integer timestamp back to a `DateTime`.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// One scheduled unit of delivery to one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub platform: String,
    pub content_ref: String,
    pub caption: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: PostStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub external_post_id: Option<String>,
    pub external_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Post {
    pub fn new(
        platform: impl Into<String>,
        content_ref: impl Into<String>,
        caption: impl Into<String>,
        scheduled_time: DateTime<Utc>,
        metadata: Metadata,
    ) -> Self {
        let created = now();
        Self {
            id: Uuid::new_v4().to_string(),
            platform: platform.into(),
            content_ref: content_ref.into(),
            caption: caption.into(),
            scheduled_time: scheduled_time.trunc_subsecs(3),
            status: PostStatus::Scheduled,
            attempt_count: 0,
            last_error: None,
            external_post_id: None,
            external_url: None,
            created_at: created,
            updated_at: created,
            metadata,
        }
    }

    /// A fresh post carrying the same delivery payload under a new id.
    pub fn duplicate_for(&self, scheduled_time: DateTime<Utc>) -> Self {
        Self::new(
            self.platform.clone(),
            self.content_ref.clone(),
            self.caption.clone(),
            scheduled_time,
            self.metadata.clone(),
        )
    }

    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_time <= at
    }
}

/// Lifecycle state of a post.
///
/// ```text
/// Draft -> Scheduled -> Posting -> { Posted | Scheduled (retry) | Failed }
/// Draft -> Cancelled, Scheduled -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PostStatus {
    Draft,
    Scheduled,
    Posting,
    Posted,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub const ALL: [PostStatus; 6] = [
        PostStatus::Draft,
        PostStatus::Scheduled,
        PostStatus::Posting,
        PostStatus::Posted,
        PostStatus::Failed,
        PostStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "Draft",
            PostStatus::Scheduled => "Scheduled",
            PostStatus::Posting => "Posting",
            PostStatus::Posted => "Posted",
            PostStatus::Failed => "Failed",
            PostStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Posted | PostStatus::Failed | PostStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// `Draft -> Draft` and `Scheduled -> Scheduled` are accepted as in-place
    /// field updates (rescheduling); every other self-edge is rejected.
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, next),
            (Draft, Draft)
                | (Draft, Scheduled)
                | (Draft, Cancelled)
                | (Scheduled, Scheduled)
                | (Scheduled, Posting)
                | (Scheduled, Cancelled)
                | (Posting, Posted)
                | (Posting, Scheduled)
                | (Posting, Failed)
        )
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PostStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| {
                format!(
                    "Invalid status '{}'. Valid statuses: draft, scheduled, posting, posted, failed, cancelled",
                    s
                )
            })
    }
}

/// Identifiers returned by a publisher after a successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub external_post_id: String,
    pub external_url: Option<String>,
}
