//! Error types for Schedcast

use thiserror::Error;

use crate::types::PostStatus;

pub type Result<T> = std::result::Result<T, SchedcastError>;

#[derive(Error, Debug)]
pub enum SchedcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Post {id} is already terminal ({status})")]
    AlreadyTerminal { id: String, status: PostStatus },

    #[error("Post {0} is being delivered right now")]
    InFlight(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: PostStatus, to: PostStatus },
}

impl SchedcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedcastError::InvalidInput(_)
            | SchedcastError::UnknownPlatform(_)
            | SchedcastError::InvalidTime(_) => 3,
            SchedcastError::Config(_) | SchedcastError::Database(_) => 2,
            SchedcastError::Platform(_)
            | SchedcastError::NotFound(_)
            | SchedcastError::AlreadyTerminal { .. }
            | SchedcastError::InFlight(_)
            | SchedcastError::InvalidTransition { .. } => 1,
        }
    }

    /// Whether the error was caused by the caller's input rather than by delivery.
    ///
    /// Caller errors are returned synchronously and never enter the retry machinery.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SchedcastError::InvalidInput(_)
                | SchedcastError::UnknownPlatform(_)
                | SchedcastError::InvalidTime(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Delivery failures reported by (or on behalf of) a publisher.
///
/// Every variant is retryable; the retry policy alone decides when to give up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Publisher panicked: {0}")]
    Panicked(String),
}

impl PlatformError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, PlatformError::Authentication(_))
    }
}
