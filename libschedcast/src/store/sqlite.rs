//! SQLite-backed post store

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use super::{apply_transition, check_edge, IdLocks, Mutator, PostFilter, PostStore};
use crate::error::{DbError, Result};
use crate::types::{from_millis, to_millis, Metadata, Post, PostStatus};

const POST_COLUMNS: &str = "id, platform, content_ref, caption, scheduled_at, status, \
     attempt_count, last_error, external_post_id, external_url, created_at, updated_at, metadata";

/// Durable store: WAL journal with `synchronous = FULL`, so every committed
/// transition survives a crash.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    locks: std::sync::Arc<IdLocks>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes keep the URL valid on Windows too
        let db_url = format!("sqlite://{}", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        tracing::debug!(path = %expanded_path, "Opened post store");

        Ok(Self {
            pool,
            locks: Default::default(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint and close every connection.
    pub async fn close(&self) {
        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "Checkpoint before close failed");
        }
        self.pool.close().await;
    }
}

fn row_to_post(row: &SqliteRow) -> Result<Post> {
    let id: String = row.try_get("id").map_err(DbError::SqlxError)?;
    let corrupt = |reason: String| DbError::Corrupt {
        id: id.clone(),
        reason,
    };

    let status_str: String = row.try_get("status").map_err(DbError::SqlxError)?;
    let status = PostStatus::from_str(&status_str).map_err(&corrupt)?;

    let timestamp = |column: &str| -> Result<_> {
        let millis: i64 = row.try_get(column).map_err(DbError::SqlxError)?;
        Ok(from_millis(millis)
            .ok_or_else(|| corrupt(format!("{} out of range: {}", column, millis)))?)
    };

    let attempts: i64 = row.try_get("attempt_count").map_err(DbError::SqlxError)?;
    let attempt_count =
        u32::try_from(attempts).map_err(|_| corrupt(format!("attempt_count {}", attempts)))?;

    let metadata_json: String = row.try_get("metadata").map_err(DbError::SqlxError)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| corrupt(format!("metadata: {}", e)))?;

    Ok(Post {
        platform: row.try_get("platform").map_err(DbError::SqlxError)?,
        content_ref: row.try_get("content_ref").map_err(DbError::SqlxError)?,
        caption: row.try_get("caption").map_err(DbError::SqlxError)?,
        scheduled_time: timestamp("scheduled_at")?,
        status,
        attempt_count,
        last_error: row.try_get("last_error").map_err(DbError::SqlxError)?,
        external_post_id: row.try_get("external_post_id").map_err(DbError::SqlxError)?,
        external_url: row.try_get("external_url").map_err(DbError::SqlxError)?,
        created_at: timestamp("created_at")?,
        updated_at: timestamp("updated_at")?,
        metadata,
        id,
    })
}

fn metadata_json(post: &Post) -> Result<String> {
    serde_json::to_string(&post.metadata).map_err(|e| {
        DbError::Corrupt {
            id: post.id.clone(),
            reason: format!("metadata: {}", e),
        }
        .into()
    })
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn create(&self, post: &Post) -> Result<String> {
        let metadata = metadata_json(post)?;

        sqlx::query(
            r#"
            INSERT INTO posts (id, platform, content_ref, caption, scheduled_at, status,
                               attempt_count, last_error, external_post_id, external_url,
                               created_at, updated_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.platform)
        .bind(&post.content_ref)
        .bind(&post.caption)
        .bind(to_millis(post.scheduled_time))
        .bind(post.status.as_str())
        .bind(i64::from(post.attempt_count))
        .bind(&post.last_error)
        .bind(&post.external_post_id)
        .bind(&post.external_url)
        .bind(to_millis(post.created_at))
        .bind(to_millis(post.updated_at))
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(post.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_post).transpose()
    }

    async fn query(&self, filter: &PostFilter) -> Result<Vec<Post>> {
        let mut where_clauses = vec!["1=1"];
        if filter.platform.is_some() {
            where_clauses.push("platform = ?");
        }
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.due_before.is_some() {
            where_clauses.push("scheduled_at <= ?");
        }

        let query_str = format!(
            "SELECT {} FROM posts WHERE {} ORDER BY scheduled_at ASC, created_at ASC, id ASC LIMIT ?",
            POST_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(platform) = &filter.platform {
            query = query.bind(platform);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(due) = filter.due_before {
            query = query.bind(to_millis(due));
        }
        // SQLite treats a negative LIMIT as unbounded
        let limit = filter
            .limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(-1);
        query = query.bind(limit);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    async fn compare_and_transition(
        &self,
        id: &str,
        expected: PostStatus,
        new: PostStatus,
        mutator: Mutator,
    ) -> Result<Option<Post>> {
        check_edge(expected, new)?;
        let _guard = self.locks.lock(id).await;

        let current = match self.get(id).await? {
            Some(post) if post.status == expected => post,
            _ => return Ok(None),
        };

        let next = apply_transition(&current, new, mutator)?;
        let metadata = metadata_json(&next)?;

        // The status guard also covers writers in other processes.
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET platform = ?, content_ref = ?, caption = ?, scheduled_at = ?, status = ?,
                attempt_count = ?, last_error = ?, external_post_id = ?, external_url = ?,
                updated_at = ?, metadata = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(&next.platform)
        .bind(&next.content_ref)
        .bind(&next.caption)
        .bind(to_millis(next.scheduled_time))
        .bind(next.status.as_str())
        .bind(i64::from(next.attempt_count))
        .bind(&next.last_error)
        .bind(&next.external_post_id)
        .bind(&next.external_url)
        .bind(to_millis(next.updated_at))
        .bind(metadata)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 1 {
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }

    async fn flush(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}
