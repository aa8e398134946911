//! Integration tests for schedcast-send daemon

use assert_cmd::Command;
use chrono::Duration;
use libschedcast::store::{PostStore, SqliteStore};
use libschedcast::types::{self, Metadata, Post, PostStatus};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Setup test environment with config and database
async fn setup_test_env(max_attempts: u32) -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[scheduling]
tick_interval_ms = 100
max_attempts = {}
retry_delay_secs = 0

[platforms.twitter]
calls_per_hour = 3600

[platforms.tiktok]
enabled = false
"#,
        db_path.display().to_string().replace('\\', "/"),
        max_attempts
    );
    fs::write(&config_path, config_content).unwrap();

    // Initialize database
    let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();
    store.close().await;

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

async fn create_post(db_path: &str, platform: &str, offset: Duration) -> String {
    let store = SqliteStore::new(db_path).await.unwrap();
    let post = Post::new(
        platform,
        "/media/test.png",
        "Test scheduled post",
        types::now() + offset,
        Metadata::new(),
    );
    let id = store.create(&post).await.unwrap();
    store.close().await;
    id
}

async fn load_post(db_path: &str, id: &str) -> Post {
    let store = SqliteStore::new(db_path).await.unwrap();
    let post = store.get(id).await.unwrap().expect("post exists");
    store.close().await;
    post
}

#[test]
fn test_help_flag() {
    Command::cargo_bin("schedcast-send")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Background daemon"))
        .stdout(predicate::str::contains("--tick-interval"))
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("--log-level"));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("schedcast-send")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("schedcast-send"));
}

#[tokio::test]
async fn test_once_delivers_due_post() {
    let (_temp_dir, config_path, db_path) = setup_test_env(3).await;
    let due = create_post(&db_path, "twitter", Duration::seconds(-10)).await;
    let future = create_post(&db_path, "twitter", Duration::hours(1)).await;

    Command::cargo_bin("schedcast-send")
        .unwrap()
        .env("SCHEDCAST_CONFIG", &config_path)
        .env_remove("RUST_LOG")
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("Using mock publisher"))
        .stderr(predicate::str::contains("twitter"));

    let delivered = load_post(&db_path, &due).await;
    assert_eq!(delivered.status, PostStatus::Posted);
    assert!(delivered
        .external_post_id
        .as_deref()
        .unwrap()
        .starts_with("twitter-mock-"));

    assert_eq!(load_post(&db_path, &future).await.status, PostStatus::Scheduled);
}

#[tokio::test]
async fn test_once_fails_posts_for_disabled_platform() {
    let (_temp_dir, config_path, db_path) = setup_test_env(3).await;
    let id = create_post(&db_path, "tiktok", Duration::seconds(-10)).await;

    Command::cargo_bin("schedcast-send")
        .unwrap()
        .env("SCHEDCAST_CONFIG", &config_path)
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("Delivery failure notification"));

    let post = load_post(&db_path, &id).await;
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(post.attempt_count, 0);
    assert!(post.last_error.unwrap().contains("tiktok"));
}

#[tokio::test]
async fn test_db_path_override() {
    let (temp_dir, config_path, _) = setup_test_env(3).await;
    let other_db = temp_dir.path().join("other.db");
    let other_db = other_db.to_str().unwrap().to_string();
    let id = create_post(&other_db, "twitter", Duration::seconds(-10)).await;

    Command::cargo_bin("schedcast-send")
        .unwrap()
        .env("SCHEDCAST_CONFIG", &config_path)
        .env("SCHEDCAST_DB_PATH", &other_db)
        .arg("--once")
        .assert()
        .success();

    assert_eq!(load_post(&other_db, &id).await.status, PostStatus::Posted);
}

#[test]
fn test_invalid_config_exits_with_code_2() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[scheduling]\nworkers = 0\n").unwrap();

    Command::cargo_bin("schedcast-send")
        .unwrap()
        .env("SCHEDCAST_CONFIG", &config_path)
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("scheduling.workers"));
}

#[test]
fn test_zero_tick_interval_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    Command::cargo_bin("schedcast-send")
        .unwrap()
        .env("SCHEDCAST_CONFIG", temp_dir.path().join("missing.toml"))
        .env("SCHEDCAST_DB_PATH", &db_path)
        .args(["--once", "--tick-interval", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tick-interval"));
}

#[tokio::test]
async fn test_log_level_from_env() {
    let (_temp_dir, config_path, db_path) = setup_test_env(3).await;
    create_post(&db_path, "twitter", Duration::seconds(-10)).await;

    Command::cargo_bin("schedcast-send")
        .unwrap()
        .env("SCHEDCAST_CONFIG", &config_path)
        .env("SCHEDCAST_LOG_LEVEL", "warn")
        .env_remove("RUST_LOG")
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("Using mock publisher"))
        .stderr(predicate::str::contains("schedcast-send starting").not());

    create_post(&db_path, "twitter", Duration::seconds(-10)).await;
    Command::cargo_bin("schedcast-send")
        .unwrap()
        .env("SCHEDCAST_CONFIG", &config_path)
        .env("SCHEDCAST_LOG_LEVEL", "debug")
        .env_remove("RUST_LOG")
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("Authenticated publisher"));
}

#[test]
fn test_invalid_log_format() {
    Command::cargo_bin("schedcast-send")
        .unwrap()
        .args(["--once", "--log-format", "xml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid log format"));
}
