//! schedcast-queue - Manage scheduled posts
//!
//! Unix-style tool for inspecting and editing the post queue.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use libschedcast::types::{self, Metadata, Post, PostStatus};
use libschedcast::{Config, Manager, QueueStats, ScheduleRequest, ScheduleTime, SchedcastError};

#[derive(Parser, Debug)]
#[command(name = "schedcast-queue")]
#[command(version)]
#[command(about = "Manage scheduled posts")]
#[command(long_about = "\
schedcast-queue - Manage scheduled posts

DESCRIPTION:
    schedcast-queue is a Unix-style tool for managing the schedcast queue.
    Use it to schedule, list, cancel, or reschedule posts and to view
    statistics. Delivery itself is done by schedcast-send.

COMMANDS:
    schedule    Queue a post for a platform
    list        List posts
    show        Show one post in full
    cancel      Cancel a draft or scheduled post
    reschedule  Move a post to a different time
    stats       Show statistics about the queue

USAGE EXAMPLES:
    # Schedule a post for tomorrow morning
    schedcast-queue schedule twitter /media/cat.png --caption \"hello\" --at \"tomorrow 9am\"

    # Schedule at a random point 10 minutes to 2 hours after the last queued post
    schedcast-queue schedule instagram /media/a.jpg --at random:10m-2h

    # List scheduled posts in JSON format
    schedcast-queue list --status scheduled --format json

    # Reschedule a post
    schedcast-queue reschedule <POST_ID> 2h

CONFIGURATION:
    Configuration file: ~/.config/schedcast/config.toml
    Database location: ~/.local/share/schedcast/posts.db

    Override with environment variables:
        SCHEDCAST_CONFIG    - Path to config file
        SCHEDCAST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed (post not found, already delivered, ...)
    2 - Database or configuration error
    3 - Invalid input (unknown platform, bad time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a post
    Schedule {
        /// Target platform
        platform: String,

        /// Path or URL of the content to deliver
        content_ref: String,

        /// Caption text
        #[arg(short, long, default_value = "")]
        caption: String,

        /// When to post (e.g., "2026-03-01 09:00", "30m", "tomorrow 3pm", "random:10m-2h")
        #[arg(short, long)]
        at: Option<String>,

        /// Platform option passed to the publisher, as key=value (repeatable)
        #[arg(short, long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Save as a draft instead of queueing
        #[arg(long)]
        draft: bool,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List posts
    List {
        /// Filter by platform
        #[arg(short, long)]
        platform: Option<String>,

        /// Filter by status (draft, scheduled, posting, posted, failed, cancelled)
        #[arg(short, long)]
        status: Option<PostStatus>,

        /// Maximum number of posts (0 for all)
        #[arg(short = 'n', long, default_value = "0")]
        limit: usize,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one post
    Show {
        post_id: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Cancel a draft or scheduled post
    Cancel {
        /// Post IDs to cancel
        #[arg(required = true)]
        post_ids: Vec<String>,
    },

    /// Reschedule a post
    Reschedule {
        /// Post ID to reschedule
        post_id: String,

        /// New schedule time; defaults to the configured delay from now
        time: Option<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show queue statistics
    Stats {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "error" };
    libschedcast::logging::LoggingConfig::new(Default::default(), level.to_string(), false).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<SchedcastError>()
        .map_or(1, SchedcastError::exit_code)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_or_default().context("Failed to load configuration")?;
    let manager = Manager::from_config(&config)
        .await
        .context("Failed to open the post queue")?;

    match cli.command {
        Commands::Schedule {
            platform,
            content_ref,
            caption,
            at,
            options,
            draft,
            format,
        } => {
            let mut request = ScheduleRequest::new(platform, content_ref, caption)
                .with_metadata(parse_options(&options)?);
            request.scheduled_time = at.map(ScheduleTime::from);

            let post = if draft {
                manager.create_draft(request).await?
            } else {
                manager.schedule(request).await?
            };
            output_post(&post, format)?;
        }
        Commands::List {
            platform,
            status,
            limit,
            format,
        } => {
            let posts = manager.list(platform.as_deref(), status, limit).await?;
            output_list(&posts, format)?;
        }
        Commands::Show { post_id, format } => {
            let post = manager.get(&post_id).await?;
            output_post(&post, format)?;
        }
        Commands::Cancel { post_ids } => cmd_cancel(&manager, &post_ids).await?,
        Commands::Reschedule {
            post_id,
            time,
            format,
        } => {
            let post = manager
                .reschedule(&post_id, time.map(ScheduleTime::from))
                .await?;
            if post.id != post_id {
                let original = manager.get(&post_id).await?;
                eprintln!("Post {} is {}; queued a new copy", post_id, original.status);
            }
            output_post(&post, format)?;
        }
        Commands::Stats { format } => {
            let stats = manager.stats().await?;
            output_stats(&stats, format)?;
        }
    }

    Ok(())
}

/// Parse `key=value` pairs; values that are valid JSON keep their type.
fn parse_options(options: &[String]) -> Result<Metadata, SchedcastError> {
    let mut metadata = Metadata::new();
    for option in options {
        let (key, value) = option.split_once('=').ok_or_else(|| {
            SchedcastError::InvalidInput(format!("Option '{}' must be KEY=VALUE", option))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(SchedcastError::InvalidInput(format!(
                "Option '{}' has an empty key",
                option
            )));
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

/// Cancel each post, reporting the ones that could not be cancelled.
async fn cmd_cancel(manager: &Manager, post_ids: &[String]) -> anyhow::Result<()> {
    let mut first_error = None;
    for id in post_ids {
        match manager.try_cancel(id).await {
            Ok(post) => println!("Cancelled {}", post.id),
            Err(e) => {
                eprintln!("Could not cancel {}: {}", id, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn output_post(post: &Post, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(post)?),
        OutputFormat::Text => {
            println!("ID:          {}", post.id);
            println!("Platform:    {}", post.platform);
            println!("Status:      {}", post.status);
            println!(
                "Scheduled:   {} ({})",
                post.scheduled_time.to_rfc3339(),
                format_time_until(types::now(), post.scheduled_time)
            );
            println!("Content:     {}", post.content_ref);
            println!("Caption:     {}", post.caption);
            println!("Attempts:    {}", post.attempt_count);
            if let Some(error) = &post.last_error {
                println!("Last error:  {}", error);
            }
            if let Some(external_id) = &post.external_post_id {
                println!("External ID: {}", external_id);
            }
            if let Some(url) = &post.external_url {
                println!("URL:         {}", url);
            }
            if !post.metadata.is_empty() {
                println!("Options:     {}", serde_json::Value::Object(post.metadata.clone()));
            }
        }
    }
    Ok(())
}

fn output_list(posts: &[Post], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(posts)?),
        OutputFormat::Text => {
            let now = types::now();
            for post in posts {
                println!(
                    "{} | {} | {} | {} | {}",
                    post.id,
                    post.platform,
                    post.status,
                    format_time_until(now, post.scheduled_time),
                    truncate_content(&post.caption, 50)
                );
            }
        }
    }
    Ok(())
}

fn output_stats(stats: &QueueStats, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
        OutputFormat::Text => {
            println!("Total posts: {}", stats.total);
            if !stats.by_status.is_empty() {
                println!("\nBy status:");
                for (status, count) in &stats.by_status {
                    println!("  {:<10} {}", status.to_string(), count);
                }
            }
            if !stats.by_platform.is_empty() {
                println!("\nBy platform:");
                for (platform, count) in &stats.by_platform {
                    println!("  {:<10} {}", platform, count);
                }
            }
            if let Some(next) = stats.next_due {
                println!(
                    "\nNext due: {} ({})",
                    next.to_rfc3339(),
                    format_time_until(types::now(), next)
                );
            }
        }
    }
    Ok(())
}

/// Truncate content to max length with ellipsis
fn truncate_content(content: &str, max_len: usize) -> String {
    match content.char_indices().nth(max_len) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: DateTime<Utc>, scheduled: DateTime<Utc>) -> String {
    let diff = (scheduled - now).num_seconds();

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
