//! `TaskPing` -- deadline reminder bot.
//!
//! Runs two independent loops against the same `SQLite` database: the
//! Telegram message handler (commands and the event-authoring dialog) and
//! the reminder scheduler. Each loop owns its own connection.
//!
//! # Usage
//!
//! ```bash
//! TASKPING_TOKEN=123:abc cargo run --bin taskping -- --admins alice,bob_the_org
//!
//! # With a config file and a log file
//! cargo run --bin taskping -- --config ./taskping.toml --log-file ./taskping.log
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use taskping_bot::bot::Bot;
use taskping_bot::config::{BotCliArgs, BotConfig};
use taskping_bot::conversation::Conversation;
use taskping_bot::reminders::{NotificationDispatcher, ReminderScheduler};
use taskping_bot::store::sqlite::{SqliteConnector, SqliteStore};
use taskping_bot::transport::telegram::TelegramTransport;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = BotCliArgs::parse();

    let config = match BotConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Held until exit so buffered file logs are flushed.
    let _guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(
        admins = config.admins.len(),
        database = %config.database_path.display(),
        interval_secs = config.tick_interval.as_secs(),
        "starting taskping"
    );

    let store = match SqliteStore::open(&config.database_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let transport = match TelegramTransport::new(
        config.api_base.clone(),
        config.token.clone(),
        config.poll_timeout_secs,
    ) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!(error = %e, "failed to create telegram client");
            std::process::exit(1);
        }
    };

    let scheduler = ReminderScheduler::new(
        SqliteConnector::new(config.database_path.clone()),
        NotificationDispatcher::new(Arc::clone(&transport), config.delivery_timeout),
        config.tick_interval,
    );
    let scheduler_handle = tokio::spawn(scheduler.run());

    let conversation = Conversation::new(config.session_idle, config.accepted_extensions.clone());
    let bot = Arc::new(
        Bot::new(store, transport, conversation, config.admins.clone())
            .with_reply_timeout(config.delivery_timeout),
    );

    tokio::select! {
        () = bot.run() => {
            tracing::warn!("message loop ended");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        }
    }
    scheduler_handle.abort();
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// Returns a [`WorkerGuard`] for file output that must be held until
/// shutdown.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_path, file_name)) = file_path.and_then(|p| Some((p, p.file_name()?))) else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
