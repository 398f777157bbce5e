// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::logger::LocalTimer;
use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

pub static LOG_WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn setup_file_logger(level: Level) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let with_ansi = SETTINGS.mailsync_ansi_logs;

    let (sync_nonb, sync_guard) = sync_log_writer();
    // Dropping the guard would stop the background writer.
    let _ = LOG_WORKER_GUARD.set(sync_guard);

    let registry = tracing_subscriber::registry().with(LevelFilter::from_level(level));

    if SETTINGS.mailsync_json_logs {
        let layer = fmt::layer()
            .json()
            .with_timer(LocalTimer)
            .with_writer(sync_nonb);
        return tracing::subscriber::set_global_default(registry.with(layer));
    }

    let layer = fmt::layer()
        .with_timer(LocalTimer)
        .with_ansi(with_ansi)
        .with_level(true)
        .with_writer(sync_nonb)
        .with_target(true);

    tracing::subscriber::set_global_default(registry.with(layer))
}

fn sync_log_writer() -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("mailsync")
        .max_log_files(SETTINGS.mailsync_max_server_log_files)
        .build(DATA_DIR_MANAGER.log_dir.clone());
    match appender {
        Ok(rolling) => tracing_appender::non_blocking(rolling),
        Err(e) => {
            eprintln!("Failed to initialize rolling file appender: {}", e);
            tracing_appender::non_blocking(std::io::stderr())
        }
    }
}
