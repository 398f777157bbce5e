// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use clap::{builder::ValueParser, Parser};
use std::{path::PathBuf, sync::LazyLock};

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::new_for_test);

#[derive(Debug, Parser)]
#[clap(
    name = "mailsync",
    about = "Keeps local per-account mail stores in sync with remote IMAP mailboxes.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    /// mailsync log level (default: "info")
    #[clap(
        long,
        default_value = "info",
        env,
        help = "Set the log level for mailsync"
    )]
    pub mailsync_log_level: String,

    /// Enable ANSI logs (default: true)
    #[clap(long, default_value = "true", env, help = "Enable ANSI formatted logs")]
    pub mailsync_ansi_logs: bool,

    /// Enable log file output (default: false)
    /// If false, logs will be printed to stdout
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable log file output (otherwise logs go to stdout)"
    )]
    pub mailsync_log_to_file: bool,

    /// Enable JSON logs (default: false)
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable JSON formatted logs"
    )]
    pub mailsync_json_logs: bool,

    /// Maximum number of log files (default: 5)
    #[clap(
        long,
        default_value = "5",
        env,
        help = "Set the maximum number of server log files"
    )]
    pub mailsync_max_server_log_files: usize,

    /// mailsync encryption password
    #[clap(
        long,
        default_value = "change-this-default-password-now",
        env,
        help = "Set the encryption password for stored credentials. ⚠️ Change this default in production!"
    )]
    pub mailsync_encrypt_password: String,

    #[clap(
        long,
        env,
        help = "Set the root directory for mailsync data",
        value_parser = ValueParser::new(|s: &str| {
            let path = PathBuf::from(s);
            if !path.is_absolute() {
                return Err("Path must be an absolute directory path".to_string());
            }
            if !path.exists() {
                return Err(format!("Path {:?} does not exist", path));
            }
            if !path.is_dir() {
                return Err(format!("Path {:?} is not a directory", path));
            }
            Ok(s.to_string())
        })
    )]
    pub mailsync_root_dir: String,

    #[clap(
        long,
        env,
        default_value = "67108864",
        help = "Set the cache size for the shared account directory database in bytes"
    )]
    pub mailsync_metadata_cache_size: Option<usize>,

    #[clap(
        long,
        env,
        default_value = "134217728",
        help = "Set the cache size for each per-account database in bytes"
    )]
    pub mailsync_account_store_cache_size: Option<usize>,

    /// Keep every store in memory. Nothing survives a restart; meant for trials.
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Keep all databases in memory instead of on disk"
    )]
    pub mailsync_memory_mode_enabled: bool,

    #[clap(
        long,
        default_value = "500",
        env,
        help = "Number of queued messages at which the processor reports itself full",
        value_parser = clap::value_parser!(usize)
    )]
    pub mailsync_processor_max_queue_length: usize,

    #[clap(
        long,
        default_value = "1",
        env,
        help = "Number of messages processed between throttling pauses",
        value_parser = clap::value_parser!(usize)
    )]
    pub mailsync_processor_chunk_size: usize,

    #[clap(
        long,
        default_value = "0.5",
        env,
        help = "Maximum CPU fraction the message processor may use on AC power"
    )]
    pub mailsync_max_cpu_on_ac: f64,

    #[clap(
        long,
        default_value = "0.05",
        env,
        help = "Maximum CPU fraction the message processor may use on battery power"
    )]
    pub mailsync_max_cpu_on_battery: f64,

    /// Write raw payloads of messages that fail to parse under `<root>/parse-errors`.
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Dump messages that fail to parse to the diagnostics directory"
    )]
    pub mailsync_debug_parse_errors: bool,

    #[clap(
        long,
        default_value = "1740",
        env,
        help = "Maximum seconds to stay in a single IMAP IDLE before re-issuing it",
        value_parser = clap::value_parser!(u64).range(30..)
    )]
    pub mailsync_idle_timeout_secs: u64,

    /// Base URL of the open/link tracking service. Tracking artifacts pointing
    /// at it are removed from messages sent by the account owner.
    #[clap(
        long,
        env,
        help = "Base URL of the tracking service whose pixels and redirects are stripped from own messages"
    )]
    pub mailsync_tracking_base_url: Option<String>,
}

impl Settings {
    #[cfg(test)]
    fn new_for_test() -> Self {
        Self {
            mailsync_log_level: "info".to_string(),
            mailsync_ansi_logs: false,
            mailsync_log_to_file: false,
            mailsync_json_logs: false,
            mailsync_max_server_log_files: 5,
            mailsync_encrypt_password: "change-this-default-password-now".into(),
            mailsync_root_dir: std::env::temp_dir()
                .join("mailsync_test_data")
                .to_string_lossy()
                .into_owned(),
            mailsync_metadata_cache_size: None,
            mailsync_account_store_cache_size: None,
            mailsync_memory_mode_enabled: true,
            mailsync_processor_max_queue_length: 500,
            mailsync_processor_chunk_size: 1,
            mailsync_max_cpu_on_ac: 0.5,
            mailsync_max_cpu_on_battery: 0.05,
            mailsync_debug_parse_errors: false,
            mailsync_idle_timeout_secs: 1740,
            mailsync_tracking_base_url: Some("https://track.mailsync.test".into()),
        }
    }
}
