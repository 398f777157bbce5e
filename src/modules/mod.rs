// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod account;
pub mod category;
pub mod common;
pub mod context;
pub mod database;
pub mod error;
pub mod imap;
pub mod logger;
pub mod message;
pub mod processor;
pub mod settings;
pub mod sync;
pub mod syncback;
pub mod thread;
pub mod utils;
