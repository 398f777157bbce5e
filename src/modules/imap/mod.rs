// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod capabilities;
pub mod client;
pub mod connection;
pub mod flags;
#[cfg(test)]
pub mod mock;
pub mod remote;
pub mod session;
