// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod folders;
pub mod interruptible;
pub mod manager;
pub mod messages;
pub mod syncback;
pub mod worker;
