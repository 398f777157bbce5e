// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod contact;
pub mod entity;
pub mod file;
pub mod parser;
pub mod reference;
pub mod tracking;
