// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::imap::session::SessionStream;
use crate::{modules::error::MailSyncResult, raise_error};
use async_imap::{types::Capabilities, Session};
use std::collections::HashSet;

/// Server extensions the sync tasks branch on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Capability {
    /// RFC 7162 change tracking
    Condstore,
    Idle,
    /// X-GM-EXT-1
    GmailExtensions,
    Move,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Condstore => "CONDSTORE",
            Capability::Idle => "IDLE",
            Capability::GmailExtensions => "X-GM-EXT-1",
            Capability::Move => "MOVE",
        }
    }
}

pub async fn fetch_capabilities(
    session: &mut Session<Box<dyn SessionStream>>,
) -> MailSyncResult<Capabilities> {
    session
        .capabilities()
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))
}

pub fn check_capabilities(capabilities: &Capabilities) -> MailSyncResult<()> {
    if !capabilities.has_str("IMAP4rev1") {
        return Err(raise_error!(
            "Server does not support IMAP4rev1".into(),
            ErrorCode::ImapUnexpectedResult
        ));
    }
    Ok(())
}

/// The subset of `capabilities` this engine knows how to use.
pub fn supported_set(capabilities: &Capabilities) -> HashSet<Capability> {
    [
        Capability::Condstore,
        Capability::Idle,
        Capability::GmailExtensions,
        Capability::Move,
    ]
    .into_iter()
    .filter(|c| capabilities.has_str(c.as_str()))
    .collect()
}
