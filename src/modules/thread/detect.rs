// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::message::entity::Message;
use crate::modules::message::reference::Reference;
use crate::modules::thread::entity::Thread;
use crate::raise_error;
use native_db::transaction::RwTransaction;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static REPLY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^((re|fw|fwd|aw|wg|undeliverable|undelivered):\s*)+")
        .expect("valid reply prefix pattern")
});

/// Strips leading reply and forward markers such as `Re: Fwd: `.
pub fn clean_subject(subject: &str) -> String {
    REPLY_PREFIX.replace(subject, "").into_owned()
}

/// Finds or builds the thread `message` belongs to and recomputes it with
/// `message` as a member. The returned thread is not saved.
///
/// A provider thread id wins over reference matching. Writers to the same
/// thread must be serialized by the caller.
pub fn detect_thread(rw: &RwTransaction, message: &Message) -> MailSyncResult<Thread> {
    let mut thread = match &message.gmail_thread_id {
        Some(remote_id) => Thread::find_by_remote_id(rw, remote_id)?
            .unwrap_or_else(|| Thread::empty(message.account_id, Some(remote_id.clone()))),
        None => find_or_build_by_references(rw, message)?,
    };

    thread.account_id = message.account_id;
    if thread.id.is_empty() {
        thread.id = Thread::thread_id_for(&message.id);
        debug!(
            "Account {}: starting thread {} for message {}",
            message.account_id, thread.id, message.id
        );
    }
    thread.subject = clean_subject(message.subject.as_deref().unwrap_or_default());
    thread.recompute_in(rw, Some(message))?;
    Ok(thread)
}

fn find_or_build_by_references(rw: &RwTransaction, message: &Message) -> MailSyncResult<Thread> {
    let ids = message.thread_reference_ids();
    let Some(reference) = Reference::find_any(rw, &ids)? else {
        return Ok(Thread::empty(message.account_id, None));
    };
    Thread::get_in(rw, &reference.thread_id)?.ok_or_else(|| {
        raise_error!(
            format!(
                "Reference '{}' points at missing thread '{}'",
                reference.rfc2822_message_id, reference.thread_id
            ),
            ErrorCode::IntegrityViolation
        )
    })
}
