// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::entity::Account;
use crate::modules::error::MailSyncResult;
use crate::modules::imap::capabilities::Capability;
use crate::modules::imap::flags::MessageFlag;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Notify;

/// One node of the remote mailbox hierarchy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteBox {
    /// Leaf name, already decoded from modified UTF-7
    pub name: String,
    pub delimiter: Option<String>,
    /// Raw attributes such as `\Sent` or `\HasChildren`. `None` for
    /// intermediate nodes the server never listed on their own.
    pub attributes: Option<Vec<String>>,
    pub children: Vec<RemoteBox>,
}

impl RemoteBox {
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes
            .iter()
            .flatten()
            .any(|a| a.eq_ignore_ascii_case(attribute))
    }
}

/// State reported by the server when a mailbox is opened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoxStatus {
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    pub highest_modseq: Option<u64>,
    pub exists: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UidAttributes {
    pub uid: u32,
    pub flags: Vec<MessageFlag>,
    pub modseq: Option<u64>,
    /// Present only on servers exposing X-GM-LABELS
    pub gmail_labels: Option<Vec<String>>,
}

/// A complete message as downloaded from the currently opened mailbox.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: Vec<MessageFlag>,
    /// Server arrival time (UNIX epoch milliseconds)
    pub internal_date: Option<i64>,
    pub raw: Vec<u8>,
    pub gmail_labels: Option<Vec<String>>,
    pub gmail_thread_id: Option<String>,
    pub gmail_message_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleEvent {
    /// The server announced new messages
    NewMail,
    /// Flags or membership changed
    Update,
    Timeout,
    /// Woken locally before the server said anything
    Interrupted,
}

/// Remote mailbox capability consumed by the sync tasks.
///
/// Mutations (`add_flags`, `move_from_box`, ...) apply to the mailbox most
/// recently opened with [`MailConnection::open_box`].
pub trait MailConnection: Send + Sync + 'static {
    fn connect(&mut self) -> impl Future<Output = MailSyncResult<()>> + Send;

    fn is_connected(&self) -> bool;

    fn get_boxes(&mut self) -> impl Future<Output = MailSyncResult<Vec<RemoteBox>>> + Send;

    fn open_box(
        &mut self,
        name: &str,
        read_only: bool,
    ) -> impl Future<Output = MailSyncResult<BoxStatus>> + Send;

    /// Fetches UID, flags and, when supported, modseq and labels for `range`.
    /// With `changed_since` only messages modified after that modseq are returned.
    fn fetch_uid_attributes(
        &mut self,
        range: &str,
        changed_since: Option<u64>,
    ) -> impl Future<Output = MailSyncResult<Vec<UidAttributes>>> + Send;

    fn fetch_messages(
        &mut self,
        range: &str,
    ) -> impl Future<Output = MailSyncResult<Vec<FetchedMessage>>> + Send;

    fn add_flags(
        &mut self,
        uids: &[u32],
        flags: &[MessageFlag],
    ) -> impl Future<Output = MailSyncResult<()>> + Send;

    fn del_flags(
        &mut self,
        uids: &[u32],
        flags: &[MessageFlag],
    ) -> impl Future<Output = MailSyncResult<()>> + Send;

    fn set_labels(
        &mut self,
        uids: &[u32],
        labels: &[String],
    ) -> impl Future<Output = MailSyncResult<()>> + Send;

    fn remove_labels(
        &mut self,
        uids: &[u32],
        labels: &[String],
    ) -> impl Future<Output = MailSyncResult<()>> + Send;

    fn move_from_box(
        &mut self,
        uids: &[u32],
        destination: &str,
    ) -> impl Future<Output = MailSyncResult<()>> + Send;

    fn rename_box(
        &mut self,
        from: &str,
        to: &str,
    ) -> impl Future<Output = MailSyncResult<()>> + Send;

    fn server_supports(&self, capability: Capability) -> bool;

    /// Waits for a push notification on the opened mailbox, at most `timeout`.
    /// A permit on `wake` ends the wait with [`IdleEvent::Interrupted`].
    fn idle(
        &mut self,
        timeout: Duration,
        wake: &Notify,
    ) -> impl Future<Output = MailSyncResult<IdleEvent>> + Send;

    fn end(&mut self) -> impl Future<Output = ()> + Send;
}

/// Builds connections for accounts.
pub trait Connector: Send + Sync + 'static {
    type Connection: MailConnection;

    fn create(&self, account: &Account) -> Self::Connection;
}

/// Compresses UIDs into an IMAP sequence set such as `1:3,5`.
pub fn compress_uid_list(nums: &[u32]) -> String {
    if nums.is_empty() {
        return String::new();
    }

    let mut sorted_nums = nums.to_vec();
    sorted_nums.sort_unstable();
    sorted_nums.dedup();

    let mut result = Vec::new();
    let mut current_range_start = sorted_nums[0];
    let mut current_range_end = sorted_nums[0];

    for &n in sorted_nums.iter().skip(1) {
        if n == current_range_end + 1 {
            current_range_end = n;
        } else {
            push_range(&mut result, current_range_start, current_range_end);
            current_range_start = n;
            current_range_end = n;
        }
    }
    push_range(&mut result, current_range_start, current_range_end);

    result.join(",")
}

fn push_range(result: &mut Vec<String>, start: u32, end: u32) {
    if start == end {
        result.push(start.to_string());
    } else {
        result.push(format!("{}:{}", start, end));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_uid_list() {
        assert_eq!(compress_uid_list(&[]), "");
        assert_eq!(compress_uid_list(&[5, 1, 2, 3, 3]), "1:3,5");
        assert_eq!(compress_uid_list(&[7]), "7");
    }
}
