// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::entity::Account;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::imap::capabilities::Capability;
use crate::modules::imap::connection::{
    BoxStatus, Connector, FetchedMessage, IdleEvent, MailConnection, RemoteBox, UidAttributes,
};
use crate::modules::imap::flags::MessageFlag;
use crate::raise_error;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone, Debug, Default)]
pub struct MockMessage {
    pub flags: Vec<MessageFlag>,
    pub modseq: u64,
    pub raw: Vec<u8>,
    pub labels: Option<Vec<String>>,
    pub thread_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MockMailbox {
    pub uid_validity: u32,
    pub uid_next: u32,
    pub highest_modseq: u64,
    pub messages: BTreeMap<u32, MockMessage>,
}

impl MockMailbox {
    pub fn new(uid_validity: u32) -> Self {
        Self {
            uid_validity,
            uid_next: 1,
            highest_modseq: 1,
            messages: BTreeMap::new(),
        }
    }

    /// Appends a message under the next UID and returns that UID.
    pub fn append(&mut self, raw: Vec<u8>, flags: Vec<MessageFlag>) -> u32 {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.highest_modseq += 1;
        self.messages.insert(
            uid,
            MockMessage {
                flags,
                modseq: self.highest_modseq,
                raw,
                ..Default::default()
            },
        );
        uid
    }

    pub fn set_flags(&mut self, uid: u32, flags: Vec<MessageFlag>) {
        self.highest_modseq += 1;
        if let Some(message) = self.messages.get_mut(&uid) {
            message.flags = flags;
            message.modseq = self.highest_modseq;
        }
    }

    pub fn remove(&mut self, uid: u32) {
        self.highest_modseq += 1;
        self.messages.remove(&uid);
    }
}

/// Server state shared by every connection a [`MockConnector`] hands out.
#[derive(Debug, Default)]
pub struct MockServer {
    pub boxes: Vec<RemoteBox>,
    pub mailboxes: HashMap<String, MockMailbox>,
    pub capabilities: HashSet<Capability>,
    pub fail_connect: bool,
    pub idle_events: VecDeque<IdleEvent>,
    /// Every mutating command in the order it was received
    pub commands: Vec<String>,
    pub connects: usize,
    pub fetch_delay: Option<Duration>,
}

impl MockServer {
    pub fn with_boxes(paths: &[(&str, &[&str])]) -> Self {
        let mut server = MockServer::default();
        for (path, attributes) in paths {
            server.boxes.push(RemoteBox {
                name: path.to_string(),
                delimiter: Some("/".into()),
                attributes: Some(attributes.iter().map(|a| a.to_string()).collect()),
                children: Vec::new(),
            });
            server
                .mailboxes
                .insert(path.to_string(), MockMailbox::new(1));
        }
        server
    }

    pub fn mailbox(&mut self, name: &str) -> &mut MockMailbox {
        self.mailboxes
            .entry(name.to_string())
            .or_insert_with(|| MockMailbox::new(1))
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    pub server: Arc<Mutex<MockServer>>,
}

impl MockConnector {
    pub fn new(server: MockServer) -> Self {
        Self {
            server: Arc::new(Mutex::new(server)),
        }
    }

    pub fn server(&self) -> MutexGuard<'_, MockServer> {
        self.server.lock().unwrap()
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn create(&self, _account: &Account) -> Self::Connection {
        MockConnection {
            server: self.server.clone(),
            connected: false,
            opened: None,
            capabilities: HashSet::new(),
        }
    }
}

pub struct MockConnection {
    server: Arc<Mutex<MockServer>>,
    connected: bool,
    opened: Option<String>,
    capabilities: HashSet<Capability>,
}

/// Parses a sequence set into the UIDs it covers. `*` resolves to `max`.
fn expand_uid_range(range: &str, max: u32) -> Vec<u32> {
    let mut uids = Vec::new();
    for part in range.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let parse = |s: &str| -> Option<u32> {
            if s == "*" {
                Some(max)
            } else {
                s.parse().ok()
            }
        };
        match part.split_once(':') {
            Some((a, b)) => {
                if let (Some(a), Some(b)) = (parse(a), parse(b)) {
                    let (low, high) = if a <= b { (a, b) } else { (b, a) };
                    uids.extend(low..=high);
                }
            }
            None => {
                if let Some(uid) = parse(part) {
                    uids.push(uid);
                }
            }
        }
    }
    uids.sort_unstable();
    uids.dedup();
    uids
}

impl MockConnection {
    fn check_connected(&self) -> MailSyncResult<()> {
        if !self.connected {
            return Err(raise_error!(
                "IMAP connection is not established".into(),
                ErrorCode::NetworkError
            ));
        }
        Ok(())
    }

    fn with_opened<R>(
        &self,
        work: impl FnOnce(&mut MockMailbox, &mut Vec<String>) -> R,
    ) -> MailSyncResult<R> {
        self.check_connected()?;
        let name = self.opened.clone().ok_or_else(|| {
            raise_error!("No mailbox selected".into(), ErrorCode::ImapCommandFailed)
        })?;
        let mut server = self.server.lock().unwrap();
        let MockServer {
            mailboxes,
            commands,
            ..
        } = &mut *server;
        let mailbox = mailboxes.get_mut(&name).ok_or_else(|| {
            raise_error!(
                format!("Mailbox '{}' does not exist", name),
                ErrorCode::ImapCommandFailed
            )
        })?;
        Ok(work(mailbox, commands))
    }

    async fn delay(&self) {
        let delay = self.server.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl MailConnection for MockConnection {
    async fn connect(&mut self) -> MailSyncResult<()> {
        let mut server = self.server.lock().unwrap();
        if server.fail_connect {
            return Err(raise_error!(
                "connection refused".into(),
                ErrorCode::NetworkError
            ));
        }
        if !self.connected {
            server.connects += 1;
        }
        self.capabilities = server.capabilities.clone();
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn get_boxes(&mut self) -> MailSyncResult<Vec<RemoteBox>> {
        self.check_connected()?;
        Ok(self.server.lock().unwrap().boxes.clone())
    }

    async fn open_box(&mut self, name: &str, read_only: bool) -> MailSyncResult<BoxStatus> {
        self.check_connected()?;
        let mut server = self.server.lock().unwrap();
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        server.commands.push(format!("{} {}", verb, name));
        let mailbox = server.mailboxes.get(name).ok_or_else(|| {
            raise_error!(
                format!("Mailbox '{}' does not exist", name),
                ErrorCode::ImapCommandFailed
            )
        })?;
        let status = BoxStatus {
            uid_validity: Some(mailbox.uid_validity),
            uid_next: Some(mailbox.uid_next),
            highest_modseq: self
                .capabilities
                .contains(&Capability::Condstore)
                .then_some(mailbox.highest_modseq),
            exists: mailbox.messages.len() as u32,
        };
        drop(server);
        self.opened = Some(name.to_string());
        Ok(status)
    }

    async fn fetch_uid_attributes(
        &mut self,
        range: &str,
        changed_since: Option<u64>,
    ) -> MailSyncResult<Vec<UidAttributes>> {
        self.delay().await;
        let condstore = self.capabilities.contains(&Capability::Condstore);
        self.with_opened(|mailbox, _| {
            let max = mailbox.messages.keys().last().copied().unwrap_or(0);
            expand_uid_range(range, max)
                .into_iter()
                .filter_map(|uid| mailbox.messages.get(&uid).map(|m| (uid, m)))
                .filter(|(_, m)| match (changed_since, condstore) {
                    (Some(since), true) => m.modseq > since,
                    _ => true,
                })
                .map(|(uid, m)| UidAttributes {
                    uid,
                    flags: m.flags.clone(),
                    modseq: condstore.then_some(m.modseq),
                    gmail_labels: m.labels.clone(),
                })
                .collect()
        })
    }

    async fn fetch_messages(&mut self, range: &str) -> MailSyncResult<Vec<FetchedMessage>> {
        self.delay().await;
        self.with_opened(|mailbox, _| {
            let max = mailbox.messages.keys().last().copied().unwrap_or(0);
            expand_uid_range(range, max)
                .into_iter()
                .filter_map(|uid| mailbox.messages.get(&uid).map(|m| (uid, m)))
                .map(|(uid, m)| FetchedMessage {
                    uid,
                    flags: m.flags.clone(),
                    internal_date: None,
                    raw: m.raw.clone(),
                    gmail_labels: m.labels.clone(),
                    gmail_thread_id: m.thread_id.clone(),
                    gmail_message_id: None,
                })
                .collect()
        })
    }

    async fn add_flags(&mut self, uids: &[u32], flags: &[MessageFlag]) -> MailSyncResult<()> {
        self.with_opened(|mailbox, commands| {
            commands.push(format!(
                "+FLAGS {:?} {}",
                uids,
                MessageFlag::to_store_list(flags)
            ));
            for uid in uids {
                if let Some(message) = mailbox.messages.get_mut(uid) {
                    for flag in flags {
                        if !message.flags.contains(flag) {
                            message.flags.push(flag.clone());
                        }
                    }
                }
            }
        })
    }

    async fn del_flags(&mut self, uids: &[u32], flags: &[MessageFlag]) -> MailSyncResult<()> {
        self.with_opened(|mailbox, commands| {
            commands.push(format!(
                "-FLAGS {:?} {}",
                uids,
                MessageFlag::to_store_list(flags)
            ));
            for uid in uids {
                if let Some(message) = mailbox.messages.get_mut(uid) {
                    message.flags.retain(|f| !flags.contains(f));
                }
            }
        })
    }

    async fn set_labels(&mut self, uids: &[u32], labels: &[String]) -> MailSyncResult<()> {
        self.with_opened(|_, commands| {
            commands.push(format!("+X-GM-LABELS {:?} {:?}", uids, labels));
        })
    }

    async fn remove_labels(&mut self, uids: &[u32], labels: &[String]) -> MailSyncResult<()> {
        self.with_opened(|_, commands| {
            commands.push(format!("-X-GM-LABELS {:?} {:?}", uids, labels));
        })
    }

    async fn move_from_box(&mut self, uids: &[u32], destination: &str) -> MailSyncResult<()> {
        let moved = self.with_opened(|mailbox, commands| {
            commands.push(format!("MOVE {:?} {}", uids, destination));
            uids.iter()
                .filter_map(|uid| mailbox.messages.remove(uid))
                .collect::<Vec<_>>()
        })?;
        let mut server = self.server.lock().unwrap();
        let target = server.mailbox(destination);
        for message in moved {
            target.append(message.raw, message.flags);
        }
        Ok(())
    }

    async fn rename_box(&mut self, from: &str, to: &str) -> MailSyncResult<()> {
        self.check_connected()?;
        let mut server = self.server.lock().unwrap();
        server.commands.push(format!("RENAME {} {}", from, to));
        if let Some(mailbox) = server.mailboxes.remove(from) {
            server.mailboxes.insert(to.to_string(), mailbox);
        }
        for remote in server.boxes.iter_mut() {
            if remote.name == from {
                remote.name = to.to_string();
            }
        }
        Ok(())
    }

    fn server_supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    async fn idle(&mut self, timeout: Duration, wake: &Notify) -> MailSyncResult<IdleEvent> {
        self.check_connected()?;
        let queued = self.server.lock().unwrap().idle_events.pop_front();
        if let Some(event) = queued {
            return Ok(event);
        }
        tokio::select! {
            _ = tokio::time::sleep(timeout) => Ok(IdleEvent::Timeout),
            _ = wake.notified() => Ok(IdleEvent::Interrupted),
        }
    }

    async fn end(&mut self) {
        self.connected = false;
        self.opened = None;
    }
}

/// Builds a minimal RFC 5322 message.
pub fn raw_message(
    message_id: &str,
    subject: &str,
    from: &str,
    to: &[&str],
    references: &[&str],
    body: &str,
) -> Vec<u8> {
    let mut raw = String::new();
    raw.push_str(&format!("Message-ID: <{}>\r\n", message_id));
    raw.push_str(&format!("Subject: {}\r\n", subject));
    raw.push_str(&format!("From: {}\r\n", from));
    if !to.is_empty() {
        raw.push_str(&format!("To: {}\r\n", to.join(", ")));
    }
    raw.push_str("Date: Tue, 1 Jul 2025 10:52:37 +0200\r\n");
    if !references.is_empty() {
        let refs = references
            .iter()
            .map(|r| format!("<{}>", r))
            .collect::<Vec<_>>()
            .join(" ");
        raw.push_str(&format!("References: {}\r\n", refs));
        raw.push_str(&format!(
            "In-Reply-To: <{}>\r\n",
            references.last().copied().unwrap_or_default()
        ));
    }
    raw.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
    raw.push_str(body);
    raw.push_str("\r\n");
    raw.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_uid_range() {
        assert_eq!(expand_uid_range("1:3,5", 10), vec![1, 2, 3, 5]);
        assert_eq!(expand_uid_range("8:*", 10), vec![8, 9, 10]);
    }
}
