// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::entity::{Account, ImapConfig};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::{MailSyncError, MailSyncResult};
use crate::modules::imap::capabilities::{
    check_capabilities, fetch_capabilities, supported_set, Capability,
};
use crate::modules::imap::client::Client;
use crate::modules::imap::connection::{
    compress_uid_list, BoxStatus, Connector, FetchedMessage, IdleEvent, MailConnection, RemoteBox,
    UidAttributes,
};
use crate::modules::imap::flags::MessageFlag;
use crate::modules::imap::session::SessionStream;
use crate::modules::utils::net::TIMEOUT;
use crate::{decode_mailbox_name, decrypt, encode_mailbox_name, raise_error, run_with_timeout};
use async_imap::extensions::idle::IdleResponse;
use async_imap::types::{Fetch, Name, NameAttribute};
use async_imap::Session;
use futures::TryStreamExt;
use imap_proto::{MailboxDatum, Response};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);
const MESSAGE_QUERY: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[])";
const GMAIL_MESSAGE_QUERY: &str =
    "(UID FLAGS INTERNALDATE BODY.PEEK[] X-GM-LABELS X-GM-THRID X-GM-MSGID)";

/// Opens real IMAP sessions.
pub struct ImapConnector;

impl Connector for ImapConnector {
    type Connection = RemoteConnection;

    fn create(&self, account: &Account) -> Self::Connection {
        RemoteConnection {
            account_id: account.id,
            imap: account.imap.clone(),
            gmail: account.is_gmail(),
            session: None,
            capabilities: HashSet::new(),
            condstore_enabled: false,
        }
    }
}

pub struct RemoteConnection {
    account_id: u64,
    imap: ImapConfig,
    gmail: bool,
    session: Option<Session<Box<dyn SessionStream>>>,
    capabilities: HashSet<Capability>,
    condstore_enabled: bool,
}

/// How a mailbox is opened. Read-only opens never issue SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenCommand {
    Examine,
    Select,
    SelectCondstore,
}

impl OpenCommand {
    fn choose(read_only: bool, condstore: bool) -> Self {
        match (read_only, condstore) {
            (true, _) => Self::Examine,
            (false, true) => Self::SelectCondstore,
            (false, false) => Self::Select,
        }
    }
}

fn command_error(e: impl std::fmt::Debug) -> MailSyncError {
    raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed)
}

impl RemoteConnection {
    fn session(&mut self) -> MailSyncResult<&mut Session<Box<dyn SessionStream>>> {
        self.session.as_mut().ok_or_else(|| {
            raise_error!(
                "IMAP connection is not established".into(),
                ErrorCode::NetworkError
            )
        })
    }

    fn uses_gmail_extensions(&self) -> bool {
        self.gmail || self.capabilities.contains(&Capability::GmailExtensions)
    }

    async fn store(&mut self, uids: &[u32], query: String) -> MailSyncResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let uid_set = compress_uid_list(uids);
        let session = self.session()?;
        let list = session
            .uid_store(&uid_set, &query)
            .await
            .map_err(command_error)?;
        let _ = list.try_collect::<Vec<Fetch>>().await.map_err(command_error)?;
        Ok(())
    }
}

impl MailConnection for RemoteConnection {
    async fn connect(&mut self) -> MailSyncResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let password = decrypt!(&self.imap.password)?;
        let client = Client::connection(&self.imap.host, &self.imap.encryption, self.imap.port)
            .await?;
        let mut session = run_with_timeout!(
            TIMEOUT,
            client.login(&self.imap.username, &password),
            raise_error!(
                format!("IMAP login to {} timed out", self.imap.host),
                ErrorCode::ConnectionTimeout
            )
        )??;
        let capabilities = fetch_capabilities(&mut session).await?;
        check_capabilities(&capabilities)?;
        self.capabilities = supported_set(&capabilities);
        self.condstore_enabled = false;
        if self.capabilities.contains(&Capability::Condstore) {
            // EXAMINE reports HIGHESTMODSEQ only once CONDSTORE is enabled
            match session.run_command_and_check_ok("ENABLE CONDSTORE").await {
                Ok(()) => self.condstore_enabled = true,
                Err(e) => warn!(
                    "Account {}: ENABLE CONDSTORE failed, falling back to full flag scans: {:#?}",
                    self.account_id, e
                ),
            }
        }
        self.session = Some(session);
        info!(
            "Account {}: connected to {}:{} ({:?})",
            self.account_id, self.imap.host, self.imap.port, self.capabilities
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn get_boxes(&mut self) -> MailSyncResult<Vec<RemoteBox>> {
        let session = self.session()?;
        let list = session
            .list(Some(""), Some("*"))
            .await
            .map_err(command_error)?;
        let names = list.try_collect::<Vec<Name>>().await.map_err(command_error)?;
        let entries = names
            .iter()
            .map(|name| ListedBox {
                path: decode_mailbox_name!(name.name()),
                delimiter: name.delimiter().map(str::to_string),
                attributes: name
                    .attributes()
                    .iter()
                    .filter_map(attribute_to_string)
                    .collect(),
            })
            .collect();
        Ok(build_box_tree(entries))
    }

    async fn open_box(&mut self, name: &str, read_only: bool) -> MailSyncResult<BoxStatus> {
        let encoded = encode_mailbox_name!(name);
        let command = OpenCommand::choose(read_only, self.condstore_enabled);
        let session = self.session()?;
        let mailbox = match command {
            OpenCommand::Examine => session.examine(&encoded).await,
            OpenCommand::SelectCondstore => session.select_condstore(&encoded).await,
            OpenCommand::Select => session.select(&encoded).await,
        }
        .map_err(command_error)?;
        debug!(
            "Account {}: opened '{}' (uidvalidity={:?}, uidnext={:?}, modseq={:?})",
            self.account_id,
            name,
            mailbox.uid_validity,
            mailbox.uid_next,
            mailbox.highest_modseq
        );
        Ok(BoxStatus {
            uid_validity: mailbox.uid_validity,
            uid_next: mailbox.uid_next,
            highest_modseq: mailbox.highest_modseq,
            exists: mailbox.exists,
        })
    }

    async fn fetch_uid_attributes(
        &mut self,
        range: &str,
        changed_since: Option<u64>,
    ) -> MailSyncResult<Vec<UidAttributes>> {
        let condstore = self.capabilities.contains(&Capability::Condstore);
        let gmail = self.uses_gmail_extensions();
        let mut query = String::from("(UID FLAGS");
        if condstore {
            query.push_str(" MODSEQ");
        }
        if gmail {
            query.push_str(" X-GM-LABELS");
        }
        query.push(')');
        if let (Some(modseq), true) = (changed_since, condstore) {
            query.push_str(&format!(" (CHANGEDSINCE {})", modseq));
        }

        let session = self.session()?;
        let list = session.uid_fetch(range, &query).await.map_err(command_error)?;
        let fetches = list.try_collect::<Vec<Fetch>>().await.map_err(command_error)?;
        Ok(fetches
            .iter()
            .filter_map(|fetch| {
                let uid = fetch.uid?;
                Some(UidAttributes {
                    uid,
                    flags: fetch.flags().map(MessageFlag::from).collect(),
                    modseq: fetch.modseq,
                    gmail_labels: gmail.then(|| labels_of(fetch)),
                })
            })
            .collect())
    }

    async fn fetch_messages(&mut self, range: &str) -> MailSyncResult<Vec<FetchedMessage>> {
        let gmail = self.uses_gmail_extensions();
        let query = if gmail {
            GMAIL_MESSAGE_QUERY
        } else {
            MESSAGE_QUERY
        };
        let session = self.session()?;
        let list = session.uid_fetch(range, query).await.map_err(command_error)?;
        let fetches = list.try_collect::<Vec<Fetch>>().await.map_err(command_error)?;
        let mut messages = Vec::with_capacity(fetches.len());
        for fetch in fetches.iter() {
            let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                continue;
            };
            messages.push(FetchedMessage {
                uid,
                flags: fetch.flags().map(MessageFlag::from).collect(),
                internal_date: fetch.internal_date().map(|d| d.timestamp_millis()),
                raw: body.to_vec(),
                gmail_labels: gmail.then(|| labels_of(fetch)),
                gmail_thread_id: fetch.gmail_thrid().map(|v| v.to_string()),
                gmail_message_id: fetch.gmail_msg_id().map(|v| v.to_string()),
            });
        }
        Ok(messages)
    }

    async fn add_flags(&mut self, uids: &[u32], flags: &[MessageFlag]) -> MailSyncResult<()> {
        let query = format!("+FLAGS.SILENT {}", MessageFlag::to_store_list(flags));
        self.store(uids, query).await
    }

    async fn del_flags(&mut self, uids: &[u32], flags: &[MessageFlag]) -> MailSyncResult<()> {
        let query = format!("-FLAGS.SILENT {}", MessageFlag::to_store_list(flags));
        self.store(uids, query).await
    }

    async fn set_labels(&mut self, uids: &[u32], labels: &[String]) -> MailSyncResult<()> {
        let query = format!("+X-GM-LABELS.SILENT {}", label_list(labels));
        self.store(uids, query).await
    }

    async fn remove_labels(&mut self, uids: &[u32], labels: &[String]) -> MailSyncResult<()> {
        let query = format!("-X-GM-LABELS.SILENT {}", label_list(labels));
        self.store(uids, query).await
    }

    async fn move_from_box(&mut self, uids: &[u32], destination: &str) -> MailSyncResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let uid_set = compress_uid_list(uids);
        let encoded = encode_mailbox_name!(destination);
        if self.capabilities.contains(&Capability::Move) {
            self.session()?
                .uid_mv(&uid_set, &encoded)
                .await
                .map_err(command_error)?;
            return Ok(());
        }
        self.session()?
            .uid_copy(&uid_set, &encoded)
            .await
            .map_err(command_error)?;
        self.add_flags(uids, &[MessageFlag::Deleted]).await?;
        let expunged = self.session()?.expunge().await.map_err(command_error)?;
        let _ = expunged.try_collect::<Vec<u32>>().await.map_err(command_error)?;
        Ok(())
    }

    async fn rename_box(&mut self, from: &str, to: &str) -> MailSyncResult<()> {
        let from = encode_mailbox_name!(from);
        let to = encode_mailbox_name!(to);
        self.session()?
            .rename(&from, &to)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    fn server_supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    async fn idle(&mut self, timeout: Duration, wake: &Notify) -> MailSyncResult<IdleEvent> {
        let session = self.session.take().ok_or_else(|| {
            raise_error!(
                "IMAP connection is not established".into(),
                ErrorCode::NetworkError
            )
        })?;
        let mut handle = session.idle();
        if let Err(e) = handle.init().await {
            if let Ok(session) = handle.done().await {
                self.session = Some(session);
            }
            return Err(command_error(e));
        }

        let event = {
            let (idle_wait, _interrupt) = handle.wait_with_timeout(timeout);
            tokio::select! {
                response = idle_wait => match response {
                    Ok(IdleResponse::NewData(data)) => Ok(match data.parsed() {
                        Response::MailboxData(MailboxDatum::Exists(_))
                        | Response::MailboxData(MailboxDatum::Recent(_)) => IdleEvent::NewMail,
                        _ => IdleEvent::Update,
                    }),
                    Ok(IdleResponse::Timeout) => Ok(IdleEvent::Timeout),
                    Ok(IdleResponse::ManualInterrupt) => Ok(IdleEvent::Interrupted),
                    Err(e) => Err(raise_error!(format!("{:#?}", e), ErrorCode::NetworkError)),
                },
                _ = wake.notified() => Ok(IdleEvent::Interrupted),
            }
        };

        match handle.done().await {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                warn!("Account {}: failed to leave IDLE: {:#?}", self.account_id, e);
                return Err(raise_error!(format!("{:#?}", e), ErrorCode::NetworkError));
            }
        }
        event
    }

    async fn end(&mut self) {
        if let Some(mut session) = self.session.take() {
            let logout = run_with_timeout!(LOGOUT_TIMEOUT, session.logout(), ());
            if !matches!(logout, Ok(Ok(()))) {
                debug!("Account {}: logout did not complete cleanly", self.account_id);
            }
        }
    }
}

/// A flat LIST entry before it is placed into the hierarchy.
struct ListedBox {
    path: String,
    delimiter: Option<String>,
    attributes: Vec<String>,
}

fn attribute_to_string(attribute: &NameAttribute<'_>) -> Option<String> {
    let value = match attribute {
        NameAttribute::NoInferiors => "\\Noinferiors",
        NameAttribute::NoSelect => "\\Noselect",
        NameAttribute::Marked => "\\Marked",
        NameAttribute::Unmarked => "\\Unmarked",
        NameAttribute::All => "\\All",
        NameAttribute::Archive => "\\Archive",
        NameAttribute::Drafts => "\\Drafts",
        NameAttribute::Flagged => "\\Flagged",
        NameAttribute::Junk => "\\Junk",
        NameAttribute::Sent => "\\Sent",
        NameAttribute::Trash => "\\Trash",
        NameAttribute::Extension(s) => return Some(s.to_string()),
        _ => return None,
    };
    Some(value.to_string())
}

/// X-GM-LABELS of `fetch`, user labels decoded from modified UTF-7.
fn labels_of(fetch: &Fetch) -> Vec<String> {
    fetch
        .gmail_labels()
        .map(|labels| {
            labels
                .iter()
                .map(|label| {
                    if label.starts_with('\\') {
                        label.to_string()
                    } else {
                        decode_mailbox_name!(label)
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn label_list(labels: &[String]) -> String {
    let quoted = labels
        .iter()
        .map(|label| {
            if label.starts_with('\\') {
                label.clone()
            } else {
                let encoded = encode_mailbox_name!(label);
                format!("\"{}\"", encoded.replace('\\', "\\\\").replace('"', "\\\""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("({})", quoted)
}

/// Places flat LIST entries into a tree keyed by their delimiter-separated path.
fn build_box_tree(entries: Vec<ListedBox>) -> Vec<RemoteBox> {
    let mut roots: Vec<RemoteBox> = Vec::new();
    for entry in entries {
        let segments: Vec<&str> = match entry.delimiter.as_deref() {
            Some(delimiter) if !delimiter.is_empty() => entry.path.split(delimiter).collect(),
            _ => vec![entry.path.as_str()],
        };
        let mut level = &mut roots;
        let last = segments.len() - 1;
        for (index, segment) in segments.iter().enumerate() {
            let position = match level.iter().position(|b| b.name == *segment) {
                Some(position) => position,
                None => {
                    level.push(RemoteBox {
                        name: segment.to_string(),
                        delimiter: entry.delimiter.clone(),
                        attributes: None,
                        children: Vec::new(),
                    });
                    level.len() - 1
                }
            };
            let node = &mut level[position];
            if index == last {
                node.attributes = Some(entry.attributes.clone());
                node.delimiter = entry.delimiter.clone();
            }
            level = &mut node.children;
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(path: &str, attributes: &[&str]) -> ListedBox {
        ListedBox {
            path: path.into(),
            delimiter: Some("/".into()),
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_box_tree_nests_children() {
        let tree = build_box_tree(vec![
            listed("INBOX", &["\\HasNoChildren"]),
            listed("Work", &["\\HasChildren"]),
            listed("Work/Reports", &["\\HasNoChildren"]),
            listed("[Gmail]/Sent Mail", &["\\Sent"]),
        ]);
        assert_eq!(tree.len(), 3);
        let work = tree.iter().find(|b| b.name == "Work").unwrap();
        assert_eq!(work.children.len(), 1);
        assert_eq!(work.children[0].name, "Reports");

        let gmail = tree.iter().find(|b| b.name == "[Gmail]").unwrap();
        assert!(gmail.attributes.is_none());
        assert!(gmail.children[0].has_attribute("\\sent"));
    }

    #[test]
    fn test_label_list_quotes_user_labels() {
        let list = label_list(&["\\Inbox".into(), "Work \"Q1\"".into()]);
        assert_eq!(list, "(\\Inbox \"Work \\\"Q1\\\"\")");
    }

    #[test]
    fn test_read_only_open_never_selects() {
        assert_eq!(OpenCommand::choose(true, true), OpenCommand::Examine);
        assert_eq!(OpenCommand::choose(true, false), OpenCommand::Examine);
        assert_eq!(OpenCommand::choose(false, true), OpenCommand::SelectCondstore);
        assert_eq!(OpenCommand::choose(false, false), OpenCommand::Select);
    }
}
