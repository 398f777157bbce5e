// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::common::Addr;
use crate::modules::database::{
    async_find_impl, batch_update_impl, filter_by_secondary_key_impl,
};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::utils::hex_digest;
use crate::{raise_error, utc_now};
use itertools::Itertools;
use native_db::transaction::RwTransaction;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[native_model(id = 11, version = 1)]
#[native_db]
pub struct Message {
    /// Stable hash of the header identity, see [`Message::identity`]
    #[primary_key]
    pub id: String,
    pub account_id: u64,
    /// RFC 2822 Message-ID without angle brackets
    pub header_message_id: Option<String>,
    pub references: Vec<String>,
    pub in_reply_to: Option<String>,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    /// HTML body. Plain text bodies are escaped and wrapped in `<pre>`.
    pub body: Option<String>,
    pub from: Vec<Addr>,
    pub to: Vec<Addr>,
    pub cc: Vec<Addr>,
    pub bcc: Vec<Addr>,
    pub reply_to: Vec<Addr>,
    /// Header date, falling back to the server arrival time (UNIX epoch milliseconds)
    pub date: i64,
    pub unread: bool,
    pub starred: bool,
    pub draft: bool,
    /// Category holding this message; cleared when its UID is no longer valid
    #[secondary_key(optional)]
    pub folder_id: Option<u64>,
    /// UID of this message inside `folder_id`
    pub folder_imap_uid: Option<u32>,
    pub label_ids: Vec<u64>,
    /// Raw X-GM-LABELS values
    pub gmail_labels: Vec<String>,
    pub gmail_thread_id: Option<String>,
    pub gmail_message_id: Option<String>,
    #[secondary_key(optional)]
    pub thread_id: Option<String>,
    /// Set once threads, references, files and contacts were derived from this message
    pub is_processed: bool,
    pub updated_at: i64,
}

impl Message {
    /// Identity hash shared by every copy of the same message within an account.
    pub fn identity(
        date: i64,
        subject: Option<&str>,
        participants: &[&Addr],
        header_message_id: Option<&str>,
    ) -> String {
        let emails = participants
            .iter()
            .filter_map(|p| p.normalized_address())
            .sorted()
            .join(",");
        hex_digest(&[
            &date.to_string(),
            subject.unwrap_or_default(),
            &emails,
            header_message_id.unwrap_or_default(),
        ])
    }

    /// Every address on the message, sender first.
    pub fn participants(&self) -> impl Iterator<Item = &Addr> {
        self.from
            .iter()
            .chain(self.to.iter())
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
    }

    /// RFC 2822 ids that link this message into a conversation, its own id included.
    pub fn thread_reference_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.references
            .iter()
            .chain(self.in_reply_to.iter())
            .chain(self.header_message_id.iter())
            .filter(|id| !id.is_empty())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Copies the remotely mutable fields of `incoming`. The body is kept once
    /// this message has been processed.
    pub fn merge_remote(&mut self, incoming: &Message) {
        if !self.is_processed {
            self.body = incoming.body.clone();
            self.snippet = incoming.snippet.clone();
        }
        self.unread = incoming.unread;
        self.starred = incoming.starred;
        self.draft = incoming.draft;
        self.folder_id = incoming.folder_id;
        self.folder_imap_uid = incoming.folder_imap_uid;
        if !incoming.label_ids.is_empty() || !incoming.gmail_labels.is_empty() {
            self.label_ids = incoming.label_ids.clone();
            self.gmail_labels = incoming.gmail_labels.clone();
        }
        if incoming.gmail_thread_id.is_some() {
            self.gmail_thread_id = incoming.gmail_thread_id.clone();
        }
        if incoming.gmail_message_id.is_some() {
            self.gmail_message_id = incoming.gmail_message_id.clone();
        }
        self.updated_at = utc_now!();
    }

    pub async fn find(db: &Arc<Database<'static>>, id: &str) -> MailSyncResult<Option<Message>> {
        async_find_impl(db, id.to_string()).await
    }

    pub async fn list_by_folder(
        db: &Arc<Database<'static>>,
        folder_id: u64,
    ) -> MailSyncResult<Vec<Message>> {
        let messages: Vec<Message> =
            filter_by_secondary_key_impl(db, MessageKey::folder_id, Some(folder_id)).await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.folder_id == Some(folder_id))
            .collect())
    }

    /// Messages of `folder_id` inside an open transaction.
    pub fn folder_members(rw: &RwTransaction, folder_id: u64) -> MailSyncResult<Vec<Message>> {
        let messages: Vec<Message> = rw
            .scan()
            .secondary::<Message>(MessageKey::folder_id)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .start_with(Some(folder_id))
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(messages
            .into_iter()
            .filter(|m| m.folder_id == Some(folder_id))
            .collect())
    }

    /// Messages of `thread_id` inside an open transaction.
    pub fn thread_members(rw: &RwTransaction, thread_id: &str) -> MailSyncResult<Vec<Message>> {
        let messages: Vec<Message> = rw
            .scan()
            .secondary::<Message>(MessageKey::thread_id)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .start_with(Some(thread_id.to_string()))
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(messages
            .into_iter()
            .filter(|m| m.thread_id.as_deref() == Some(thread_id))
            .collect())
    }

    /// Drops the folder association of every message in `folder_id`, or only
    /// of those with the given UIDs. Message rows themselves are kept.
    pub async fn clear_folder_uids(
        db: &Arc<Database<'static>>,
        folder_id: u64,
        only_uids: Option<Vec<u32>>,
    ) -> MailSyncResult<usize> {
        batch_update_impl(
            db,
            move |rw| {
                let members = Message::folder_members(rw, folder_id)?;
                Ok(match only_uids {
                    None => members,
                    Some(uids) => {
                        let uids: HashSet<u32> = uids.into_iter().collect();
                        members
                            .into_iter()
                            .filter(|m| m.folder_imap_uid.is_some_and(|uid| uids.contains(&uid)))
                            .collect()
                    }
                })
            },
            |targets| {
                let now = utc_now!();
                Ok(targets
                    .iter()
                    .map(|m| {
                        let mut updated = m.clone();
                        updated.folder_id = None;
                        updated.folder_imap_uid = None;
                        updated.updated_at = now;
                        (m.clone(), updated)
                    })
                    .collect())
            },
        )
        .await
    }
}
