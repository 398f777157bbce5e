// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::category::entity::{Category, CategoryRole};
use crate::modules::common::Addr;
use crate::modules::database::{async_find_impl, list_all_impl};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::message::entity::Message;
use crate::modules::message::file::File;
use crate::{raise_error, utc_now};
use native_db::transaction::RwTransaction;
use itertools::Itertools;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[native_model(id = 12, version = 1)]
#[native_db]
pub struct Thread {
    /// `t:` followed by the id of the message that started the thread locally
    #[primary_key]
    pub id: String,
    pub account_id: u64,
    /// Provider thread id (X-GM-THRID)
    #[secondary_key(optional)]
    pub remote_thread_id: Option<String>,
    /// Subject without reply/forward prefixes
    pub subject: String,
    pub snippet: Option<String>,
    pub unread_count: u32,
    pub starred_count: u32,
    pub first_message_date: Option<i64>,
    pub last_message_date: Option<i64>,
    pub last_message_received_date: Option<i64>,
    pub last_message_sent_date: Option<i64>,
    pub participants: Vec<Addr>,
    pub has_attachments: bool,
    pub folder_ids: Vec<u64>,
    pub label_ids: Vec<u64>,
    pub message_ids: Vec<String>,
    pub updated_at: i64,
}

impl Thread {
    pub fn empty(account_id: u64, remote_thread_id: Option<String>) -> Self {
        Self {
            account_id,
            remote_thread_id,
            ..Default::default()
        }
    }

    pub fn thread_id_for(message_id: &str) -> String {
        format!("t:{}", message_id)
    }

    /// Rebuilds every derived field from the full member set.
    ///
    /// `attachment_owners` holds the ids of members with at least one real
    /// attachment, `sent_categories` the ids of categories with the sent role.
    pub fn recompute(
        &mut self,
        members: &[Message],
        attachment_owners: &HashSet<String>,
        sent_categories: &HashSet<u64>,
    ) {
        let mut ordered: Vec<&Message> = members.iter().collect();
        ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        self.unread_count = 0;
        self.starred_count = 0;
        self.snippet = None;
        self.first_message_date = None;
        self.last_message_date = None;
        self.last_message_sent_date = None;
        self.last_message_received_date = None;
        self.participants.clear();
        self.has_attachments = false;

        let mut folders = BTreeSet::new();
        let mut labels = BTreeSet::new();
        let mut emails = HashSet::new();

        for message in &ordered {
            self.unread_count += message.unread as u32;
            self.starred_count += message.starred as u32;

            if self.last_message_date.map_or(true, |last| message.date >= last) {
                self.last_message_date = Some(message.date);
                self.snippet = message.snippet.clone();
            }
            if self.first_message_date.map_or(true, |first| message.date < first) {
                self.first_message_date = Some(message.date);
            }

            let in_sent_folder = message
                .folder_id
                .is_some_and(|id| sent_categories.contains(&id));
            let is_sent = in_sent_folder
                || message.label_ids.iter().any(|id| sent_categories.contains(id));
            let is_received = !in_sent_folder
                || message.label_ids.iter().any(|id| !sent_categories.contains(id));
            if is_sent && self.last_message_sent_date.map_or(true, |d| message.date > d) {
                self.last_message_sent_date = Some(message.date);
            }
            if is_received
                && self
                    .last_message_received_date
                    .map_or(true, |d| message.date > d)
            {
                self.last_message_received_date = Some(message.date);
            }

            for participant in message
                .to
                .iter()
                .chain(message.cc.iter())
                .chain(message.bcc.iter())
                .chain(message.from.iter())
            {
                if let Some(email) = participant.normalized_address() {
                    if emails.insert(email) {
                        self.participants.push(participant.clone());
                    }
                }
            }

            if attachment_owners.contains(&message.id) {
                self.has_attachments = true;
            }
            folders.extend(message.folder_id);
            labels.extend(message.label_ids.iter().copied());
        }

        self.folder_ids = folders.into_iter().collect();
        self.label_ids = labels.into_iter().collect();
        self.message_ids = ordered.iter().map(|m| m.id.clone()).collect();
        self.updated_at = utc_now!();
    }

    /// Recomputes `self` from its stored members plus `pending`, a member
    /// that may not be persisted yet.
    pub fn recompute_in(&mut self, rw: &RwTransaction, pending: Option<&Message>) -> MailSyncResult<()> {
        let mut members = if self.id.is_empty() {
            Vec::new()
        } else {
            Message::thread_members(rw, &self.id)?
        };
        if let Some(pending) = pending {
            members.retain(|m| m.id != pending.id);
            members.push(pending.clone());
        }

        let mut attachment_owners = HashSet::new();
        for member in &members {
            if File::message_files(rw, &member.id)?
                .iter()
                .any(File::is_attachment)
            {
                attachment_owners.insert(member.id.clone());
            }
        }

        let categories: Vec<Category> = rw
            .scan()
            .primary()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .all()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        let sent_categories: HashSet<u64> = categories
            .iter()
            .filter(|c| c.role == Some(CategoryRole::Sent))
            .map(|c| c.id)
            .collect();

        self.recompute(&members, &attachment_owners, &sent_categories);
        Ok(())
    }

    /// Reloads a stored thread, recomputes it and saves it.
    pub fn refresh_in(rw: &RwTransaction, thread_id: &str) -> MailSyncResult<Option<Thread>> {
        let Some(mut thread) = Self::get_in(rw, thread_id)? else {
            return Ok(None);
        };
        thread.recompute_in(rw, None)?;
        rw.upsert(thread.clone())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(Some(thread))
    }

    pub fn get_in(rw: &RwTransaction, thread_id: &str) -> MailSyncResult<Option<Thread>> {
        rw.get()
            .primary(thread_id.to_string())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))
    }

    pub fn find_by_remote_id(rw: &RwTransaction, remote_thread_id: &str) -> MailSyncResult<Option<Thread>> {
        let candidates: Vec<Thread> = rw
            .scan()
            .secondary::<Thread>(ThreadKey::remote_thread_id)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .start_with(Some(remote_thread_id.to_string()))
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(candidates
            .into_iter()
            .find(|t| t.remote_thread_id.as_deref() == Some(remote_thread_id)))
    }

    pub async fn find(db: &Arc<Database<'static>>, thread_id: &str) -> MailSyncResult<Option<Thread>> {
        async_find_impl(db, thread_id.to_string()).await
    }

    pub async fn list_all(db: &Arc<Database<'static>>) -> MailSyncResult<Vec<Thread>> {
        list_all_impl(db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::message::entity::tests::sample_message;

    #[test]
    fn test_recompute_aggregates() {
        let mut older = sample_message("m1", 1, 1);
        older.date = 100;
        older.snippet = Some("first".into());
        older.label_ids = vec![9];
        older.to = vec![Addr::new(None, "bob@x.com")];

        let mut newer = sample_message("m2", 2, 1);
        newer.date = 200;
        newer.snippet = Some("second".into());
        newer.unread = false;
        newer.starred = true;

        let sent: HashSet<u64> = [2].into_iter().collect();
        let owners: HashSet<String> = ["m1".to_string()].into_iter().collect();

        let mut thread = Thread::empty(1, None);
        thread.recompute(&[newer, older], &owners, &sent);

        assert_eq!(thread.unread_count, 1);
        assert_eq!(thread.starred_count, 1);
        assert_eq!(thread.snippet.as_deref(), Some("second"));
        assert_eq!(thread.first_message_date, Some(100));
        assert_eq!(thread.last_message_date, Some(200));
        assert_eq!(thread.last_message_sent_date, Some(200));
        assert_eq!(thread.last_message_received_date, Some(100));
        assert!(thread.has_attachments);
        assert_eq!(thread.folder_ids, vec![1, 2]);
        assert_eq!(thread.label_ids, vec![9]);
        assert_eq!(thread.message_ids, vec!["m1".to_string(), "m2".into()]);
        assert_eq!(thread.participants.len(), 2);
    }
}
