// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::database::{
    async_find_impl, filter_by_secondary_key_impl, list_all_impl, update_impl,
    with_rw_transaction,
};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::utils::category_id;
use crate::{encode_mailbox_name, raise_error, utc_now};
use chrono::{DateTime, Datelike, Utc};
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Dates before 1980 are treated as bogus when tracking progress.
const OLDEST_DATE_FLOOR_MS: i64 = 315_532_800_000;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[native_model(id = 10, version = 1)]
#[native_db]
pub struct Category {
    /// Hash of the owning account id and the full remote path
    #[primary_key]
    pub id: u64,
    pub account_id: u64,
    /// Full decoded remote path, e.g. `INBOX/Archive` or `[Gmail]/All Mail`
    #[secondary_key(unique)]
    pub name: String,
    pub delimiter: Option<String>,
    pub category_type: CategoryType,
    pub role: Option<CategoryRole>,
    pub sync_state: SyncState,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum CategoryType {
    #[default]
    Folder,
    Label,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum CategoryRole {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Spam,
    All,
    Important,
    Flagged,
}

impl CategoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryRole::Inbox => "inbox",
            CategoryRole::Sent => "sent",
            CategoryRole::Drafts => "drafts",
            CategoryRole::Trash => "trash",
            CategoryRole::Spam => "spam",
            CategoryRole::All => "all",
            CategoryRole::Important => "important",
            CategoryRole::Flagged => "flagged",
        }
    }

    /// Role of a Gmail system label such as `\Inbox`.
    pub fn from_gmail_label(label: &str) -> Option<CategoryRole> {
        match label.to_ascii_lowercase().as_str() {
            "\\inbox" => Some(CategoryRole::Inbox),
            "\\sent" => Some(CategoryRole::Sent),
            "\\draft" | "\\drafts" => Some(CategoryRole::Drafts),
            "\\trash" => Some(CategoryRole::Trash),
            "\\spam" | "\\junk" => Some(CategoryRole::Spam),
            "\\important" => Some(CategoryRole::Important),
            "\\starred" | "\\flagged" => Some(CategoryRole::Flagged),
            _ => None,
        }
    }

    fn gmail_label(&self) -> Option<&'static str> {
        match self {
            CategoryRole::Inbox => Some("\\Inbox"),
            CategoryRole::Sent => Some("\\Sent"),
            CategoryRole::Drafts => Some("\\Draft"),
            CategoryRole::Important => Some("\\Important"),
            CategoryRole::Flagged => Some("\\Starred"),
            _ => None,
        }
    }
}

/// Maps raw X-GM-LABELS values onto local label categories. System labels
/// match by role, everything else by name.
pub fn resolve_label_ids(labels: &[String], categories: &[Category]) -> Vec<u64> {
    let mut ids: Vec<u64> = labels
        .iter()
        .filter_map(|label| match CategoryRole::from_gmail_label(label) {
            Some(role) => categories
                .iter()
                .find(|c| c.is_label() && c.role == Some(role)),
            None => categories.iter().find(|c| c.is_label() && &c.name == label),
        })
        .map(|c| c.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Protocol bookkeeping of one category.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct SyncState {
    pub uid_validity: Option<u32>,
    /// Next UID reported by the server at the last fetch
    pub uid_next: Option<u32>,
    /// Lowest UID already fetched
    pub fetched_min: Option<u32>,
    /// Highest UID already fetched
    pub fetched_max: Option<u32>,
    pub highest_modseq: Option<u64>,
    /// UIDs whose processing failed, without duplicates
    pub failed_uids: Vec<u32>,
    pub time_fetched_unseen: Option<i64>,
    pub time_deep_scan: Option<i64>,
    pub time_shallow_scan: Option<i64>,
    /// Oldest message date processed so far, for progress reporting
    pub oldest_processed_date: Option<i64>,
}

impl SyncState {
    /// Whether older UIDs remain to backfill or newer UIDs remain past the watermark.
    pub fn has_more_to_sync(&self) -> bool {
        let (Some(min), Some(max)) = (self.fetched_min, self.fetched_max) else {
            return false;
        };
        if min > 1 {
            return true;
        }
        matches!(self.uid_next, Some(next) if max.saturating_add(1) < next)
    }

    pub fn record_failed_uid(&mut self, uid: u32) {
        if !self.failed_uids.contains(&uid) {
            self.failed_uids.push(uid);
        }
    }

    /// Moves `oldest_processed_date` back to `date` when it lies in an older
    /// month. Returns whether the value changed.
    pub fn observe_processed_date(&mut self, date: i64) -> bool {
        if date <= OLDEST_DATE_FLOOR_MS {
            return false;
        }
        let update = match self.oldest_processed_date {
            None => true,
            Some(current) => date < current && !same_month(current, date),
        };
        if update {
            self.oldest_processed_date = Some(date);
        }
        update
    }
}

fn same_month(a: i64, b: i64) -> bool {
    match (
        DateTime::<Utc>::from_timestamp_millis(a),
        DateTime::<Utc>::from_timestamp_millis(b),
    ) {
        (Some(a), Some(b)) => a.year() == b.year() && a.month() == b.month(),
        _ => false,
    }
}

impl Category {
    pub fn new(
        account_id: u64,
        name: &str,
        delimiter: Option<String>,
        category_type: CategoryType,
        role: Option<CategoryRole>,
    ) -> Self {
        let now = utc_now!();
        Self {
            id: category_id(account_id, name),
            account_id,
            name: name.to_string(),
            delimiter,
            category_type,
            role,
            sync_state: SyncState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Name as sent over the wire.
    pub fn encoded_name(&self) -> String {
        encode_mailbox_name!(&self.name)
    }

    pub fn is_label(&self) -> bool {
        self.category_type == CategoryType::Label
    }

    /// How this label is named in X-GM-LABELS commands.
    pub fn imap_label_identifier(&self) -> String {
        self.role
            .and_then(|role| role.gmail_label())
            .map(str::to_string)
            .unwrap_or_else(|| self.name.clone())
    }

    pub async fn find(db: &Arc<Database<'static>>, id: u64) -> MailSyncResult<Option<Category>> {
        async_find_impl(db, id).await
    }

    pub async fn get(db: &Arc<Database<'static>>, id: u64) -> MailSyncResult<Category> {
        Self::find(db, id).await?.ok_or_else(|| {
            raise_error!(
                format!("Category id='{}' not found", id),
                ErrorCode::MailBoxNotCached
            )
        })
    }

    pub async fn find_by_name(
        db: &Arc<Database<'static>>,
        name: &str,
    ) -> MailSyncResult<Option<Category>> {
        let name = name.to_string();
        let candidates: Vec<Category> =
            filter_by_secondary_key_impl(db, CategoryKey::name, name.clone()).await?;
        Ok(candidates.into_iter().find(|c| c.name == name))
    }

    pub async fn list_all(db: &Arc<Database<'static>>) -> MailSyncResult<Vec<Category>> {
        list_all_impl(db).await
    }

    pub async fn find_by_role(
        db: &Arc<Database<'static>>,
        role: CategoryRole,
    ) -> MailSyncResult<Option<Category>> {
        Ok(Self::list_all(db)
            .await?
            .into_iter()
            .find(|c| c.role == Some(role)))
    }

    /// Applies `change` to the stored sync state inside one transaction, so
    /// concurrent writers never lose each other's updates.
    pub async fn update_sync_state(
        db: &Arc<Database<'static>>,
        id: u64,
        change: impl FnOnce(&mut SyncState) + Send + 'static,
    ) -> MailSyncResult<Category> {
        update_impl(
            db,
            move |rw| {
                rw.get()
                    .primary::<Category>(id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Category id='{}' not found", id),
                            ErrorCode::MailBoxNotCached
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                change(&mut updated.sync_state);
                updated.updated_at = utc_now!();
                Ok(updated)
            },
        )
        .await
    }

    /// Creates, deletes and re-roles categories in a single transaction.
    pub async fn apply_changes(
        db: &Arc<Database<'static>>,
        created: Vec<Category>,
        deleted: Vec<u64>,
        role_updates: Vec<(u64, Option<CategoryRole>)>,
    ) -> MailSyncResult<()> {
        with_rw_transaction(db, move |rw| {
            for category in created {
                rw.insert(category)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
            for id in deleted {
                let existing: Option<Category> = rw
                    .get()
                    .primary(id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                if let Some(existing) = existing {
                    rw.remove(existing)
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                }
            }
            for (id, role) in role_updates {
                let existing: Option<Category> = rw
                    .get()
                    .primary(id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                if let Some(existing) = existing {
                    let mut updated = existing.clone();
                    updated.role = role;
                    updated.updated_at = utc_now!();
                    rw.update(existing, updated)
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                }
            }
            Ok(())
        })
        .await
    }
}
