// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use crate::modules::database::{
    async_find_impl, batch_delete_impl, insert_impl, list_all_impl, update_impl,
};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::{MailSyncError, MailSyncResult};
use crate::{encrypt, id, raise_error, utc_now};
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

/// How long completions are kept in `last_sync_completions`.
const SYNC_COMPLETION_WINDOW_MS: i64 = 30 * 60 * 1000;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct Account {
    /// Unique account identifier
    #[primary_key]
    pub id: u64,
    /// Email address associated with this account
    #[secondary_key(unique)]
    pub email: String,
    /// Display name for the account (optional)
    pub name: Option<String>,
    pub provider: Provider,
    /// IMAP server configuration
    pub imap: ImapConfig,
    pub sync_policy: SyncPolicy,
    pub sync_status: SyncStatus,
    /// Creation timestamp (UNIX epoch milliseconds)
    pub created_at: i64,
    /// Last update timestamp (UNIX epoch milliseconds)
    pub updated_at: i64,
}

#[derive(Clone, Copy, Default, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    Imap,
    /// Exposes X-GM-LABELS, X-GM-THRID and X-GM-MSGID
    Gmail,
}

#[derive(Clone, Default, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImapConfig {
    /// IMAP server hostname or IP address
    pub host: String,
    /// IMAP server port number
    pub port: u16,
    /// Connection encryption method
    pub encryption: Encryption,
    pub username: String,
    /// AES-256-GCM encrypted password, never stored in clear text
    pub password: String,
}

#[derive(Clone, Default, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Encryption {
    /// SSL/TLS encrypted connection
    #[default]
    Ssl,
    /// StartTLS encryption
    StartTls,
    /// Unencrypted connection
    None,
}

/// What the worker does with its connection once a cycle has completed.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AfterSync {
    /// Keep the session and IDLE on the all-mail or inbox folder
    #[default]
    Idle,
    Close,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Seconds between cycles while the owner is active. `None` disables the timer.
    pub interval_active_secs: Option<u64>,
    /// Seconds between cycles while the owner is away. `None` disables the timer.
    pub interval_inactive_secs: Option<u64>,
    /// Minimum seconds between two full flag/membership scans of one folder.
    pub deep_folder_scan_secs: u64,
    /// Upper bound of UIDs fetched on the first sync of a folder.
    pub folder_message_limit: u32,
    /// Older UIDs fetched per cycle once the first sync is done, `0` disables backfill.
    pub backfill_batch: u32,
    pub after_sync: AfterSync,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            interval_active_secs: Some(30),
            interval_inactive_secs: Some(300),
            deep_folder_scan_secs: 600,
            folder_message_limit: 500,
            backfill_batch: 200,
            after_sync: AfterSync::Idle,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorInfo {
    pub message: String,
    pub code: ErrorCode,
    pub at: i64,
}

impl From<&MailSyncError> for SyncErrorInfo {
    fn from(error: &MailSyncError) -> Self {
        Self {
            message: error.message().to_string(),
            code: error.code(),
            at: utc_now!(),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last cycle failure, cleared when a new cycle starts
    pub sync_error: Option<SyncErrorInfo>,
    pub first_sync_completion: Option<i64>,
    /// Newest first, pruned to the last 30 minutes
    pub last_sync_completions: Vec<i64>,
    pub last_sync_started: Option<i64>,
}

impl SyncStatus {
    pub fn record_completion(&mut self, now: i64) {
        if self.first_sync_completion.is_none() {
            self.first_sync_completion = Some(now);
        }
        self.last_sync_completions.insert(0, now);
        self.last_sync_completions
            .retain(|completed| now - completed <= SYNC_COMPLETION_WINDOW_MS);
    }
}

impl Account {
    /// Builds a new account, encrypting `password` before it is stored.
    pub fn new(
        email: &str,
        name: Option<String>,
        provider: Provider,
        imap: ImapConfig,
        sync_policy: SyncPolicy,
    ) -> MailSyncResult<Self> {
        let now = utc_now!();
        Ok(Self {
            id: id!(64),
            email: email.trim().to_ascii_lowercase(),
            name,
            provider,
            imap: ImapConfig {
                password: encrypt!(&imap.password)?,
                ..imap
            },
            sync_policy,
            sync_status: SyncStatus::default(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_gmail(&self) -> bool {
        self.provider == Provider::Gmail
    }

    /// Whether `address` belongs to the owner of this account.
    pub fn is_my_email(&self, address: &str) -> bool {
        address.trim().eq_ignore_ascii_case(&self.email)
    }

    pub async fn save(&self, db: &Arc<Database<'static>>) -> MailSyncResult<()> {
        if !email_address::EmailAddress::is_valid(&self.email) {
            return Err(raise_error!(
                format!("Invalid account email '{}'", self.email),
                ErrorCode::InvalidParameter
            ));
        }
        insert_impl(db, self.clone()).await
    }

    pub async fn find(db: &Arc<Database<'static>>, account_id: u64) -> MailSyncResult<Option<Account>> {
        async_find_impl(db, account_id).await
    }

    pub async fn get(db: &Arc<Database<'static>>, account_id: u64) -> MailSyncResult<Account> {
        Self::find(db, account_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Account id='{}' not found", account_id),
                ErrorCode::ResourceNotFound
            )
        })
    }

    pub async fn list_all(db: &Arc<Database<'static>>) -> MailSyncResult<Vec<Account>> {
        list_all_impl(db).await
    }

    pub async fn delete(db: &Arc<Database<'static>>, account_id: u64) -> MailSyncResult<()> {
        batch_delete_impl(db, move |rw| {
            let account: Option<Account> = rw
                .get()
                .primary(account_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            Ok(account.into_iter().collect())
        })
        .await?;
        Ok(())
    }

    /// Applies `change` to the stored sync status in a single transactional save.
    pub async fn update_sync_status(
        db: &Arc<Database<'static>>,
        account_id: u64,
        change: impl FnOnce(&mut SyncStatus) + Send + 'static,
    ) -> MailSyncResult<Account> {
        update_impl(
            db,
            move |rw| {
                rw.get()
                    .primary::<Account>(account_id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Account id='{}' not found", account_id),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                change(&mut updated.sync_status);
                updated.updated_at = utc_now!();
                Ok(updated)
            },
        )
        .await
    }

    /// Replaces connection settings and policy, keeping identity and status.
    pub async fn update_settings(
        db: &Arc<Database<'static>>,
        account_id: u64,
        imap: Option<ImapConfig>,
        sync_policy: Option<SyncPolicy>,
    ) -> MailSyncResult<Account> {
        let imap = match imap {
            Some(config) => Some(ImapConfig {
                password: encrypt!(&config.password)?,
                ..config
            }),
            None => None,
        };
        update_impl(
            db,
            move |rw| {
                rw.get()
                    .primary::<Account>(account_id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Account id='{}' not found", account_id),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                if let Some(imap) = imap {
                    updated.imap = imap;
                }
                if let Some(policy) = sync_policy {
                    updated.sync_policy = policy;
                }
                updated.updated_at = utc_now!();
                Ok(updated)
            },
        )
        .await
    }
}
