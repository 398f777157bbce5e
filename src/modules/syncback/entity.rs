// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::database::{insert_impl, list_all_impl, update_impl};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::utils::generate_token_impl;
use crate::{raise_error, utc_now};
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A local change waiting to be replayed against the server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[native_model(id = 16, version = 1)]
#[native_db]
pub struct SyncbackRequest {
    /// Zero-padded creation time followed by a random suffix, so the primary
    /// key order is the creation order
    #[primary_key]
    pub id: String,
    pub account_id: u64,
    pub task: SyncbackTask,
    pub status: SyncbackStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum SyncbackStatus {
    #[default]
    New,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum SyncbackTask {
    MarkMessages {
        message_ids: Vec<String>,
        unread: bool,
    },
    StarMessages {
        message_ids: Vec<String>,
        starred: bool,
    },
    MoveMessagesToFolder {
        message_ids: Vec<String>,
        folder_id: u64,
    },
    /// Label category ids to add
    SetMessageLabels {
        message_ids: Vec<String>,
        labels: Vec<u64>,
    },
    RemoveMessageLabels {
        message_ids: Vec<String>,
        labels: Vec<u64>,
    },
    RenameFolder {
        folder_id: u64,
        new_name: String,
    },
}

impl SyncbackTask {
    /// Whether running the task gives messages new UIDs.
    pub fn affects_uids(&self) -> bool {
        matches!(
            self,
            SyncbackTask::MoveMessagesToFolder { .. } | SyncbackTask::RenameFolder { .. }
        )
    }

    pub fn message_ids(&self) -> &[String] {
        match self {
            SyncbackTask::MarkMessages { message_ids, .. }
            | SyncbackTask::StarMessages { message_ids, .. }
            | SyncbackTask::MoveMessagesToFolder { message_ids, .. }
            | SyncbackTask::SetMessageLabels { message_ids, .. }
            | SyncbackTask::RemoveMessageLabels { message_ids, .. } => message_ids,
            SyncbackTask::RenameFolder { .. } => &[],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SyncbackTask::MarkMessages { .. } => "MarkMessages",
            SyncbackTask::StarMessages { .. } => "StarMessages",
            SyncbackTask::MoveMessagesToFolder { .. } => "MoveMessagesToFolder",
            SyncbackTask::SetMessageLabels { .. } => "SetMessageLabels",
            SyncbackTask::RemoveMessageLabels { .. } => "RemoveMessageLabels",
            SyncbackTask::RenameFolder { .. } => "RenameFolder",
        }
    }
}

impl SyncbackRequest {
    pub fn new(account_id: u64, task: SyncbackTask) -> Self {
        let now = utc_now!();
        Self {
            id: format!("{:020}_{}", now, generate_token_impl(48)),
            account_id,
            task,
            status: SyncbackStatus::New,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Queues `task` for the next syncback phase of the account.
    pub async fn enqueue(
        db: &Arc<Database<'static>>,
        account_id: u64,
        task: SyncbackTask,
    ) -> MailSyncResult<SyncbackRequest> {
        let request = Self::new(account_id, task);
        insert_impl(db, request.clone()).await?;
        Ok(request)
    }

    /// Oldest requests still in the `New` state, at most `limit`.
    pub async fn list_new(
        db: &Arc<Database<'static>>,
        limit: usize,
    ) -> MailSyncResult<Vec<SyncbackRequest>> {
        let all: Vec<SyncbackRequest> = list_all_impl(db).await?;
        Ok(all
            .into_iter()
            .filter(|r| r.status == SyncbackStatus::New)
            .take(limit)
            .collect())
    }

    pub async fn list_all(db: &Arc<Database<'static>>) -> MailSyncResult<Vec<SyncbackRequest>> {
        list_all_impl(db).await
    }

    pub async fn finish(
        db: &Arc<Database<'static>>,
        id: &str,
        status: SyncbackStatus,
        error: Option<String>,
    ) -> MailSyncResult<SyncbackRequest> {
        let id = id.to_string();
        update_impl(
            db,
            move |rw| {
                rw.get()
                    .primary::<SyncbackRequest>(id.clone())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Syncback request id='{}' not found", id),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                updated.status = status;
                updated.error = error;
                updated.updated_at = utc_now!();
                Ok(updated)
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::database::manager::DatabaseManager;

    #[tokio::test]
    async fn test_list_new_in_creation_order() {
        let manager = DatabaseManager::in_memory().unwrap();
        let db = manager.account_db(1).unwrap();

        let first = SyncbackRequest::enqueue(
            &db,
            1,
            SyncbackTask::MarkMessages {
                message_ids: vec!["m1".into()],
                unread: false,
            },
        )
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = SyncbackRequest::enqueue(
            &db,
            1,
            SyncbackTask::RenameFolder {
                folder_id: 3,
                new_name: "Archive".into(),
            },
        )
        .await
        .unwrap();

        let pending = SyncbackRequest::list_new(&db, 100).await.unwrap();
        assert_eq!(
            pending.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            vec![first.id.clone(), second.id.clone()]
        );

        SyncbackRequest::finish(&db, &first.id, SyncbackStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        let pending = SyncbackRequest::list_new(&db, 100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].task.affects_uids());
        assert!(pending[0].task.message_ids().is_empty());
    }
}
