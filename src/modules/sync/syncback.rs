// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::entity::Account;
use crate::modules::category::entity::Category;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::imap::connection::MailConnection;
use crate::modules::imap::flags::MessageFlag;
use crate::modules::message::entity::Message;
use crate::modules::sync::interruptible::InterruptToken;
use crate::modules::syncback::entity::{SyncbackRequest, SyncbackStatus, SyncbackTask};
use crate::raise_error;
use native_db::Database;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};

const SYNCBACK_BATCH: usize = 100;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncbackReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Orders a batch of pending requests for one phase.
///
/// Requests that keep UIDs intact run first. UID-affecting requests follow:
/// when renames are pending only they run, one per folder; otherwise no two
/// requests touching the same message run in the same phase.
pub fn select_requests(requests: Vec<SyncbackRequest>) -> Vec<SyncbackRequest> {
    let (mut selected, affecting): (Vec<_>, Vec<_>) = requests
        .into_iter()
        .partition(|r| !r.task.affects_uids());

    let renames: Vec<&SyncbackRequest> = affecting
        .iter()
        .filter(|r| matches!(r.task, SyncbackTask::RenameFolder { .. }))
        .collect();
    if !renames.is_empty() {
        let mut folders = HashSet::new();
        let chosen: Vec<SyncbackRequest> = renames
            .into_iter()
            .filter(|r| match r.task {
                SyncbackTask::RenameFolder { folder_id, .. } => folders.insert(folder_id),
                _ => false,
            })
            .cloned()
            .collect();
        selected.extend(chosen);
        return selected;
    }

    let mut touched: HashSet<String> = HashSet::new();
    for request in affecting {
        let ids = request.task.message_ids();
        if ids.iter().any(|id| touched.contains(id)) {
            continue;
        }
        touched.extend(ids.iter().cloned());
        selected.push(request);
    }
    selected
}

/// Replays pending local changes against the server. A failing request is
/// marked failed and never stops the others.
pub async fn run_syncback<C: MailConnection>(
    token: &InterruptToken,
    account: &Account,
    db: &Arc<Database<'static>>,
    connection: &mut C,
) -> MailSyncResult<SyncbackReport> {
    let pending = token
        .step(SyncbackRequest::list_new(db, SYNCBACK_BATCH))
        .await?;
    let mut report = SyncbackReport::default();
    if pending.is_empty() {
        return Ok(report);
    }

    for request in select_requests(pending) {
        token.check()?;
        let description = request.task.description();
        match apply_task(token, db, connection, &request.task).await {
            Err(e) if e.is_interrupted() => return Err(e),
            Ok(()) => {
                info!(
                    "Account {}: syncback {} ({}) succeeded",
                    account.id, description, request.id
                );
                token
                    .step(SyncbackRequest::finish(
                        db,
                        &request.id,
                        SyncbackStatus::Succeeded,
                        None,
                    ))
                    .await?;
                report.succeeded += 1;
            }
            Err(e) => {
                error!(
                    "Account {}: syncback {} ({}) failed: {:#?}",
                    account.id, description, request.id, e
                );
                token
                    .step(SyncbackRequest::finish(
                        db,
                        &request.id,
                        SyncbackStatus::Failed,
                        Some(e.message().to_string()),
                    ))
                    .await?;
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Known UIDs of `message_ids`, grouped by the folder holding them.
async fn uids_by_folder(
    db: &Arc<Database<'static>>,
    message_ids: &[String],
) -> MailSyncResult<BTreeMap<u64, Vec<u32>>> {
    let mut grouped: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
    for id in message_ids {
        let Some(message) = Message::find(db, id).await? else {
            continue;
        };
        if let (Some(folder_id), Some(uid)) = (message.folder_id, message.folder_imap_uid) {
            grouped.entry(folder_id).or_default().push(uid);
        }
    }
    if grouped.is_empty() {
        return Err(raise_error!(
            format!("None of the messages {:?} has a known UID", message_ids),
            ErrorCode::ResourceNotFound
        ));
    }
    Ok(grouped)
}

async fn label_names(
    db: &Arc<Database<'static>>,
    labels: &[u64],
) -> MailSyncResult<Vec<String>> {
    let mut names = Vec::with_capacity(labels.len());
    for id in labels {
        names.push(Category::get(db, *id).await?.imap_label_identifier());
    }
    Ok(names)
}

async fn apply_task<C: MailConnection>(
    token: &InterruptToken,
    db: &Arc<Database<'static>>,
    connection: &mut C,
    task: &SyncbackTask,
) -> MailSyncResult<()> {
    if let SyncbackTask::RenameFolder { folder_id, new_name } = task {
        let folder = Category::get(db, *folder_id).await?;
        return token.step(connection.rename_box(&folder.name, new_name)).await;
    }

    let grouped = uids_by_folder(db, task.message_ids()).await?;
    let labels = match task {
        SyncbackTask::SetMessageLabels { labels, .. }
        | SyncbackTask::RemoveMessageLabels { labels, .. } => label_names(db, labels).await?,
        _ => Vec::new(),
    };

    for (folder_id, uids) in grouped {
        let folder = Category::get(db, folder_id).await?;
        if let SyncbackTask::MoveMessagesToFolder {
            folder_id: destination,
            ..
        } = task
        {
            if folder_id == *destination {
                continue;
            }
        }
        token.step(connection.open_box(&folder.name, false)).await?;
        match task {
            SyncbackTask::MarkMessages { unread, .. } => {
                let seen = [MessageFlag::Seen];
                if *unread {
                    token.step(connection.del_flags(&uids, &seen)).await?;
                } else {
                    token.step(connection.add_flags(&uids, &seen)).await?;
                }
            }
            SyncbackTask::StarMessages { starred, .. } => {
                let flagged = [MessageFlag::Flagged];
                if *starred {
                    token.step(connection.add_flags(&uids, &flagged)).await?;
                } else {
                    token.step(connection.del_flags(&uids, &flagged)).await?;
                }
            }
            SyncbackTask::MoveMessagesToFolder {
                folder_id: destination,
                ..
            } => {
                let destination = Category::get(db, *destination).await?;
                token
                    .step(connection.move_from_box(&uids, &destination.name))
                    .await?;
                Message::clear_folder_uids(db, folder_id, Some(uids)).await?;
            }
            SyncbackTask::SetMessageLabels { .. } => {
                token.step(connection.set_labels(&uids, &labels)).await?;
            }
            SyncbackTask::RemoveMessageLabels { .. } => {
                token.step(connection.remove_labels(&uids, &labels)).await?;
            }
            SyncbackTask::RenameFolder { .. } => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::account::entity::tests::sample_account;
    use crate::modules::category::entity::{CategoryRole, CategoryType};
    use crate::modules::database::insert_impl;
    use crate::modules::database::manager::DatabaseManager;
    use crate::modules::imap::connection::Connector;
    use crate::modules::imap::mock::{raw_message, MockConnector, MockServer};
    use crate::modules::message::entity::tests::sample_message;
    use crate::modules::sync::interruptible::{Interruptible, RunOutcome};

    fn request(task: SyncbackTask) -> SyncbackRequest {
        SyncbackRequest::new(1, task)
    }

    fn mv(ids: &[&str], folder_id: u64) -> SyncbackTask {
        SyncbackTask::MoveMessagesToFolder {
            message_ids: ids.iter().map(|s| s.to_string()).collect(),
            folder_id,
        }
    }

    #[test]
    fn test_select_runs_flag_changes_before_moves() {
        let star = request(SyncbackTask::StarMessages {
            message_ids: vec!["a".into()],
            starred: true,
        });
        let first_move = request(mv(&["a", "b"], 7));
        let second_move = request(mv(&["b"], 8));
        let third_move = request(mv(&["c"], 8));

        let selected = select_requests(vec![
            first_move.clone(),
            star.clone(),
            second_move,
            third_move.clone(),
        ]);
        let ids: Vec<String> = selected.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![star.id, first_move.id, third_move.id]);
    }

    #[test]
    fn test_select_renames_exclusively() {
        let mark = request(SyncbackTask::MarkMessages {
            message_ids: vec!["a".into()],
            unread: true,
        });
        let rename = request(SyncbackTask::RenameFolder {
            folder_id: 3,
            new_name: "Archive".into(),
        });
        let rename_again = request(SyncbackTask::RenameFolder {
            folder_id: 3,
            new_name: "Old".into(),
        });
        let moving = request(mv(&["a"], 4));

        let selected = select_requests(vec![mark.clone(), moving, rename.clone(), rename_again]);
        let ids: Vec<String> = selected.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![mark.id, rename.id]);
    }

    #[tokio::test]
    async fn test_run_syncback_translates_tasks() {
        let account = sample_account("jane@example.com");
        let databases = DatabaseManager::in_memory().unwrap();
        let db = databases.account_db(account.id).unwrap();
        let inbox = Category::new(
            account.id,
            "INBOX",
            Some("/".into()),
            CategoryType::Folder,
            Some(CategoryRole::Inbox),
        );
        let archive = Category::new(account.id, "Archive", Some("/".into()), CategoryType::Folder, None);
        for category in [inbox.clone(), archive.clone()] {
            insert_impl(&db, category).await.unwrap();
        }

        let connector = MockConnector::new(MockServer::with_boxes(&[("INBOX", &[]), ("Archive", &[])]));
        {
            let mut server = connector.server();
            let mailbox = server.mailbox("INBOX");
            for id in ["m1", "m2"] {
                mailbox.append(raw_message(id, "Hi", "bob@example.com", &[], &[], "x"), vec![]);
            }
        }
        insert_impl(&db, sample_message("m1", inbox.id, 1)).await.unwrap();
        insert_impl(&db, sample_message("m2", inbox.id, 2)).await.unwrap();

        let mark = SyncbackRequest::enqueue(
            &db,
            account.id,
            SyncbackTask::MarkMessages {
                message_ids: vec!["m1".into()],
                unread: false,
            },
        )
        .await
        .unwrap();
        let moving = SyncbackRequest::enqueue(&db, account.id, mv(&["m2"], archive.id))
            .await
            .unwrap();
        let broken = SyncbackRequest::enqueue(
            &db,
            account.id,
            SyncbackTask::StarMessages {
                message_ids: vec!["missing".into()],
                starred: true,
            },
        )
        .await
        .unwrap();

        let mut connection = connector.create(&account);
        connection.connect().await.unwrap();
        let runner = Interruptible::new();
        let outcome = runner
            .run(|token| {
                let (account, db, connection) = (&account, &db, &mut connection);
                async move { run_syncback(&token, account, db, connection).await }
            })
            .await
            .unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("syncback interrupted");
        };
        assert_eq!(report, SyncbackReport { succeeded: 2, failed: 1 });

        let commands = connector.server().commands.clone();
        assert_eq!(
            commands,
            vec![
                "SELECT INBOX".to_string(),
                "+FLAGS [1] (\\Seen)".into(),
                "SELECT INBOX".into(),
                "MOVE [2] Archive".into(),
            ]
        );

        let stored = SyncbackRequest::list_all(&db).await.unwrap();
        let status = |id: &str| stored.iter().find(|r| r.id == id).unwrap().status;
        assert_eq!(status(&mark.id), SyncbackStatus::Succeeded);
        assert_eq!(status(&moving.id), SyncbackStatus::Succeeded);
        assert_eq!(status(&broken.id), SyncbackStatus::Failed);
        assert!(stored
            .iter()
            .find(|r| r.id == broken.id)
            .unwrap()
            .error
            .is_some());

        let moved = Message::find(&db, "m2").await.unwrap().unwrap();
        assert_eq!((moved.folder_id, moved.folder_imap_uid), (None, None));
        assert_eq!(connector.server().mailbox("Archive").messages.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_task_leaves_server_untouched() {
        let account = sample_account("jane@example.com");
        let databases = DatabaseManager::in_memory().unwrap();
        let db = databases.account_db(account.id).unwrap();
        let inbox = Category::new(
            account.id,
            "INBOX",
            Some("/".into()),
            CategoryType::Folder,
            Some(CategoryRole::Inbox),
        );
        insert_impl(&db, inbox.clone()).await.unwrap();
        insert_impl(&db, sample_message("m1", inbox.id, 1)).await.unwrap();
        let connector = MockConnector::new(MockServer::with_boxes(&[("INBOX", &[])]));
        let mut connection = connector.create(&account);
        connection.connect().await.unwrap();

        let token = InterruptToken::interrupted();
        let task = SyncbackTask::StarMessages {
            message_ids: vec!["m1".into()],
            starred: true,
        };
        let err = apply_task(&token, &db, &mut connection, &task)
            .await
            .unwrap_err();
        assert!(err.is_interrupted());

        let pending = SyncbackRequest::enqueue(&db, account.id, task).await.unwrap();
        let err = run_syncback(&token, &account, &db, &mut connection)
            .await
            .unwrap_err();
        assert!(err.is_interrupted());

        assert!(connector.server().commands.is_empty());
        let stored = SyncbackRequest::list_all(&db).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, pending.id);
        assert_eq!(stored[0].status, SyncbackStatus::New);
    }
}
