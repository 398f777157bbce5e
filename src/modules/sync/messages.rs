// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::entity::Account;
use crate::modules::category::entity::{resolve_label_ids, Category, SyncState};
use crate::modules::database::with_rw_transaction;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::imap::capabilities::Capability;
use crate::modules::imap::connection::{
    compress_uid_list, BoxStatus, FetchedMessage, MailConnection, UidAttributes,
};
use crate::modules::imap::flags::unread_and_starred;
use crate::modules::message::entity::Message;
use crate::modules::message::parser::DesiredPart;
use crate::modules::processor::{
    EnqueueOptions, MessageProcessor, ProcessJob, ProcessOutcome,
};
use crate::modules::sync::interruptible::InterruptToken;
use crate::modules::thread::entity::Thread;
use crate::{raise_error, utc_now};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use native_db::Database;
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// UIDs downloaded per FETCH command.
const FETCH_CHUNK: u32 = 50;
/// Recent UIDs re-checked by a shallow scan on servers without CONDSTORE.
const SHALLOW_SCAN_UID_COUNT: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanKind {
    Deep,
    Shallow,
    /// The server's modseq had not moved since the last scan
    Unchanged,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategorySyncReport {
    pub uid_validity_reset: bool,
    pub enqueued: usize,
    pub processed: usize,
    pub failed: usize,
    /// Messages left on the server because the processor queue was full
    pub skipped_queue_full: usize,
    pub flag_updates: usize,
    pub removed: usize,
    pub scan: Option<ScanKind>,
}

#[derive(Debug)]
struct FlagUpdate {
    message_id: String,
    unread: bool,
    starred: bool,
    labels: Option<(Vec<String>, Vec<u64>)>,
}

/// What the queueing loop covered of one UID range.
struct Coverage {
    /// Lowest (descending) or highest (ascending) UID the watermark may move to
    reached: Option<u32>,
    stopped: bool,
}

struct CategorySync<'a, C: MailConnection> {
    token: &'a InterruptToken,
    account: Arc<Account>,
    db: &'a Arc<Database<'static>>,
    connection: &'a mut C,
    processor: &'a MessageProcessor,
    category: Category,
    status: BoxStatus,
    pending: Vec<BoxFuture<'static, ProcessOutcome>>,
    /// UIDs handed to the processor during this run
    queued: AHashSet<u32>,
    report: CategorySyncReport,
}

/// Synchronizes the messages of one category: validity check, unseen
/// download with backfill, then a deep or shallow flag reconciliation.
pub async fn sync_category<C: MailConnection>(
    token: &InterruptToken,
    account: &Arc<Account>,
    db: &Arc<Database<'static>>,
    connection: &mut C,
    processor: &MessageProcessor,
    category: Category,
) -> MailSyncResult<CategorySyncReport> {
    let status = token.step(connection.open_box(&category.name, true)).await?;
    let mut task = CategorySync {
        token,
        account: account.clone(),
        db,
        connection,
        processor,
        category,
        status,
        pending: Vec::new(),
        queued: AHashSet::new(),
        report: CategorySyncReport::default(),
    };
    task.ensure_uid_validity().await?;
    task.fetch_unseen().await?;
    task.run_scan().await?;
    Ok(task.report)
}

impl<C: MailConnection> CategorySync<'_, C> {
    fn log_prefix(&self) -> String {
        format!("Account {} '{}'", self.account.id, self.category.name)
    }

    async fn save_state(
        &mut self,
        change: impl FnOnce(&mut SyncState) + Send + 'static,
    ) -> MailSyncResult<()> {
        let updated = self
            .token
            .step(Category::update_sync_state(self.db, self.category.id, change))
            .await?;
        self.category = updated;
        Ok(())
    }

    async fn ensure_uid_validity(&mut self) -> MailSyncResult<()> {
        let (Some(local), Some(remote)) =
            (self.category.sync_state.uid_validity, self.status.uid_validity)
        else {
            return Ok(());
        };
        if local == remote {
            return Ok(());
        }
        info!(
            "{}: UIDVALIDITY changed {} -> {}, clearing UID associations",
            self.log_prefix(),
            local,
            remote
        );
        let cleared = self
            .token
            .step(Message::clear_folder_uids(self.db, self.category.id, None))
            .await?;
        debug!("{}: cleared {} message association(s)", self.log_prefix(), cleared);
        self.save_state(move |state| {
            *state = SyncState {
                uid_validity: Some(remote),
                oldest_processed_date: state.oldest_processed_date,
                ..Default::default()
            };
        })
        .await?;
        self.report.uid_validity_reset = true;
        Ok(())
    }

    async fn remote_uid_next(&mut self) -> MailSyncResult<u32> {
        if let Some(uid_next) = self.status.uid_next {
            return Ok(uid_next);
        }
        let last = self
            .token
            .step(self.connection.fetch_uid_attributes("*", None))
            .await?;
        Ok(last.iter().map(|a| a.uid).max().map_or(1, |max| max + 1))
    }

    /// Downloads UIDs the category has never seen: new mail above the high
    /// watermark first, then one backfill batch below the low watermark.
    async fn fetch_unseen(&mut self) -> MailSyncResult<()> {
        let uid_next = self.remote_uid_next().await?;
        let policy = self.account.sync_policy.clone();
        let state = self.category.sync_state.clone();

        let (mut fetched_min, mut fetched_max) = match (state.fetched_min, state.fetched_max) {
            (Some(min), Some(max)) => (min, max),
            _ => (uid_next, uid_next.saturating_sub(1)),
        };
        let first_sync = state.fetched_max.is_none();

        if !first_sync && fetched_max.saturating_add(1) < uid_next {
            let from = fetched_max + 1;
            let to = uid_next - 1;
            info!("{}: fetching new messages {}:{}", self.log_prefix(), from, to);
            let coverage = self.queue_range(from, to, false, false).await?;
            if let Some(reached) = coverage.reached {
                fetched_max = reached;
            }
        }

        let batch = if first_sync {
            policy.folder_message_limit
        } else {
            policy.backfill_batch
        };
        if fetched_min > 1 && batch > 0 {
            let to = fetched_min - 1;
            let from = fetched_min.saturating_sub(batch).max(1);
            info!("{}: backfilling {}:{}", self.log_prefix(), from, to);
            let coverage = self.queue_range(from, to, true, !first_sync).await?;
            if let Some(reached) = coverage.reached {
                fetched_min = reached;
            }
        }

        self.await_pending().await?;

        let uid_validity = self.status.uid_validity;
        let now = utc_now!();
        self.save_state(move |state| {
            state.fetched_min = Some(fetched_min);
            state.fetched_max = Some(fetched_max);
            state.uid_next = Some(uid_next);
            if uid_validity.is_some() {
                state.uid_validity = uid_validity;
            }
            state.time_fetched_unseen = Some(now);
        })
        .await?;
        Ok(())
    }

    /// Downloads `from..=to` in chunks and enqueues every message. Stops at
    /// the first full-queue signal. `descending` walks from the top so the
    /// low watermark only moves over a contiguous run.
    async fn queue_range(
        &mut self,
        from: u32,
        to: u32,
        descending: bool,
        throttle: bool,
    ) -> MailSyncResult<Coverage> {
        let mut coverage = Coverage {
            reached: None,
            stopped: false,
        };
        let chunks = uid_chunks(from, to, FETCH_CHUNK, descending);
        for (low, high) in chunks {
            if self.processor.queue_is_full() {
                self.skip_full((high - low + 1) as usize);
                coverage.stopped = true;
                break;
            }
            let range = format!("{}:{}", low, high);
            let mut messages: Vec<FetchedMessage> = self
                .token
                .step(self.connection.fetch_messages(&range))
                .await?
                .into_iter()
                .filter(|m| m.uid >= low && m.uid <= high)
                .collect();
            messages.sort_by_key(|m| m.uid);
            if descending {
                messages.reverse();
            }

            let total = messages.len();
            for (index, message) in messages.into_iter().enumerate() {
                if self.processor.queue_is_full() {
                    self.skip_full(total - index);
                    coverage.stopped = true;
                    break;
                }
                coverage.reached = Some(message.uid);
                self.enqueue(message, throttle);
            }
            if coverage.stopped {
                break;
            }
            coverage.reached = Some(if descending { low } else { high });
        }
        Ok(coverage)
    }

    fn skip_full(&mut self, count: usize) {
        self.report.skipped_queue_full += count;
        warn!(
            "{}: message processor queue is full ({}), skipping {} message(s) until the next cycle",
            self.log_prefix(),
            self.processor.queue_length(),
            count
        );
    }

    fn enqueue(&mut self, message: FetchedMessage, throttle: bool) {
        self.queued.insert(message.uid);
        let job = ProcessJob {
            account: self.account.clone(),
            category_id: self.category.id,
            message,
            desired_parts: DesiredPart::ALL.to_vec(),
        };
        self.pending
            .push(self.processor.enqueue(job, EnqueueOptions { throttle }).boxed());
        self.report.enqueued += 1;
    }

    async fn await_pending(&mut self) -> MailSyncResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let outcomes = self
            .token
            .step(async move { Ok(join_all(pending).await) })
            .await?;
        for outcome in outcomes {
            match outcome {
                ProcessOutcome::Processed { .. } => self.report.processed += 1,
                ProcessOutcome::Failed { .. } => self.report.failed += 1,
            }
        }
        Ok(())
    }

    async fn run_scan(&mut self) -> MailSyncResult<()> {
        let state = &self.category.sync_state;
        if state.fetched_min.is_none() || state.fetched_max.is_none() {
            return Err(raise_error!(
                format!(
                    "{}: unseen messages must be fetched before scanning",
                    self.log_prefix()
                ),
                ErrorCode::InternalError
            ));
        }
        let interval_ms = self.account.sync_policy.deep_folder_scan_secs as i64 * 1000;
        let elapsed = utc_now!() - state.time_deep_scan.unwrap_or(0);
        if elapsed >= interval_ms {
            self.deep_scan().await
        } else {
            self.shallow_scan().await
        }
    }

    async fn deep_scan(&mut self) -> MailSyncResult<()> {
        let state = self.category.sync_state.clone();
        let (Some(min), Some(max)) = (state.fetched_min, state.fetched_max) else {
            return Ok(());
        };
        let remote = if min <= max {
            let range = format!("{}:{}", min, max);
            info!("{}: deep scan of {}", self.log_prefix(), range);
            self.token
                .step(self.connection.fetch_uid_attributes(&range, None))
                .await?
                .into_iter()
                .filter(|a| a.uid >= min && a.uid <= max)
                .collect()
        } else {
            Vec::new()
        };

        let local = self.local_by_uid().await?;
        let remote_uids: AHashSet<u32> = remote.iter().map(|a| a.uid).collect();
        let removed: Vec<String> = local
            .iter()
            .filter(|(uid, _)| !remote_uids.contains(uid))
            .map(|(_, m)| m.id.clone())
            .collect();

        self.reconcile(remote, local, removed, min, max).await?;

        let modseq = self.status.highest_modseq;
        let now = utc_now!();
        self.save_state(move |state| {
            state.highest_modseq = modseq;
            state.time_deep_scan = Some(now);
            state.time_shallow_scan = Some(now);
        })
        .await?;
        self.report.scan = Some(ScanKind::Deep);
        Ok(())
    }

    async fn shallow_scan(&mut self) -> MailSyncResult<()> {
        let state = self.category.sync_state.clone();
        let (Some(min), Some(max)) = (state.fetched_min, state.fetched_max) else {
            return Ok(());
        };
        let remote_modseq = self.status.highest_modseq;

        let remote = if self.connection.server_supports(Capability::Condstore) {
            if remote_modseq.is_some() && remote_modseq == state.highest_modseq {
                debug!("{}: highest modseq unchanged, nothing to scan", self.log_prefix());
                self.report.scan = Some(ScanKind::Unchanged);
                return Ok(());
            }
            info!(
                "{}: shallow scan changed since modseq {:?}",
                self.log_prefix(),
                state.highest_modseq
            );
            self.token
                .step(
                    self.connection
                        .fetch_uid_attributes("1:*", state.highest_modseq),
                )
                .await?
        } else {
            let uid_next = self.status.uid_next.unwrap_or(max.saturating_add(1));
            let from = uid_next.saturating_sub(SHALLOW_SCAN_UID_COUNT).max(1);
            let range = format!("{}:*", from);
            info!("{}: shallow scan of {}", self.log_prefix(), range);
            self.token
                .step(self.connection.fetch_uid_attributes(&range, None))
                .await?
                .into_iter()
                .filter(|a| a.uid >= from)
                .collect()
        };

        let local = self.local_by_uid().await?;
        self.reconcile(remote, local, Vec::new(), min, max).await?;

        let now = utc_now!();
        self.save_state(move |state| {
            state.highest_modseq = remote_modseq;
            state.time_shallow_scan = Some(now);
        })
        .await?;
        self.report.scan = Some(ScanKind::Shallow);
        Ok(())
    }

    async fn local_by_uid(&mut self) -> MailSyncResult<AHashMap<u32, Message>> {
        let messages = self
            .token
            .step(Message::list_by_folder(self.db, self.category.id))
            .await?;
        Ok(messages
            .into_iter()
            .filter_map(|m| m.folder_imap_uid.map(|uid| (uid, m)))
            .collect())
    }

    /// Applies remote flag and label state to known messages, clears the
    /// folder association of `removed`, and queues remote UIDs inside the
    /// fetched window that have no local message yet.
    async fn reconcile(
        &mut self,
        remote: Vec<UidAttributes>,
        local: AHashMap<u32, Message>,
        removed: Vec<String>,
        min: u32,
        max: u32,
    ) -> MailSyncResult<()> {
        let categories = if self.account.is_gmail() {
            self.token.step(Category::list_all(self.db)).await?
        } else {
            Vec::new()
        };
        let failed: AHashSet<u32> = self.category.sync_state.failed_uids.iter().copied().collect();

        let mut updates = Vec::new();
        let mut created = Vec::new();
        for attributes in remote {
            match local.get(&attributes.uid) {
                Some(message) => {
                    if let Some(update) = flag_update(message, &attributes, &categories) {
                        updates.push(update);
                    }
                }
                None => {
                    let inside = attributes.uid >= min && attributes.uid <= max;
                    if inside
                        && !failed.contains(&attributes.uid)
                        && !self.queued.contains(&attributes.uid)
                    {
                        created.push(attributes.uid);
                    }
                }
            }
        }

        if !updates.is_empty() || !removed.is_empty() {
            self.report.flag_updates += updates.len();
            self.report.removed += removed.len();
            info!(
                "{}: {} flag change(s), {} message(s) no longer in folder",
                self.log_prefix(),
                updates.len(),
                removed.len()
            );
            self.token
                .step(apply_remote_changes(self.db, updates, removed))
                .await?;
        }

        if !created.is_empty() {
            info!(
                "{}: {} message(s) missing locally, downloading",
                self.log_prefix(),
                created.len()
            );
            self.queue_uids(created).await?;
            self.await_pending().await?;
        }
        Ok(())
    }

    async fn queue_uids(&mut self, mut uids: Vec<u32>) -> MailSyncResult<()> {
        uids.sort_unstable_by(|a, b| b.cmp(a));
        for chunk in uids.chunks(FETCH_CHUNK as usize) {
            if self.processor.queue_is_full() {
                self.skip_full(chunk.len());
                return Ok(());
            }
            let wanted: AHashSet<u32> = chunk.iter().copied().collect();
            let messages = self
                .token
                .step(self.connection.fetch_messages(&compress_uid_list(chunk)))
                .await?;
            for message in messages.into_iter().filter(|m| wanted.contains(&m.uid)) {
                if self.processor.queue_is_full() {
                    self.skip_full(1);
                    continue;
                }
                self.enqueue(message, true);
            }
        }
        Ok(())
    }
}

fn flag_update(
    message: &Message,
    attributes: &UidAttributes,
    categories: &[Category],
) -> Option<FlagUpdate> {
    let (unread, starred) = unread_and_starred(&attributes.flags);
    let labels = match &attributes.gmail_labels {
        Some(labels) if !categories.is_empty() && *labels != message.gmail_labels => {
            Some((labels.clone(), resolve_label_ids(labels, categories)))
        }
        _ => None,
    };
    if message.unread == unread && message.starred == starred && labels.is_none() {
        return None;
    }
    Some(FlagUpdate {
        message_id: message.id.clone(),
        unread,
        starred,
        labels,
    })
}

async fn apply_remote_changes(
    db: &Arc<Database<'static>>,
    updates: Vec<FlagUpdate>,
    removed: Vec<String>,
) -> MailSyncResult<()> {
    with_rw_transaction(db, move |rw| {
        let mut threads = BTreeSet::new();
        let now = utc_now!();
        let load = |id: &str| -> MailSyncResult<Option<Message>> {
            rw.get()
                .primary::<Message>(id.to_string())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))
        };

        for update in updates {
            let Some(current) = load(&update.message_id)? else {
                continue;
            };
            let mut updated = current.clone();
            updated.unread = update.unread;
            updated.starred = update.starred;
            if let Some((labels, label_ids)) = update.labels {
                updated.gmail_labels = labels;
                updated.label_ids = label_ids;
            }
            updated.updated_at = now;
            threads.extend(updated.thread_id.clone());
            rw.update(current, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        }

        for id in removed {
            let Some(current) = load(&id)? else {
                continue;
            };
            let mut updated = current.clone();
            updated.folder_id = None;
            updated.folder_imap_uid = None;
            updated.updated_at = now;
            threads.extend(updated.thread_id.clone());
            rw.update(current, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        }

        for thread_id in threads {
            Thread::refresh_in(rw, &thread_id)?;
        }
        Ok(())
    })
    .await
}

/// Splits `from..=to` into inclusive chunks of at most `size` UIDs.
fn uid_chunks(from: u32, to: u32, size: u32, descending: bool) -> Vec<(u32, u32)> {
    if from > to || size == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    if descending {
        let mut high = to;
        loop {
            let low = high.saturating_sub(size - 1).max(from);
            chunks.push((low, high));
            if low == from {
                break;
            }
            high = low - 1;
        }
    } else {
        let mut low = from;
        loop {
            let high = low.saturating_add(size - 1).min(to);
            chunks.push((low, high));
            if high == to {
                break;
            }
            low = high + 1;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::account::entity::tests::sample_account;
    use crate::modules::category::entity::{CategoryRole, CategoryType};
    use crate::modules::database::insert_impl;
    use crate::modules::database::manager::DatabaseManager;
    use crate::modules::imap::connection::Connector;
    use crate::modules::imap::flags::MessageFlag;
    use crate::modules::imap::mock::{raw_message, MockConnection, MockConnector, MockServer};
    use crate::modules::processor::handler::StoreHandler;
    use crate::modules::processor::tests::{config, SlowHandler};
    use crate::modules::sync::interruptible::{Interruptible, RunOutcome};
    use std::time::Duration;

    struct Fixture {
        account: Arc<Account>,
        db: Arc<Database<'static>>,
        connector: MockConnector,
        connection: MockConnection,
        processor: MessageProcessor,
        inbox: Category,
    }

    async fn fixture(processor: impl FnOnce(Arc<DatabaseManager>) -> MessageProcessor) -> Fixture {
        let databases = Arc::new(DatabaseManager::in_memory().unwrap());
        let account = Arc::new(sample_account("jane@example.com"));
        let db = databases.account_db(account.id).unwrap();
        let inbox = Category::new(
            account.id,
            "INBOX",
            Some("/".into()),
            CategoryType::Folder,
            Some(CategoryRole::Inbox),
        );
        insert_impl(&db, inbox.clone()).await.unwrap();

        let connector = MockConnector::new(MockServer::with_boxes(&[("INBOX", &[])]));
        let mut connection = connector.create(&account);
        connection.connect().await.unwrap();
        Fixture {
            account,
            db,
            connector,
            connection,
            processor: processor(databases),
            inbox,
        }
    }

    fn storing(databases: Arc<DatabaseManager>) -> MessageProcessor {
        MessageProcessor::start(StoreHandler::new(databases), config(500))
    }

    fn append(fixture: &Fixture, n: u32) {
        let mut server = fixture.connector.server();
        let inbox = server.mailbox("INBOX");
        for i in 0..n {
            let id = format!("m{}-{}@example.com", inbox.uid_next, i);
            inbox.append(
                raw_message(&id, "Status", "Bob <bob@example.com>", &["jane@example.com"], &[], "hi"),
                vec![],
            );
        }
    }

    async fn run(fixture: &mut Fixture) -> CategorySyncReport {
        let category = Category::get(&fixture.db, fixture.inbox.id).await.unwrap();
        let runner = Interruptible::new();
        let Fixture {
            account,
            db,
            connection,
            processor,
            ..
        } = fixture;
        match runner
            .run(|token| async move {
                sync_category(&token, account, db, connection, processor, category).await
            })
            .await
            .unwrap()
        {
            RunOutcome::Completed(report) => report,
            RunOutcome::Interrupted => panic!("category sync interrupted"),
        }
    }

    async fn state(fixture: &Fixture) -> SyncState {
        Category::get(&fixture.db, fixture.inbox.id)
            .await
            .unwrap()
            .sync_state
    }

    #[test]
    fn test_uid_chunks() {
        assert_eq!(uid_chunks(1, 5, 2, false), vec![(1, 2), (3, 4), (5, 5)]);
        assert_eq!(uid_chunks(1, 5, 2, true), vec![(4, 5), (2, 3), (1, 1)]);
        assert_eq!(uid_chunks(3, 3, 50, true), vec![(3, 3)]);
        assert!(uid_chunks(4, 3, 50, false).is_empty());
    }

    #[tokio::test]
    async fn test_first_sync_then_new_mail() {
        let mut fixture = fixture(storing).await;
        append(&fixture, 3);

        let report = run(&mut fixture).await;
        assert_eq!(report.enqueued, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(report.scan, Some(ScanKind::Deep));
        let state = state(&fixture).await;
        assert_eq!(
            (state.fetched_min, state.fetched_max, state.uid_next, state.uid_validity),
            (Some(1), Some(3), Some(4), Some(1))
        );
        assert!(!state.has_more_to_sync());
        assert_eq!(
            Message::list_by_folder(&fixture.db, fixture.inbox.id)
                .await
                .unwrap()
                .len(),
            3
        );

        append(&fixture, 2);
        let report = run(&mut fixture).await;
        assert_eq!(report.enqueued, 2);
        assert_eq!(report.scan, Some(ScanKind::Shallow));
        assert_eq!(self::state(&fixture).await.fetched_max, Some(5));
        assert_eq!(
            Message::list_by_folder(&fixture.db, fixture.inbox.id)
                .await
                .unwrap()
                .len(),
            5
        );
    }

    #[tokio::test]
    async fn test_initial_window_and_backfill() {
        let mut fixture = fixture(storing).await;
        let mut account = (*fixture.account).clone();
        account.sync_policy.folder_message_limit = 4;
        account.sync_policy.backfill_batch = 3;
        fixture.account = Arc::new(account);
        append(&fixture, 10);

        run(&mut fixture).await;
        let first = state(&fixture).await;
        assert_eq!((first.fetched_min, first.fetched_max), (Some(7), Some(10)));
        assert!(first.has_more_to_sync());

        run(&mut fixture).await;
        assert_eq!(state(&fixture).await.fetched_min, Some(4));
        run(&mut fixture).await;
        run(&mut fixture).await;
        let done = state(&fixture).await;
        assert_eq!(done.fetched_min, Some(1));
        assert!(!done.has_more_to_sync());
    }

    #[tokio::test]
    async fn test_uid_validity_change_clears_associations() {
        let mut fixture = fixture(storing).await;
        append(&fixture, 3);
        run(&mut fixture).await;

        {
            let mut server = fixture.connector.server();
            let inbox = server.mailbox("INBOX");
            inbox.uid_validity = 2;
            inbox.messages.clear();
        }
        let report = run(&mut fixture).await;
        assert!(report.uid_validity_reset);
        assert!(Message::list_by_folder(&fixture.db, fixture.inbox.id)
            .await
            .unwrap()
            .is_empty());
        let all: Vec<Message> = crate::modules::database::list_all_impl(&fixture.db)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|m| m.folder_imap_uid.is_none()));
        assert_eq!(state(&fixture).await.uid_validity, Some(2));
    }

    #[tokio::test]
    async fn test_full_queue_stops_enqueueing() {
        let mut fixture = fixture(|_| {
            MessageProcessor::start(
                SlowHandler {
                    delay: Duration::from_millis(30),
                    ..Default::default()
                },
                config(3),
            )
        })
        .await;
        append(&fixture, 10);

        let report = run(&mut fixture).await;
        assert_eq!(report.enqueued, 3);
        assert!(report.skipped_queue_full > 0);
        let state = state(&fixture).await;
        assert_eq!((state.fetched_min, state.fetched_max), (Some(8), Some(10)));
        assert!(state.has_more_to_sync());
    }

    #[tokio::test]
    async fn test_deep_scan_updates_flags_and_clears_removed() {
        let mut fixture = fixture(storing).await;
        append(&fixture, 3);
        run(&mut fixture).await;

        {
            let mut server = fixture.connector.server();
            let inbox = server.mailbox("INBOX");
            inbox.set_flags(1, vec![MessageFlag::Seen, MessageFlag::Flagged]);
            inbox.remove(2);
        }
        let mut account = (*fixture.account).clone();
        account.sync_policy.deep_folder_scan_secs = 0;
        fixture.account = Arc::new(account);

        let report = run(&mut fixture).await;
        assert_eq!(report.scan, Some(ScanKind::Deep));
        assert_eq!(report.flag_updates, 1);
        assert_eq!(report.removed, 1);

        let in_folder = Message::list_by_folder(&fixture.db, fixture.inbox.id)
            .await
            .unwrap();
        assert_eq!(in_folder.len(), 2);
        let first = in_folder
            .iter()
            .find(|m| m.folder_imap_uid == Some(1))
            .unwrap();
        assert!(!first.unread);
        assert!(first.starred);
        let thread = Thread::find(&fixture.db, first.thread_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((thread.unread_count, thread.starred_count), (0, 1));

        let all: Vec<Message> = crate::modules::database::list_all_impl(&fixture.db)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_shallow_scan_uses_modseq() {
        let mut fixture = fixture(storing).await;
        fixture
            .connector
            .server()
            .capabilities
            .insert(Capability::Condstore);
        fixture.connection.connect().await.unwrap();
        append(&fixture, 2);
        run(&mut fixture).await;

        let report = run(&mut fixture).await;
        assert_eq!(report.scan, Some(ScanKind::Unchanged));

        fixture
            .connector
            .server()
            .mailbox("INBOX")
            .set_flags(2, vec![MessageFlag::Seen]);
        let report = run(&mut fixture).await;
        assert_eq!(report.scan, Some(ScanKind::Shallow));
        assert_eq!(report.flag_updates, 1);
        let second = Message::list_by_folder(&fixture.db, fixture.inbox.id)
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.folder_imap_uid == Some(2))
            .unwrap();
        assert!(!second.unread);
    }
}
