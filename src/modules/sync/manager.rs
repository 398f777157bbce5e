// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::activity::RecentActivity;
use crate::modules::account::entity::{Account, ImapConfig, SyncPolicy};
use crate::modules::database::manager::DatabaseManager;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::imap::connection::Connector;
use crate::modules::processor::MessageProcessor;
use crate::modules::sync::worker::{SyncContext, SyncWorker, WorkerCommand, WorkerHandle};
use crate::raise_error;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Keeps one [`SyncWorker`] per account.
///
/// Every request made for an account through the manager counts as user
/// activity, which switches its worker to the active polling interval.
pub struct SyncProcessManager<K: Connector> {
    context: SyncContext,
    activity: Arc<RecentActivity>,
    connector: Arc<K>,
    workers: DashMap<u64, WorkerHandle>,
}

impl<K: Connector> SyncProcessManager<K> {
    pub fn new(databases: Arc<DatabaseManager>, processor: MessageProcessor, connector: K) -> Self {
        let activity = Arc::new(RecentActivity::new());
        Self {
            context: SyncContext {
                databases,
                processor,
                activity: activity.clone(),
            },
            activity,
            connector: Arc::new(connector),
            workers: DashMap::new(),
        }
    }

    pub fn mark_active(&self, account_id: u64) {
        self.activity.mark_active(account_id);
    }

    /// Starts a worker for every stored account.
    pub async fn start_all(&self) -> MailSyncResult<usize> {
        let accounts = Account::list_all(self.context.databases.meta_db()).await?;
        let mut started = 0;
        for account in accounts {
            let account_id = account.id;
            match self.start_worker(account) {
                Ok(()) => started += 1,
                Err(e) => warn!("Account {}: failed to start sync worker: {:#?}", account_id, e),
            }
        }
        info!("Started {} sync workers", started);
        Ok(started)
    }

    /// Stores a new account and starts syncing it.
    pub async fn add_account(&self, account: Account) -> MailSyncResult<()> {
        if self.workers.contains_key(&account.id) {
            return Err(raise_error!(
                format!("Account {} is already syncing", account.id),
                ErrorCode::AlreadyExists
            ));
        }
        let meta = self.context.databases.meta_db();
        if Account::find(meta, account.id).await?.is_none() {
            account.save(meta).await?;
        }
        self.mark_active(account.id);
        self.start_worker(account)
    }

    pub async fn update_account(
        &self,
        account_id: u64,
        imap: Option<ImapConfig>,
        sync_policy: Option<SyncPolicy>,
    ) -> MailSyncResult<Account> {
        let account = Account::update_settings(
            self.context.databases.meta_db(),
            account_id,
            imap,
            sync_policy,
        )
        .await?;
        self.mark_active(account_id);
        if let Some(worker) = self.workers.get(&account_id) {
            worker.send(WorkerCommand::AccountChanged);
        }
        Ok(account)
    }

    /// Stops the worker and deletes the account together with its local store.
    pub async fn remove_account(&self, account_id: u64) -> MailSyncResult<()> {
        if let Some((_, worker)) = self.workers.remove(&account_id) {
            worker.stop(true).await;
        }
        self.context.databases.remove_account_db(account_id)?;
        Account::delete(self.context.databases.meta_db(), account_id).await?;
        self.activity.forget(account_id);
        info!("Account {}: removed", account_id);
        Ok(())
    }

    pub fn sync_now(&self, account_id: u64, reason: &str) -> MailSyncResult<()> {
        let worker = self.workers.get(&account_id).ok_or_else(|| {
            raise_error!(
                format!("No sync worker for account {}", account_id),
                ErrorCode::ResourceNotFound
            )
        })?;
        self.mark_active(account_id);
        worker.sync_now(reason);
        Ok(())
    }

    pub fn is_running(&self, account_id: u64) -> bool {
        self.workers
            .get(&account_id)
            .is_some_and(|worker| !worker.is_finished())
    }

    pub fn account_ids(&self) -> Vec<u64> {
        self.workers.iter().map(|entry| *entry.key()).collect()
    }

    pub async fn shutdown_all(&self) {
        let ids = self.account_ids();
        let workers: Vec<WorkerHandle> = ids
            .into_iter()
            .filter_map(|id| self.workers.remove(&id).map(|(_, worker)| worker))
            .collect();
        info!("Stopping {} sync workers", workers.len());
        join_all(workers.into_iter().map(|worker| worker.stop(true))).await;
    }

    fn start_worker(&self, account: Account) -> MailSyncResult<()> {
        let account_id = account.id;
        let handle = SyncWorker::spawn(account, self.context.clone(), self.connector.clone())?;
        if let Some(previous) = self.workers.insert(account_id, handle) {
            warn!("Account {}: replaced a running sync worker", account_id);
            tokio::spawn(previous.stop(true));
        }
        Ok(())
    }
}
