// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::activity::ActivityOracle;
use crate::modules::account::entity::{Account, AfterSync, SyncErrorInfo, SyncPolicy};
use crate::modules::category::entity::{Category, CategoryRole, CategoryType};
use crate::modules::database::manager::DatabaseManager;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::{MailSyncError, MailSyncResult};
use crate::modules::imap::connection::{Connector, IdleEvent, MailConnection};
use crate::modules::processor::MessageProcessor;
use crate::modules::settings::cli::SETTINGS;
use crate::modules::sync::folders::sync_folders;
use crate::modules::sync::interruptible::{InterruptToken, Interruptible, RunOutcome};
use crate::modules::sync::messages::sync_category;
use crate::modules::sync::syncback::run_syncback;
use crate::utc_now;
use native_db::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pause before the next cycle while folders still have messages to download.
const MORE_TO_SYNC_DELAY: Duration = Duration::from_secs(1);

/// Category roles in message sync order. Categories without a listed role follow.
const CATEGORY_PRIORITY: [CategoryRole; 3] =
    [CategoryRole::Inbox, CategoryRole::Drafts, CategoryRole::Sent];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerCommand {
    SyncNow { reason: String },
    /// The stored account record was edited
    AccountChanged,
    Shutdown,
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct SyncContext {
    pub databases: Arc<DatabaseManager>,
    pub processor: MessageProcessor,
    pub activity: Arc<dyn ActivityOracle>,
}

/// Control side of a running [`SyncWorker`].
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    wake: Arc<Notify>,
    runner: Interruptible,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            debug!("Sync worker already stopped, command dropped");
        }
        self.wake.notify_one();
    }

    pub fn sync_now(&self, reason: &str) {
        self.send(WorkerCommand::SyncNow {
            reason: reason.to_string(),
        });
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Stops the worker and waits for it. `force` abandons the running
    /// operation instead of waiting for its next suspension point.
    pub async fn stop(self, force: bool) {
        self.send(WorkerCommand::Shutdown);
        self.runner.interrupt(force).await;
        let _ = self.join_handle.await;
    }
}

/// Owns the connection of one account and drives its sync cycles.
pub struct SyncWorker<K: Connector> {
    account: Arc<Account>,
    db: Arc<Database<'static>>,
    context: SyncContext,
    connector: Arc<K>,
    connection: K::Connection,
    runner: Interruptible,
    wake: Arc<Notify>,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    last_cycle: Option<Instant>,
    idle_ready: bool,
}

enum Flow {
    Continue,
    Stop,
}

impl<K: Connector> SyncWorker<K> {
    /// Spawns the worker. The first cycle starts right away.
    pub fn spawn(
        account: Account,
        context: SyncContext,
        connector: Arc<K>,
    ) -> MailSyncResult<WorkerHandle> {
        let db = context.databases.account_db(account.id)?;
        let (sender, commands) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());
        let runner = Interruptible::new();
        let worker = SyncWorker {
            connection: connector.create(&account),
            account: Arc::new(account),
            db,
            context,
            connector,
            runner: runner.clone(),
            wake: wake.clone(),
            commands,
            last_cycle: None,
            idle_ready: false,
        };
        let join_handle = tokio::spawn(worker.run());
        Ok(WorkerHandle {
            commands: sender,
            wake,
            runner,
            join_handle,
        })
    }

    fn id(&self) -> u64 {
        self.account.id
    }

    async fn run(mut self) {
        info!("Account {}: sync worker started", self.id());
        let mut pending = Some("Initial".to_string());
        loop {
            while let Ok(command) = self.commands.try_recv() {
                if let Flow::Stop = self.apply(command, &mut pending).await {
                    return self.cleanup().await;
                }
            }

            if let Some(reason) = pending.take() {
                self.sync_cycle(&reason).await;
                continue;
            }

            let delay = self.next_sync_delay().await;
            if delay.is_some_and(|d| d.is_zero()) {
                pending = Some("Scheduled".into());
                continue;
            }

            if self.idle_ready && self.connection.is_connected() {
                if let Some(reason) = self.idle(delay).await {
                    pending = Some(reason.into());
                }
                continue;
            }

            let timer = async {
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => futures::future::pending::<()>().await,
                }
            };
            tokio::select! {
                command = self.commands.recv() => {
                    let command = command.unwrap_or(WorkerCommand::Shutdown);
                    if let Flow::Stop = self.apply(command, &mut pending).await {
                        return self.cleanup().await;
                    }
                }
                _ = timer => pending = Some("Scheduled".into()),
                _ = self.wake.notified() => {}
            }
        }
    }

    async fn apply(&mut self, command: WorkerCommand, pending: &mut Option<String>) -> Flow {
        match command {
            WorkerCommand::SyncNow { reason } => {
                *pending = Some(reason);
            }
            WorkerCommand::AccountChanged => {
                self.reload_account().await;
                *pending = Some("Account changed".into());
            }
            WorkerCommand::Shutdown => return Flow::Stop,
        }
        Flow::Continue
    }

    async fn reload_account(&mut self) {
        let account = match Account::get(self.context.databases.meta_db(), self.id()).await {
            Ok(account) => account,
            Err(e) => {
                warn!("Account {}: failed to reload account: {:#?}", self.id(), e);
                return;
            }
        };
        if account.imap != self.account.imap || account.provider != self.account.provider {
            info!(
                "Account {}: connection settings changed, reconnecting",
                self.id()
            );
            self.connection.end().await;
            self.connection = self.connector.create(&account);
            self.idle_ready = false;
        }
        self.account = Arc::new(account);
    }

    async fn cleanup(&mut self) {
        self.connection.end().await;
        self.idle_ready = false;
        info!("Account {}: sync worker stopped", self.id());
    }

    async fn sync_cycle(&mut self, reason: &str) {
        info!("Account {}: sync started ({})", self.id(), reason);
        self.idle_ready = false;
        let runner = self.runner.clone();
        let this = &mut *self;
        let result = runner
            .run(|token| async move { this.cycle(&token).await })
            .await;
        self.last_cycle = Some(Instant::now());

        match result {
            Ok(RunOutcome::Completed(())) => {
                info!("Account {}: sync cycle completed", self.id());
                self.after_sync().await;
            }
            Ok(RunOutcome::Interrupted) => {
                info!("Account {}: sync cycle interrupted", self.id());
            }
            Err(e) => self.on_sync_error(e).await,
        }
    }

    async fn cycle(&mut self, token: &InterruptToken) -> MailSyncResult<()> {
        let meta = self.context.databases.meta_db().clone();
        let started = utc_now!();
        let account = token
            .step(Account::update_sync_status(&meta, self.id(), move |status| {
                status.sync_error = None;
                status.last_sync_started = Some(started);
            }))
            .await?;
        self.account = Arc::new(account);

        if !self.connection.is_connected() {
            token.step(self.connection.connect()).await?;
        }

        sync_folders(token, &self.account, &self.db, &mut self.connection).await?;

        let categories = token.step(Category::list_all(&self.db)).await?;
        for category in prioritized(categories, self.account.is_gmail()) {
            let name = category.name.clone();
            match sync_category(
                token,
                &self.account,
                &self.db,
                &mut self.connection,
                &self.context.processor,
                category,
            )
            .await
            {
                Ok(report) => debug!("Account {} '{}': {:?}", self.id(), name, report),
                Err(e) if e.is_interrupted() || is_connection_error(&e) => return Err(e),
                Err(e) => error!(
                    "Account {} '{}': category sync failed: {:#?}",
                    self.id(),
                    name,
                    e
                ),
            }
        }

        let report = run_syncback(token, &self.account, &self.db, &mut self.connection).await?;
        if report.succeeded + report.failed > 0 {
            info!("Account {}: syncback {:?}", self.id(), report);
        }

        let completed = utc_now!();
        let account = token
            .step(Account::update_sync_status(&meta, self.id(), move |status| {
                status.record_completion(completed);
            }))
            .await?;
        self.account = Arc::new(account);
        Ok(())
    }

    async fn after_sync(&mut self) {
        match self.account.sync_policy.after_sync {
            AfterSync::Close => {
                self.connection.end().await;
            }
            AfterSync::Idle => {
                let runner = self.runner.clone();
                let this = &mut *self;
                let result = runner
                    .run(|token| async move { this.open_idle_box(&token).await })
                    .await;
                match result {
                    Ok(RunOutcome::Completed(ready)) => self.idle_ready = ready,
                    Ok(RunOutcome::Interrupted) => {}
                    Err(e) => {
                        warn!("Account {}: cannot prepare IDLE: {:#?}", self.id(), e);
                        self.connection.end().await;
                    }
                }
            }
        }
    }

    async fn open_idle_box(&mut self, token: &InterruptToken) -> MailSyncResult<bool> {
        let mut idle_box = token
            .step(Category::find_by_role(&self.db, CategoryRole::All))
            .await?;
        if idle_box.is_none() {
            idle_box = token
                .step(Category::find_by_role(&self.db, CategoryRole::Inbox))
                .await?;
        }
        let Some(idle_box) = idle_box else {
            debug!("Account {}: no folder to idle on", self.id());
            return Ok(false);
        };
        token
            .step(self.connection.open_box(&idle_box.name, true))
            .await?;
        info!("Account {}: idling on '{}'", self.id(), idle_box.name);
        Ok(true)
    }

    /// Waits for a push notification, a local wake-up or the next scheduled
    /// sync. Returns the reason for a new cycle, if one is due.
    async fn idle(&mut self, delay: Option<Duration>) -> Option<&'static str> {
        let max_idle = Duration::from_secs(SETTINGS.mailsync_idle_timeout_secs);
        let timeout = delay.map_or(max_idle, |delay| delay.min(max_idle));
        let runner = self.runner.clone();
        let wake = self.wake.clone();
        let connection = &mut self.connection;
        let result = runner
            .run(|token| async move { token.step(connection.idle(timeout, &wake)).await })
            .await;
        match result {
            Ok(RunOutcome::Completed(IdleEvent::NewMail | IdleEvent::Update)) => {
                Some("IMAP IDLE fired")
            }
            Ok(RunOutcome::Completed(IdleEvent::Timeout)) => None,
            Ok(RunOutcome::Completed(IdleEvent::Interrupted)) | Ok(RunOutcome::Interrupted) => {
                None
            }
            Err(e) if e.is_retryable() => None,
            Err(e) => {
                warn!("Account {}: IDLE failed: {:#?}", self.id(), e);
                self.connection.end().await;
                self.idle_ready = false;
                None
            }
        }
    }

    async fn on_sync_error(&mut self, e: MailSyncError) {
        error!("Account {}: error while syncing: {:#?}", self.id(), e);
        self.connection.end().await;
        self.idle_ready = false;
        if e.is_retryable() {
            return;
        }
        let info = SyncErrorInfo::from(&e);
        if let Err(e) = Account::update_sync_status(
            self.context.databases.meta_db(),
            self.id(),
            move |status| status.sync_error = Some(info),
        )
        .await
        {
            error!("Account {}: failed to store sync error: {:#?}", self.id(), e);
        }
    }

    async fn next_sync_delay(&self) -> Option<Duration> {
        let more_to_sync = match Category::list_all(&self.db).await {
            Ok(categories) => categories
                .iter()
                .filter(|c| c.category_type == CategoryType::Folder)
                .any(|c| c.sync_state.has_more_to_sync()),
            Err(e) => {
                warn!("Account {}: cannot read folder state: {:#?}", self.id(), e);
                false
            }
        };
        let active = self.context.activity.is_active(self.id());
        let since_last = self
            .last_cycle
            .map_or(Duration::MAX, |last| last.elapsed());
        let delay = next_sync_delay(&self.account.sync_policy, active, more_to_sync, since_last);
        debug!(
            "Account {}: next sync in {:?} (active: {}, more to sync: {})",
            self.id(),
            delay,
            active,
            more_to_sync
        );
        delay
    }
}

/// Time until the next cycle, `None` when only push notifications or
/// explicit requests should start one.
pub fn next_sync_delay(
    policy: &SyncPolicy,
    active: bool,
    more_to_sync: bool,
    since_last: Duration,
) -> Option<Duration> {
    let interval = if more_to_sync {
        Some(MORE_TO_SYNC_DELAY)
    } else if active {
        policy.interval_active_secs.map(Duration::from_secs)
    } else {
        policy.interval_inactive_secs.map(Duration::from_secs)
    }?;
    Some(interval.saturating_sub(since_last))
}

/// Folder-type categories in sync order. On Gmail the inbox is a label, so
/// the all-mail folder takes its place.
fn prioritized(categories: Vec<Category>, gmail: bool) -> Vec<Category> {
    let rank = |c: &Category| match c.role {
        Some(CategoryRole::All) if gmail => 0,
        Some(role) => CATEGORY_PRIORITY
            .iter()
            .position(|p| *p == role)
            .unwrap_or(CATEGORY_PRIORITY.len()),
        None => CATEGORY_PRIORITY.len(),
    };
    let mut folders: Vec<Category> = categories
        .into_iter()
        .filter(|c| c.category_type == CategoryType::Folder)
        .collect();
    folders.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name)));
    folders
}

fn is_connection_error(e: &MailSyncError) -> bool {
    matches!(
        e.code(),
        ErrorCode::NetworkError | ErrorCode::ConnectionTimeout | ErrorCode::ImapAuthenticationFailed
    )
}
