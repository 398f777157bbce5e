// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::category::entity::Category;
use crate::modules::database::manager::DatabaseManager;
use crate::modules::database::with_rw_transaction;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::{MailSyncError, MailSyncResult};
use crate::modules::message::contact::Contact;
use crate::modules::message::entity::Message;
use crate::modules::message::file::File;
use crate::modules::message::parser::{parse_message, ParsedMessage};
use crate::modules::message::reference::Reference;
use crate::modules::message::tracking::strip_tracking;
use crate::modules::processor::{JobHandler, ProcessJob, ProcessOutcome};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::{DataDirManager, DATA_DIR_MANAGER};
use crate::modules::thread::detect::detect_thread;
use crate::modules::thread::entity::Thread;
use crate::raise_error;
use native_db::transaction::RwTransaction;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Parses jobs and stores messages, threads, references, files and contacts
/// in the account's own database.
pub struct StoreHandler {
    databases: Arc<DatabaseManager>,
    tracking_base: Option<String>,
    /// Where unparsable messages are dumped, `None` disables dumps
    dumps: Option<DataDirManager>,
}

impl StoreHandler {
    pub fn new(databases: Arc<DatabaseManager>) -> Self {
        Self {
            databases,
            tracking_base: SETTINGS
                .mailsync_tracking_base_url
                .clone()
                .filter(|base| !base.trim().is_empty()),
            dumps: SETTINGS
                .mailsync_debug_parse_errors
                .then(|| DATA_DIR_MANAGER.clone()),
        }
    }

    pub fn with_parse_error_dumps(mut self, dirs: DataDirManager) -> Self {
        self.dumps = Some(dirs);
        self
    }

    async fn process(&self, job: &ProcessJob) -> MailSyncResult<String> {
        let account = job.account.clone();
        let db = self.databases.account_db(account.id)?;
        let folder = Category::get(&db, job.category_id).await?;
        let categories = Category::list_all(&db).await?;

        let mut parsed = parse_message(
            account.id,
            &folder,
            &job.message,
            &job.desired_parts,
            &categories,
        )?;

        let sent_by_owner = parsed
            .message
            .from
            .iter()
            .filter_map(|addr| addr.address.as_deref())
            .any(|address| account.is_my_email(address));
        if let (true, Some(base)) = (sent_by_owner, &self.tracking_base) {
            parsed.message.body = parsed
                .message
                .body
                .take()
                .map(|body| strip_tracking(&body, base));
        }

        let date = parsed.message.date;
        let message_id = with_rw_transaction(&db, move |rw| store_parsed(rw, parsed)).await?;

        let mut progress = folder.sync_state.clone();
        if progress.observe_processed_date(date) {
            Category::update_sync_state(&db, folder.id, move |state| {
                state.observe_processed_date(date);
            })
            .await?;
        }
        Ok(message_id)
    }

    async fn on_error(&self, job: &ProcessJob, err: &MailSyncError) {
        let account_id = job.account.id;
        let uid = job.message.uid;
        error!(
            "Account {}: failed to process UID {} of category {}: {:#?}",
            account_id, uid, job.category_id, err
        );

        let db = match self.databases.account_db(account_id) {
            Ok(db) => db,
            Err(e) => {
                warn!("Account {}: cannot record failed UID {}: {:#?}", account_id, uid, e);
                return;
            }
        };
        let recorded = Category::update_sync_state(&db, job.category_id, move |state| {
            state.record_failed_uid(uid)
        })
        .await;
        let category = match recorded {
            Ok(category) => category,
            Err(e) => {
                warn!("Account {}: cannot record failed UID {}: {:#?}", account_id, uid, e);
                return;
            }
        };

        if let Some(dirs) = &self.dumps {
            let path = dirs.parse_error_file(&category.name, uid);
            let payload = serde_json::json!({
                "account_id": account_id,
                "category": category.name,
                "uid": uid,
                "code": err.code(),
                "error": err.to_string(),
                "raw": String::from_utf8_lossy(&job.message.raw),
            });
            if let Err(e) = write_dump(&path, &payload).await {
                warn!(
                    "Account {}: cannot dump UID {} to {:?}: {:#?}",
                    account_id, uid, path, e
                );
            }
        }
    }
}

impl JobHandler for StoreHandler {
    async fn handle(&self, job: ProcessJob) -> ProcessOutcome {
        match self.process(&job).await {
            Ok(message_id) => ProcessOutcome::Processed { message_id },
            Err(e) => {
                self.on_error(&job, &e).await;
                ProcessOutcome::Failed {
                    uid: job.message.uid,
                }
            }
        }
    }
}

async fn write_dump(path: &std::path::Path, payload: &serde_json::Value) -> MailSyncResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
    }
    let content = serde_json::to_vec_pretty(payload)
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))
}

/// Stores a parsed message, branching on whether it is already known.
/// Returns the message id.
pub fn store_parsed(rw: &RwTransaction, parsed: ParsedMessage) -> MailSyncResult<String> {
    let ParsedMessage { message, files } = parsed;
    let existing: Option<Message> = rw
        .get()
        .primary(message.id.clone())
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
    match existing {
        Some(existing) => store_existing(rw, existing, message, files),
        None => {
            debug!("Account {}: storing new message {}", message.account_id, message.id);
            enrich_and_store(rw, message, files)
        }
    }
}

/// Full processing: files, thread, references and contacts.
fn enrich_and_store(
    rw: &RwTransaction,
    mut message: Message,
    files: Vec<File>,
) -> MailSyncResult<String> {
    File::upsert_all(rw, files)?;
    let thread = detect_thread(rw, &message)?;
    Reference::add_missing(
        rw,
        message.account_id,
        &message.thread_reference_ids(),
        &thread.id,
    )?;
    Contact::upsert_all(rw, Contact::extract(message.account_id, &message))?;

    message.thread_id = Some(thread.id.clone());
    message.is_processed = true;
    let id = message.id.clone();
    rw.upsert(message)
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
    rw.upsert(thread)
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
    Ok(id)
}

fn store_existing(
    rw: &RwTransaction,
    mut existing: Message,
    incoming: Message,
    files: Vec<File>,
) -> MailSyncResult<String> {
    existing.merge_remote(&incoming);
    if !existing.is_processed {
        return enrich_and_store(rw, existing, files);
    }

    let thread_id = existing.thread_id.clone().ok_or_else(|| {
        raise_error!(
            format!("Processed message '{}' has no thread", existing.id),
            ErrorCode::IntegrityViolation
        )
    })?;
    let id = existing.id.clone();
    rw.upsert(existing)
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
    Thread::refresh_in(rw, &thread_id)?.ok_or_else(|| {
        raise_error!(
            format!("Message '{}' points at missing thread '{}'", id, thread_id),
            ErrorCode::IntegrityViolation
        )
    })?;
    Ok(id)
}
