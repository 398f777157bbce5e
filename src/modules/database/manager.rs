// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::database::{ACCOUNT_MODELS, META_MODELS};
use crate::modules::error::{code::ErrorCode, MailSyncError, MailSyncResult};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use crate::raise_error;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use native_db::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const MIN_CACHE_SIZE: usize = 67108864;

/// Owns the shared account directory and one isolated store per account.
pub struct DatabaseManager {
    /// Account directory
    meta_db: Arc<Database<'static>>,
    /// Per-account stores, opened on first use
    account_dbs: DashMap<u64, Arc<Database<'static>>>,
    /// `None` keeps every store in memory
    accounts_dir: Option<PathBuf>,
}

impl DatabaseManager {
    /// Opens the stores configured in the settings.
    pub fn open() -> MailSyncResult<Self> {
        if SETTINGS.mailsync_memory_mode_enabled {
            warn!("Memory mode enabled: no account or message data will survive a restart");
            return Self::in_memory();
        }
        info!("Opening account directory at: {:?}", &DATA_DIR_MANAGER.meta_db);
        let mut database = Builder::new()
            .set_cache_size(
                SETTINGS
                    .mailsync_metadata_cache_size
                    .unwrap_or(67108864)
                    .max(MIN_CACHE_SIZE),
            ) //default 64MB
            .create(&META_MODELS, DATA_DIR_MANAGER.meta_db.clone())
            .map_err(Self::handle_database_error)?;
        database
            .compact()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(Self {
            meta_db: Arc::new(database),
            account_dbs: DashMap::new(),
            accounts_dir: Some(DATA_DIR_MANAGER.accounts_dir.clone()),
        })
    }

    pub fn in_memory() -> MailSyncResult<Self> {
        let meta_db = Builder::new()
            .create_in_memory(&META_MODELS)
            .map_err(Self::handle_database_error)?;
        Ok(Self {
            meta_db: Arc::new(meta_db),
            account_dbs: DashMap::new(),
            accounts_dir: None,
        })
    }

    pub fn meta_db(&self) -> &Arc<Database<'static>> {
        &self.meta_db
    }

    /// The isolated store of `account_id`, created on first access.
    pub fn account_db(&self, account_id: u64) -> MailSyncResult<Arc<Database<'static>>> {
        if let Some(db) = self.account_dbs.get(&account_id) {
            return Ok(db.clone());
        }
        let entry = self.account_dbs.entry(account_id);
        let db = match entry {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(vacant) => {
                let database = Arc::new(self.open_account_database(account_id)?);
                vacant.insert(database.clone());
                database
            }
        };
        Ok(db)
    }

    fn open_account_database(&self, account_id: u64) -> MailSyncResult<Database<'static>> {
        match &self.accounts_dir {
            None => Builder::new()
                .create_in_memory(&ACCOUNT_MODELS)
                .map_err(Self::handle_database_error),
            Some(dir) => {
                let path = dir.join(format!("{}.db", account_id));
                info!("Account {}: opening local store at {:?}", account_id, path);
                Builder::new()
                    .set_cache_size(
                        SETTINGS
                            .mailsync_account_store_cache_size
                            .unwrap_or(134217728)
                            .max(MIN_CACHE_SIZE),
                    ) //default 128MB
                    .create(&ACCOUNT_MODELS, path)
                    .map_err(Self::handle_database_error)
            }
        }
    }

    /// Drops the store of a removed account and deletes its file.
    pub fn remove_account_db(&self, account_id: u64) -> MailSyncResult<()> {
        let removed = self.account_dbs.remove(&account_id);
        if let Some((_, db)) = removed {
            if Arc::strong_count(&db) > 1 {
                warn!(
                    "Account {}: store is still referenced while being removed",
                    account_id
                );
            }
        }
        if let Some(dir) = &self.accounts_dir {
            let path = dir.join(format!("{}.db", account_id));
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                info!("Account {}: deleted local store {:?}", account_id, path);
            }
        }
        Ok(())
    }

    fn handle_database_error(error: native_db::db_type::Error) -> MailSyncError {
        match error {
            native_db::db_type::Error::RedbDatabaseError(database_error) => match database_error {
                redb::DatabaseError::DatabaseAlreadyOpen => {
                    raise_error!(
                        "Database is already open by another instance".into(),
                        ErrorCode::InternalError
                    )
                }
                other => {
                    raise_error!(
                        format!("Database error: {:?}", other),
                        ErrorCode::InternalError
                    )
                }
            },
            other => {
                raise_error!(
                    format!("Failed to create database: {:?}", other),
                    ErrorCode::InternalError
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_db_is_cached_and_removed() {
        let manager = DatabaseManager::in_memory().unwrap();
        let first = manager.account_db(7).unwrap();
        let second = manager.account_db(7).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = manager.account_db(8).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));

        manager.remove_account_db(7).unwrap();
        let reopened = manager.account_db(7).unwrap();
        assert!(!Arc::ptr_eq(&first, &reopened));
    }
}
