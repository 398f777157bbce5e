// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::context::Initialize;
use crate::modules::settings::cli::SETTINGS;
use crate::{modules::error::MailSyncResult, raise_error};
use crate::modules::error::code::ErrorCode;
use std::path::PathBuf;
use std::sync::LazyLock;

pub const META_FILE: &str = "meta.db";
const ACCOUNTS_DIR: &str = "accounts";
const PARSE_ERRORS_DIR: &str = "parse-errors";
const LOG_DIR: &str = "logs";

pub static DATA_DIR_MANAGER: LazyLock<DataDirManager> =
    LazyLock::new(|| DataDirManager::new(PathBuf::from(&SETTINGS.mailsync_root_dir)));

#[derive(Clone, Debug)]
pub struct DataDirManager {
    pub root_dir: PathBuf,
    pub meta_db: PathBuf,
    pub accounts_dir: PathBuf,
    pub parse_errors: PathBuf,
    pub log_dir: PathBuf,
}

impl Initialize for DataDirManager {
    async fn initialize() -> MailSyncResult<()> {
        for dir in [
            &DATA_DIR_MANAGER.root_dir,
            &DATA_DIR_MANAGER.accounts_dir,
            &DATA_DIR_MANAGER.parse_errors,
            &DATA_DIR_MANAGER.log_dir,
        ] {
            std::fs::create_dir_all(dir)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        }
        Ok(())
    }
}

impl DataDirManager {
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir: root_dir.clone(),
            meta_db: root_dir.join(META_FILE),
            accounts_dir: root_dir.join(ACCOUNTS_DIR),
            parse_errors: root_dir.join(PARSE_ERRORS_DIR),
            log_dir: root_dir.join(LOG_DIR),
        }
    }

    /// File backing the isolated store of one account.
    pub fn account_db(&self, account_id: u64) -> PathBuf {
        self.accounts_dir.join(format!("{}.db", account_id))
    }

    /// Where the raw payload of an unparsable message is dumped.
    pub fn parse_error_file(&self, category_name: &str, uid: u32) -> PathBuf {
        let folder: String = category_name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                other => other,
            })
            .collect();
        self.parse_errors.join(folder).join(format!("{}.json", uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DataDirManager::new(dir.path().to_path_buf());
        assert_eq!(manager.meta_db, dir.path().join("meta.db"));
        assert_eq!(
            manager.account_db(42),
            dir.path().join("accounts").join("42.db")
        );
        assert_eq!(
            manager.parse_error_file("[Gmail]/All Mail", 7),
            dir.path()
                .join("parse-errors")
                .join("[Gmail]_All Mail")
                .join("7.json")
        );
    }
}
