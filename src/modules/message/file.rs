// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::raise_error;
use native_db::transaction::RwTransaction;
use itertools::Itertools;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

/// Attachment metadata extracted from a processed message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[native_model(id = 15, version = 1)]
#[native_db]
pub struct File {
    #[primary_key]
    pub id: String,
    pub account_id: u64,
    #[secondary_key]
    pub message_id: String,
    pub filename: Option<String>,
    pub content_type: String,
    pub size: usize,
    /// Set for inline parts referenced from the body
    pub content_id: Option<String>,
}

impl File {
    /// A file the user would see as an attachment, as opposed to an inline part.
    pub fn is_attachment(&self) -> bool {
        self.content_id.is_none()
    }

    pub fn message_files(rw: &RwTransaction, message_id: &str) -> MailSyncResult<Vec<File>> {
        let files: Vec<File> = rw
            .scan()
            .secondary::<File>(FileKey::message_id)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .start_with(message_id.to_string())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(files
            .into_iter()
            .filter(|f| f.message_id == message_id)
            .collect())
    }

    pub fn upsert_all(rw: &RwTransaction, files: Vec<File>) -> MailSyncResult<()> {
        for file in files {
            rw.upsert(file)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        }
        Ok(())
    }
}
