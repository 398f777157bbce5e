// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::database::async_find_impl;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::raise_error;
use native_db::transaction::RwTransaction;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Append-only link from an RFC 2822 message id to the thread it belongs to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[native_model(id = 13, version = 1)]
#[native_db]
pub struct Reference {
    #[primary_key]
    pub rfc2822_message_id: String,
    pub account_id: u64,
    pub thread_id: String,
}

impl Reference {
    pub async fn find(
        db: &Arc<Database<'static>>,
        rfc2822_message_id: &str,
    ) -> MailSyncResult<Option<Reference>> {
        async_find_impl(db, rfc2822_message_id.to_string()).await
    }

    /// First stored reference among `ids`, in the order given.
    pub fn find_any(rw: &RwTransaction, ids: &[String]) -> MailSyncResult<Option<Reference>> {
        for id in ids {
            let found: Option<Reference> = rw
                .get()
                .primary(id.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Stores a reference for every id that does not have one yet.
    /// Existing references are never re-pointed.
    pub fn add_missing(
        rw: &RwTransaction,
        account_id: u64,
        ids: &[String],
        thread_id: &str,
    ) -> MailSyncResult<usize> {
        let mut created = 0;
        for id in ids {
            let existing: Option<Reference> = rw
                .get()
                .primary(id.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            if existing.is_none() {
                rw.insert(Reference {
                    rfc2822_message_id: id.clone(),
                    account_id,
                    thread_id: thread_id.to_string(),
                })
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                created += 1;
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::database::manager::DatabaseManager;
    use crate::modules::database::with_rw_transaction;

    #[tokio::test]
    async fn test_add_missing_is_append_only() {
        let manager = DatabaseManager::in_memory().unwrap();
        let db = manager.account_db(1).unwrap();

        let created = with_rw_transaction(&db, |rw| {
            Reference::add_missing(rw, 1, &["a@x".into(), "b@x".into()], "t:1")
        })
        .await
        .unwrap();
        assert_eq!(created, 2);

        let created = with_rw_transaction(&db, |rw| {
            Reference::add_missing(rw, 1, &["b@x".into(), "c@x".into()], "t:2")
        })
        .await
        .unwrap();
        assert_eq!(created, 1);

        let b = Reference::find(&db, "b@x").await.unwrap().unwrap();
        assert_eq!(b.thread_id, "t:1");

        let found = with_rw_transaction(&db, |rw| {
            Reference::find_any(rw, &["zzz".into(), "c@x".into()])
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(found.thread_id, "t:2");
    }
}
