// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::common::Addr;
use crate::modules::database::list_all_impl;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::message::entity::Message;
use crate::{calculate_hash, raise_error, utc_now};
use native_db::transaction::RwTransaction;
use native_db::*;
use native_model::{native_model, Model};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

const MAX_CONTACT_EMAIL_LENGTH: usize = 100;

static AUTOMATED_LOCAL_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(no[-_.]?reply|do[-_.]?not[-_.]?reply|mailer[-_.]?daemon|bounces?|notifications?|postmaster)([-_.+].*)?$",
    )
    .expect("valid automated sender pattern")
});

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[native_model(id = 14, version = 1)]
#[native_db]
pub struct Contact {
    /// Hash of name and email
    #[primary_key]
    pub id: u64,
    pub account_id: u64,
    pub name: Option<String>,
    #[secondary_key]
    pub email: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Contact {
    pub fn contact_id(name: Option<&str>, email: &str) -> u64 {
        calculate_hash!(&format!("{}|{}", name.unwrap_or_default(), email))
    }

    /// Auto-generated senders and overlong addresses are not worth keeping.
    pub fn is_meaningless(email: &str) -> bool {
        if email.len() > MAX_CONTACT_EMAIL_LENGTH {
            return true;
        }
        match email.split_once('@') {
            None => true,
            Some((local, _)) => AUTOMATED_LOCAL_PART.is_match(local),
        }
    }

    /// Distinct, meaningful contacts found in the address headers of `message`.
    pub fn extract(account_id: u64, message: &Message) -> Vec<Contact> {
        let now = utc_now!();
        let mut seen = HashSet::new();
        message
            .participants()
            .filter_map(|addr: &Addr| {
                let email = addr.normalized_address()?;
                if Self::is_meaningless(&email) {
                    return None;
                }
                let name = addr.name.clone().filter(|n| !n.trim().is_empty());
                let id = Self::contact_id(name.as_deref(), &email);
                seen.insert(id).then(|| Contact {
                    id,
                    account_id,
                    name,
                    email,
                    created_at: now,
                    updated_at: now,
                })
            })
            .collect()
    }

    /// Upserts `contacts`, keeping the original creation time of known ones.
    pub fn upsert_all(rw: &RwTransaction, contacts: Vec<Contact>) -> MailSyncResult<()> {
        for contact in contacts {
            let existing: Option<Contact> = rw
                .get()
                .primary(contact.id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            let contact = match existing {
                Some(existing) => Contact {
                    created_at: existing.created_at,
                    ..contact
                },
                None => contact,
            };
            rw.upsert(contact)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        }
        Ok(())
    }

    pub async fn list_all(db: &Arc<Database<'static>>) -> MailSyncResult<Vec<Contact>> {
        list_all_impl(db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meaningless_contacts() {
        assert!(Contact::is_meaningless("no-reply@foo.com"));
        assert!(Contact::is_meaningless("noreply@foo.com"));
        assert!(Contact::is_meaningless("do_not_reply@foo.com"));
        assert!(Contact::is_meaningless("MAILER-DAEMON@foo.com"));
        assert!(Contact::is_meaningless("notifications+abc@github.com"));
        assert!(Contact::is_meaningless("not-an-address"));
        assert!(Contact::is_meaningless(&format!("{}@foo.com", "a".repeat(100))));
        assert!(!Contact::is_meaningless("jane@bar.com"));
        assert!(!Contact::is_meaningless("bouncer.jim@bar.com"));
    }

    #[test]
    fn test_extract_skips_automated_senders() {
        let message = Message {
            from: vec![Addr::new(Some("Jane"), "Jane@bar.com")],
            to: vec![
                Addr::new(None, "no-reply@foo.com"),
                Addr::new(Some("Jane"), "jane@bar.com"),
            ],
            ..Default::default()
        };
        let contacts = Contact::extract(1, &message);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].email, "jane@bar.com");
        assert_eq!(contacts[0].name.as_deref(), Some("Jane"));
    }
}
