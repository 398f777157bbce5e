// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use async_imap::types::Flag;
use serde::{Deserialize, Serialize};

/// A message flag as reported by, or sent to, the server.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum MessageFlag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    MayCreate,
    Custom(String),
}

impl MessageFlag {
    pub fn to_imap_string(&self) -> String {
        match self {
            MessageFlag::Seen => "\\Seen".into(),
            MessageFlag::Answered => "\\Answered".into(),
            MessageFlag::Flagged => "\\Flagged".into(),
            MessageFlag::Deleted => "\\Deleted".into(),
            MessageFlag::Draft => "\\Draft".into(),
            MessageFlag::Recent => "\\Recent".into(),
            MessageFlag::MayCreate => "\\*".into(),
            MessageFlag::Custom(custom) => custom.clone(),
        }
    }

    /// Builds the parenthesized list used by `UID STORE`.
    pub fn to_store_list(flags: &[MessageFlag]) -> String {
        let joined = flags
            .iter()
            .map(|flag| flag.to_imap_string())
            .collect::<Vec<_>>()
            .join(" ");
        format!("({})", joined)
    }
}

impl<'a> From<Flag<'a>> for MessageFlag {
    fn from(value: Flag<'a>) -> Self {
        match value {
            Flag::Seen => MessageFlag::Seen,
            Flag::Answered => MessageFlag::Answered,
            Flag::Flagged => MessageFlag::Flagged,
            Flag::Deleted => MessageFlag::Deleted,
            Flag::Draft => MessageFlag::Draft,
            Flag::Recent => MessageFlag::Recent,
            Flag::MayCreate => MessageFlag::MayCreate,
            Flag::Custom(s) => MessageFlag::Custom(s.to_string()),
        }
    }
}

/// Read and starred state derived from a flag list.
pub fn unread_and_starred(flags: &[MessageFlag]) -> (bool, bool) {
    let unread = !flags.contains(&MessageFlag::Seen);
    let starred = flags.contains(&MessageFlag::Flagged);
    (unread, starred)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_list() {
        let list = MessageFlag::to_store_list(&[
            MessageFlag::Seen,
            MessageFlag::Custom("$Forwarded".into()),
        ]);
        assert_eq!(list, "(\\Seen $Forwarded)");
    }

    #[test]
    fn test_unread_and_starred() {
        assert_eq!(unread_and_starred(&[]), (true, false));
        assert_eq!(
            unread_and_starred(&[MessageFlag::Seen, MessageFlag::Flagged]),
            (false, true)
        );
    }
}
