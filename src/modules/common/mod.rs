// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use mail_parser::{Addr as MimeAddr, Address as MimeAddress};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::LazyLock;

pub mod signal;

static NAMED_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:(?P<name>.*)\s*)?<(?P<email>[^<>]+)>"#).expect("valid address pattern")
});

/// A single message participant as it appears in an address header.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default, Serialize, Deserialize)]
pub struct Addr {
    /// Display name, e.g. "John Doe".
    pub name: Option<String>,
    /// Mailbox address, e.g. "john.doe@example.com".
    pub address: Option<String>,
}

impl Addr {
    pub fn new(name: Option<&str>, address: &str) -> Self {
        Self {
            name: name.map(Into::into),
            address: Some(address.into()),
        }
    }

    pub fn parse(s: &str) -> Self {
        if let Some(caps) = NAMED_ADDRESS.captures(s) {
            let name = caps
                .name("name")
                .map(|m| m.as_str().trim().trim_matches('"').trim().to_string())
                .filter(|n| !n.is_empty());
            let address = caps.name("email").map(|m| m.as_str().trim().to_string());
            Addr { name, address }
        } else {
            let trimmed = s.trim();
            Addr {
                name: None,
                address: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            }
        }
    }

    /// Lower-cased address, the form used for identity comparisons.
    pub fn normalized_address(&self) -> Option<String> {
        self.address
            .as_ref()
            .map(|a| a.trim().to_ascii_lowercase())
            .filter(|a| !a.is_empty())
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, &self.address) {
            (Some(name), Some(address)) => write!(f, "{} <{}>", name, address),
            (None, Some(address)) => write!(f, "<{}>", address),
            (Some(name), None) => write!(f, "{}", name),
            (None, None) => write!(f, ""),
        }
    }
}

impl<'x> From<&MimeAddr<'x>> for Addr {
    fn from(original: &MimeAddr<'x>) -> Self {
        Addr {
            name: original.name.as_ref().map(|s| s.to_string()),
            address: original.address.as_ref().map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddrVec(pub Vec<Addr>);

impl Deref for AddrVec {
    type Target = Vec<Addr>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'x> From<&MimeAddress<'x>> for AddrVec {
    fn from(original: &MimeAddress<'x>) -> Self {
        let vec = match original {
            MimeAddress::List(addrs) => addrs.iter().map(Addr::from).collect(),
            MimeAddress::Group(groups) => groups
                .iter()
                .flat_map(|group| group.addresses.iter().map(Addr::from))
                .collect(),
        };
        AddrVec(vec)
    }
}

impl From<AddrVec> for Vec<Addr> {
    fn from(value: AddrVec) -> Self {
        value.0
    }
}
