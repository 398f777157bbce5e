// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::category::entity::{resolve_label_ids, Category};
use crate::modules::common::AddrVec;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::imap::connection::FetchedMessage;
use crate::modules::imap::flags::{unread_and_starred, MessageFlag};
use crate::modules::message::entity::Message;
use crate::modules::message::file::File;
use crate::modules::utils::hex_digest;
use crate::{raise_error, utc_now};
use mail_parser::{MessageParser, MimeHeaders, PartType};
use regex::Regex;
use std::sync::LazyLock;

const SNIPPET_LENGTH: usize = 100;

static HIDDEN_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style[^>]*>.*?</style>|<script[^>]*>.*?</script>|<head[^>]*>.*?</head>")
        .expect("valid hidden block pattern")
});
static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Body representations the processor is asked to extract.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DesiredPart {
    Html,
    PlainText,
    PgpEncrypted,
}

impl DesiredPart {
    pub const ALL: [DesiredPart; 3] = [
        DesiredPart::Html,
        DesiredPart::PlainText,
        DesiredPart::PgpEncrypted,
    ];
}

#[derive(Debug)]
pub struct ParsedMessage {
    pub message: Message,
    pub files: Vec<File>,
}

/// Turns a downloaded message into a [`Message`] row and its attachment metadata.
///
/// `categories` are all categories of the account, used to resolve Gmail labels.
pub fn parse_message(
    account_id: u64,
    folder: &Category,
    fetched: &FetchedMessage,
    desired: &[DesiredPart],
    categories: &[Category],
) -> MailSyncResult<ParsedMessage> {
    let parsed = MessageParser::new().parse(&fetched.raw).ok_or_else(|| {
        raise_error!(
            format!("UID {}: message is not valid RFC 5322", fetched.uid),
            ErrorCode::MessageParseFailed
        )
    })?;

    let mut html_parts = Vec::new();
    let mut text_parts = Vec::new();
    let mut pgp_parts = Vec::new();
    for part in parsed.parts.iter() {
        if part
            .content_disposition()
            .is_some_and(|disposition| disposition.is_attachment())
        {
            continue;
        }
        let is_pgp = part.content_type().is_some_and(|ct| {
            ct.c_type.eq_ignore_ascii_case("application")
                && ct
                    .c_subtype
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case("pgp-encrypted"))
        });
        match &part.body {
            PartType::Html(html) => html_parts.push(html.to_string()),
            PartType::Text(text) if is_pgp => pgp_parts.push(text.to_string()),
            PartType::Text(text) => text_parts.push(text.to_string()),
            PartType::Binary(bytes) | PartType::InlineBinary(bytes) if is_pgp => {
                pgp_parts.push(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => {}
        }
    }

    let body = if desired.contains(&DesiredPart::Html) && !html_parts.is_empty() {
        html_parts.join("")
    } else if desired.contains(&DesiredPart::PlainText) && !text_parts.is_empty() {
        wrap_plain_text(&text_parts.join("\n"))
    } else if desired.contains(&DesiredPart::PgpEncrypted) && !pgp_parts.is_empty() {
        wrap_plain_text(&pgp_parts.join("\n"))
    } else {
        return Err(raise_error!(
            format!("UID {}: no desired body part found", fetched.uid),
            ErrorCode::MessageParseFailed
        ));
    };

    let from = parsed.from().map(|a| AddrVec::from(a).0).unwrap_or_default();
    let to = parsed.to().map(|a| AddrVec::from(a).0).unwrap_or_default();
    let cc = parsed.cc().map(|a| AddrVec::from(a).0).unwrap_or_default();
    let bcc = parsed.bcc().map(|a| AddrVec::from(a).0).unwrap_or_default();
    let reply_to = parsed
        .reply_to()
        .map(|a| AddrVec::from(a).0)
        .unwrap_or_default();

    let date = parsed
        .date()
        .map(|d| d.to_timestamp() * 1000)
        .or(fetched.internal_date)
        .unwrap_or_else(|| utc_now!());
    let subject = parsed.subject().map(String::from);
    let header_message_id = parsed.message_id().map(String::from);

    let participants: Vec<_> = from
        .iter()
        .chain(to.iter())
        .chain(cc.iter())
        .chain(bcc.iter())
        .collect();
    let id = Message::identity(
        date,
        subject.as_deref(),
        &participants,
        header_message_id.as_deref(),
    );

    let (unread, starred) = unread_and_starred(&fetched.flags);
    let gmail_labels = fetched.gmail_labels.clone().unwrap_or_default();

    let files = parsed
        .attachments()
        .enumerate()
        .map(|(index, part)| File {
            id: hex_digest(&[&id, &index.to_string()]),
            account_id,
            message_id: id.clone(),
            filename: part.attachment_name().map(String::from),
            content_type: part
                .content_type()
                .map(|ct| match ct.c_subtype.as_deref() {
                    Some(subtype) => format!("{}/{}", ct.c_type, subtype),
                    None => ct.c_type.to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".into()),
            size: part.len(),
            content_id: part.content_id().map(String::from),
        })
        .collect();

    let message = Message {
        id,
        account_id,
        header_message_id,
        references: extract_references(&parsed),
        in_reply_to: parsed.in_reply_to().as_text().map(String::from),
        subject,
        snippet: Some(snippet(&body)),
        body: Some(body),
        from,
        to,
        cc,
        bcc,
        reply_to,
        date,
        unread,
        starred,
        draft: fetched.flags.contains(&MessageFlag::Draft),
        folder_id: Some(folder.id),
        folder_imap_uid: Some(fetched.uid),
        label_ids: resolve_label_ids(&gmail_labels, categories),
        gmail_labels,
        gmail_thread_id: fetched.gmail_thread_id.clone(),
        gmail_message_id: fetched.gmail_message_id.clone(),
        thread_id: None,
        is_processed: false,
        updated_at: utc_now!(),
    };
    Ok(ParsedMessage { message, files })
}

fn extract_references(message: &mail_parser::Message<'_>) -> Vec<String> {
    match message.references() {
        mail_parser::HeaderValue::Text(cow) => vec![cow.to_string()],
        mail_parser::HeaderValue::TextList(vec) => vec.iter().map(|cow| cow.to_string()).collect(),
        _ => Vec::new(),
    }
}

pub fn wrap_plain_text(text: &str) -> String {
    format!("<pre>{}</pre>", html_escape::encode_text(text))
}

/// Visible text of `html`, whitespace collapsed, cut to the snippet length.
pub fn snippet(html: &str) -> String {
    let without_blocks = HIDDEN_BLOCKS.replace_all(html, " ");
    let without_tags = TAGS.replace_all(&without_blocks, " ");
    let decoded = html_escape::decode_html_entities(&without_tags);
    let collapsed = WHITESPACE.replace_all(decoded.trim(), " ");
    collapsed.chars().take(SNIPPET_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::category::entity::{CategoryRole, CategoryType};
    use crate::modules::imap::mock::raw_message;

    fn inbox() -> Category {
        Category::new(1, "INBOX", Some("/".into()), CategoryType::Folder, Some(CategoryRole::Inbox))
    }

    #[test]
    fn test_plain_text_body_is_wrapped() {
        let raw = raw_message(
            "a1@x.com",
            "Re: Lunch",
            "Jane <jane@bar.com>",
            &["bob@foo.com"],
            &["a0@x.com"],
            "1 < 2 & fish",
        );
        let fetched = FetchedMessage {
            uid: 9,
            flags: vec![MessageFlag::Seen],
            raw,
            ..Default::default()
        };
        let folder = inbox();
        let parsed = parse_message(1, &folder, &fetched, &DesiredPart::ALL, &[]).unwrap();
        let message = parsed.message;
        assert_eq!(message.header_message_id.as_deref(), Some("a1@x.com"));
        assert_eq!(message.references, vec!["a0@x.com".to_string()]);
        assert_eq!(message.in_reply_to.as_deref(), Some("a0@x.com"));
        assert_eq!(message.subject.as_deref(), Some("Re: Lunch"));
        assert!(message.body.as_deref().unwrap().starts_with("<pre>1 &lt; 2 &amp; fish"));
        assert_eq!(message.snippet.as_deref(), Some("1 < 2 & fish"));
        assert!(!message.unread);
        assert_eq!(message.folder_id, Some(folder.id));
        assert_eq!(message.folder_imap_uid, Some(9));
        assert_eq!(message.from[0].address.as_deref(), Some("jane@bar.com"));
        assert!(parsed.files.is_empty());
    }

    #[test]
    fn test_html_preferred_and_attachments_extracted() {
        let raw = concat!(
            "Message-ID: <h1@x.com>\r\n",
            "Subject: Report\r\n",
            "From: jane@bar.com\r\n",
            "Date: Tue, 1 Jul 2025 10:52:37 +0200\r\n",
            "Content-Type: multipart/mixed; boundary=\"b1\"\r\n\r\n",
            "--b1\r\n",
            "Content-Type: multipart/alternative; boundary=\"b2\"\r\n\r\n",
            "--b2\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "plain version\r\n",
            "--b2\r\n",
            "Content-Type: text/html\r\n\r\n",
            "<html><head><style>p{}</style></head><body><p>Hello   <b>there</b></p></body></html>\r\n",
            "--b2--\r\n",
            "--b1\r\n",
            "Content-Type: application/pdf; name=\"report.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n\r\n",
            "JVBERi0xLjQK\r\n",
            "--b1--\r\n"
        );
        let fetched = FetchedMessage {
            uid: 3,
            raw: raw.as_bytes().to_vec(),
            ..Default::default()
        };
        let parsed = parse_message(1, &inbox(), &fetched, &DesiredPart::ALL, &[]).unwrap();
        assert!(parsed.message.body.as_deref().unwrap().contains("<b>there</b>"));
        assert_eq!(parsed.message.snippet.as_deref(), Some("Hello there"));
        assert!(parsed.message.unread);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].filename.as_deref(), Some("report.pdf"));
        assert_eq!(parsed.files[0].content_type, "application/pdf");
        assert!(parsed.files[0].is_attachment());
    }

    #[test]
    fn test_missing_desired_part_fails() {
        let raw = raw_message("p@x.com", "Hi", "jane@bar.com", &[], &[], "text only");
        let fetched = FetchedMessage {
            uid: 1,
            raw,
            ..Default::default()
        };
        let err = parse_message(1, &inbox(), &fetched, &[DesiredPart::Html], &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MessageParseFailed);
    }

    #[test]
    fn test_snippet_is_truncated() {
        let long = format!("<p>{}</p>", "word ".repeat(60));
        assert_eq!(snippet(&long).chars().count(), SNIPPET_LENGTH);
    }
}
