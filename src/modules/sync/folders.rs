// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::entity::Account;
use crate::modules::category::entity::{Category, CategoryRole, CategoryType};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::MailSyncResult;
use crate::modules::imap::connection::{MailConnection, RemoteBox};
use crate::modules::sync::interruptible::InterruptToken;
use crate::raise_error;
use native_db::Database;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Roles every account is expected to have, assigned by name when no box
/// advertises them.
const BASE_ROLES: [CategoryRole; 4] = [
    CategoryRole::Inbox,
    CategoryRole::Sent,
    CategoryRole::Trash,
    CategoryRole::Spam,
];

/// Gmail system boxes that behave as real folders. Everything else is a label.
const GMAIL_FOLDER_ROLES: [CategoryRole; 3] =
    [CategoryRole::All, CategoryRole::Trash, CategoryRole::Spam];

const LOCALIZED_NAMES: &[(CategoryRole, &[&str])] = &[
    (CategoryRole::Inbox, &["inbox"]),
    (
        CategoryRole::Sent,
        &[
            "sent",
            "sent items",
            "sent mail",
            "sent messages",
            "gesendet",
            "gesendete elemente",
            "envoyés",
            "éléments envoyés",
            "enviados",
            "posta inviata",
        ],
    ),
    (
        CategoryRole::Trash,
        &[
            "trash",
            "deleted",
            "deleted items",
            "deleted messages",
            "papierkorb",
            "gelöschte elemente",
            "corbeille",
            "papelera",
            "cestino",
        ],
    ),
    (
        CategoryRole::Spam,
        &[
            "spam",
            "junk",
            "junk e-mail",
            "junk email",
            "bulk mail",
            "courrier indésirable",
        ],
    ),
];

/// A remote box with its full path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatBox {
    pub path: String,
    pub delimiter: Option<String>,
    pub attributes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FolderPlan {
    pub created: Vec<Category>,
    pub deleted: Vec<Category>,
    pub role_updates: Vec<(u64, Option<CategoryRole>)>,
}

impl FolderPlan {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.role_updates.is_empty()
    }
}

/// Flattens the box tree depth-first. Nodes the server never listed on their
/// own and non-selectable nodes are left out, their children are kept.
pub fn flatten(boxes: &[RemoteBox]) -> Vec<FlatBox> {
    let mut flat = Vec::new();
    let mut stack: Vec<(String, &RemoteBox)> = boxes
        .iter()
        .rev()
        .map(|remote| (remote.name.clone(), remote))
        .collect();

    while let Some((path, remote)) = stack.pop() {
        let delimiter = remote.delimiter.as_deref().unwrap_or("/");
        for child in remote.children.iter().rev() {
            stack.push((format!("{}{}{}", path, delimiter, child.name), child));
        }
        let Some(attributes) = &remote.attributes else {
            continue;
        };
        if remote.has_attribute("\\Noselect") || remote.has_attribute("\\NonExistent") {
            continue;
        }
        flat.push(FlatBox {
            path,
            delimiter: remote.delimiter.clone(),
            attributes: attributes.clone(),
        });
    }
    flat
}

pub fn role_by_attributes(attributes: &[String]) -> Option<CategoryRole> {
    attributes.iter().find_map(|attribute| {
        match attribute.to_ascii_lowercase().as_str() {
            "\\sent" => Some(CategoryRole::Sent),
            "\\drafts" => Some(CategoryRole::Drafts),
            "\\junk" | "\\spam" => Some(CategoryRole::Spam),
            "\\trash" => Some(CategoryRole::Trash),
            "\\all" => Some(CategoryRole::All),
            "\\important" => Some(CategoryRole::Important),
            "\\flagged" => Some(CategoryRole::Flagged),
            "\\inbox" => Some(CategoryRole::Inbox),
            _ => None,
        }
    })
}

fn role_by_name(path: &str) -> Option<CategoryRole> {
    let name = path.trim().to_lowercase();
    LOCALIZED_NAMES
        .iter()
        .find(|(_, names)| names.contains(&name.as_str()))
        .map(|(role, _)| *role)
}

fn category_type(account: &Account, role: Option<CategoryRole>) -> CategoryType {
    if !account.is_gmail() {
        return CategoryType::Folder;
    }
    match role {
        Some(role) if GMAIL_FOLDER_ROLES.contains(&role) => CategoryType::Folder,
        _ => CategoryType::Label,
    }
}

/// Diffs the local categories against the remote listing by name. A renamed
/// box shows up as one deletion plus one creation.
pub fn plan_changes(account: &Account, existing: &[Category], remote: &[FlatBox]) -> FolderPlan {
    let mut plan = FolderPlan::default();
    let mut next: Vec<Category> = Vec::new();
    let mut seen = HashSet::new();

    for remote_box in remote {
        if !seen.insert(remote_box.path.as_str()) {
            continue;
        }
        match existing.iter().find(|c| c.name == remote_box.path) {
            Some(category) => next.push(category.clone()),
            None => {
                let role = role_by_attributes(&remote_box.attributes).or_else(|| {
                    remote_box
                        .path
                        .eq_ignore_ascii_case("INBOX")
                        .then_some(CategoryRole::Inbox)
                });
                let category = Category::new(
                    account.id,
                    &remote_box.path,
                    remote_box.delimiter.clone(),
                    category_type(account, role),
                    role,
                );
                plan.created.push(category.clone());
                next.push(category);
            }
        }
    }

    plan.deleted = existing
        .iter()
        .filter(|c| !seen.contains(c.name.as_str()))
        .cloned()
        .collect();

    let present: HashSet<CategoryRole> = next.iter().filter_map(|c| c.role).collect();
    for role in BASE_ROLES.iter().filter(|role| !present.contains(role)) {
        let candidates: Vec<u64> = next
            .iter()
            .filter(|c| c.role.is_none() && role_by_name(&c.name) == Some(*role))
            .map(|c| c.id)
            .collect();
        let [id] = candidates.as_slice() else {
            continue;
        };
        match plan.created.iter_mut().find(|c| c.id == *id) {
            Some(created) => {
                created.role = Some(*role);
                created.category_type = category_type(account, Some(*role));
            }
            None => plan.role_updates.push((*id, Some(*role))),
        }
    }
    plan
}

/// Reconciles the local categories of `account` with the remote listing.
pub async fn sync_folders<C: MailConnection>(
    token: &InterruptToken,
    account: &Account,
    db: &Arc<Database<'static>>,
    connection: &mut C,
) -> MailSyncResult<FolderPlan> {
    let boxes = token.step(connection.get_boxes()).await?;
    let remote = flatten(&boxes);
    if remote.is_empty() {
        warn!("Account {}: No mailboxes returned from IMAP server.", account.id);
        return Err(raise_error!(
            format!(
                "No mailboxes returned from IMAP server for account {}",
                account.id
            ),
            ErrorCode::ImapUnexpectedResult
        ));
    }
    for remote_box in &remote {
        debug!(
            "Account {}: box '{}' attributes {:?}",
            account.id, remote_box.path, remote_box.attributes
        );
    }

    let existing = token.step(Category::list_all(db)).await?;
    let plan = plan_changes(account, &existing, &remote);
    if plan.is_empty() {
        return Ok(plan);
    }

    token
        .step(Category::apply_changes(
            db,
            plan.created.clone(),
            plan.deleted.iter().map(|c| c.id).collect(),
            plan.role_updates.clone(),
        ))
        .await?;
    info!(
        "Account {}: folder list changed, created {:?}, deleted {:?}, {} role update(s)",
        account.id,
        plan.created.iter().map(|c| &c.name).collect::<Vec<_>>(),
        plan.deleted.iter().map(|c| &c.name).collect::<Vec<_>>(),
        plan.role_updates.len()
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::account::entity::tests::sample_account;
    use crate::modules::account::entity::Provider;
    use crate::modules::database::manager::DatabaseManager;
    use crate::modules::imap::connection::Connector;
    use crate::modules::imap::mock::{MockConnector, MockServer};
    use crate::modules::sync::interruptible::{Interruptible, RunOutcome};

    fn node(name: &str, attributes: Option<&[&str]>, children: Vec<RemoteBox>) -> RemoteBox {
        RemoteBox {
            name: name.into(),
            delimiter: Some("/".into()),
            attributes: attributes.map(|a| a.iter().map(|s| s.to_string()).collect()),
            children,
        }
    }

    async fn run_once<C: MailConnection>(
        runner: &Interruptible,
        account: &Account,
        db: &Arc<Database<'static>>,
        connection: &mut C,
    ) -> FolderPlan {
        match runner
            .run(|token| async move { sync_folders(&token, account, db, connection).await })
            .await
            .unwrap()
        {
            RunOutcome::Completed(plan) => plan,
            RunOutcome::Interrupted => panic!("folder sync interrupted"),
        }
    }

    #[test]
    fn test_flatten_builds_full_paths() {
        let tree = vec![
            node("INBOX", Some(&[]), vec![node("Work", Some(&[]), vec![])]),
            node(
                "[Gmail]",
                Some(&["\\Noselect", "\\HasChildren"]),
                vec![node("All Mail", Some(&["\\All"]), vec![])],
            ),
            node("Partial", None, vec![node("Leaf", Some(&[]), vec![])]),
        ];
        let paths: Vec<String> = flatten(&tree).into_iter().map(|b| b.path).collect();
        assert_eq!(
            paths,
            vec!["INBOX", "INBOX/Work", "[Gmail]/All Mail", "Partial/Leaf"]
        );
    }

    #[test]
    fn test_roles_and_types() {
        let mut gmail = sample_account("jane@gmail.com");
        gmail.provider = Provider::Gmail;
        let remote = vec![
            FlatBox {
                path: "INBOX".into(),
                delimiter: Some("/".into()),
                attributes: vec![],
            },
            FlatBox {
                path: "[Gmail]/All Mail".into(),
                delimiter: Some("/".into()),
                attributes: vec!["\\All".into()],
            },
            FlatBox {
                path: "[Gmail]/Sent Mail".into(),
                delimiter: Some("/".into()),
                attributes: vec!["\\Sent".into()],
            },
            FlatBox {
                path: "Trash".into(),
                delimiter: Some("/".into()),
                attributes: vec![],
            },
        ];
        let plan = plan_changes(&gmail, &[], &remote);
        let find = |name: &str| plan.created.iter().find(|c| c.name == name).unwrap();
        assert_eq!(find("INBOX").role, Some(CategoryRole::Inbox));
        assert_eq!(find("INBOX").category_type, CategoryType::Label);
        assert_eq!(find("[Gmail]/All Mail").category_type, CategoryType::Folder);
        assert_eq!(find("[Gmail]/Sent Mail").role, Some(CategoryRole::Sent));
        assert_eq!(find("Trash").role, Some(CategoryRole::Trash));
        assert_eq!(find("Trash").category_type, CategoryType::Folder);

        let imap = sample_account("jane@example.com");
        let plan = plan_changes(&imap, &[], &remote);
        assert!(plan
            .created
            .iter()
            .all(|c| c.category_type == CategoryType::Folder));
    }

    #[tokio::test]
    async fn test_reconciliation_is_idempotent() {
        let account = sample_account("jane@example.com");
        let databases = DatabaseManager::in_memory().unwrap();
        let db = databases.account_db(account.id).unwrap();
        let connector = MockConnector::new(MockServer::with_boxes(&[
            ("INBOX", &[]),
            ("Sent", &[]),
            ("Archive", &[]),
        ]));
        let mut connection = connector.create(&account);
        connection.connect().await.unwrap();
        let runner = Interruptible::new();

        let first = run_once(&runner, &account, &db, &mut connection).await;
        assert_eq!(first.created.len(), 3);
        let sent = Category::find_by_name(&db, "Sent").await.unwrap().unwrap();
        assert_eq!(sent.role, Some(CategoryRole::Sent));

        let second = run_once(&runner, &account, &db, &mut connection).await;
        assert!(second.created.is_empty());
        assert!(second.deleted.is_empty());
        assert!(second.is_empty());

        connector.server().boxes.retain(|b| b.name != "Archive");
        connector
            .server()
            .boxes
            .push(node("Projects", Some(&[]), vec![]));
        let third = run_once(&runner, &account, &db, &mut connection).await;
        assert_eq!(third.created.len(), 1);
        assert_eq!(third.deleted.len(), 1);
        let names: Vec<String> = Category::list_all(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.contains(&"Projects".to_string()));
        assert!(!names.contains(&"Archive".to_string()));
    }
}
