// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::MailSyncResult;

pub trait Initialize {
    async fn initialize() -> MailSyncResult<()>;
}
