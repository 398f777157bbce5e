// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use dashmap::DashMap;
use std::time::Duration;

use crate::utc_now;

const ACTIVE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Answers whether the owner of an account is currently using it.
pub trait ActivityOracle: Send + Sync {
    fn is_active(&self, account_id: u64) -> bool;
}

/// Treats an account as active for a fixed window after it was last marked.
#[derive(Default)]
pub struct RecentActivity {
    last_seen: DashMap<u64, i64>,
}

impl RecentActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_active(&self, account_id: u64) {
        self.last_seen.insert(account_id, utc_now!());
    }

    pub fn forget(&self, account_id: u64) {
        self.last_seen.remove(&account_id);
    }

    fn is_active_at(&self, account_id: u64, now: i64) -> bool {
        self.last_seen
            .get(&account_id)
            .map(|seen| now - *seen < ACTIVE_WINDOW.as_millis() as i64)
            .unwrap_or(false)
    }
}

impl ActivityOracle for RecentActivity {
    fn is_active(&self, account_id: u64) -> bool {
        self.is_active_at(account_id, utc_now!())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_window() {
        let oracle = RecentActivity::new();
        assert!(!oracle.is_active(1));

        oracle.mark_active(1);
        assert!(oracle.is_active(1));
        assert!(!oracle.is_active(2));

        let later = utc_now!() + ACTIVE_WINDOW.as_millis() as i64 + 1;
        assert!(!oracle.is_active_at(1, later));

        oracle.forget(1);
        assert!(!oracle.is_active(1));
    }
}
