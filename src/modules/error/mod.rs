// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use code::ErrorCode;
use snafu::{Location, Snafu};

pub mod code;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MailSyncError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
}

pub type MailSyncResult<T, E = MailSyncError> = std::result::Result<T, E>;

impl MailSyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MailSyncError::Generic { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            MailSyncError::Generic { message, .. } => message,
        }
    }

    /// A deliberate cancellation rather than a failure of the work itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), ErrorCode::Retryable)
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        matches!(self.code(), ErrorCode::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raise_error;

    #[test]
    fn test_error_code_accessors() {
        let err = raise_error!("Forcefully interrupted".into(), ErrorCode::Retryable);
        assert!(err.is_retryable());
        assert!(!err.is_interrupted());
        assert_eq!(err.message(), "Forcefully interrupted");
        assert_eq!(err.to_string(), "Forcefully interrupted");

        let err = raise_error!("boom".into(), ErrorCode::ImapCommandFailed);
        assert!(!err.is_retryable());
        assert_eq!(err.code() as u32, 50000);
    }
}
