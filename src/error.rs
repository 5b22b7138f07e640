//! Error taxonomy
//!
//! - [`ApiError`]: a hosting API call failed after the retry budget was spent
//!   (status `0` for transport failures)
//! - [`ValidationError`]: malformed policy, ref name or filter; fatal at startup
//! - [`SkipReason`]: not an error, the expected terminal outcome for one repository

use std::fmt;
use thiserror::Error;

/// Upper bound on the error text carried in an [`ApiError`]
pub const MAX_ERROR_MESSAGE_CHARS: usize = 512;

/// A hosting API failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("API error {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: truncate_message(message.into()),
        }
    }

    /// Transport-level failure (DNS, connection reset, timeout)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// 410: the resource is gone, e.g. issues disabled on a repository
    pub fn is_gone(&self) -> bool {
        self.status == 410
    }

    /// 422: the host rejected the payload, e.g. a non-fast-forward ref update
    pub fn is_unprocessable(&self) -> bool {
        self.status == 422
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }
}

fn truncate_message(message: String) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return message;
    }
    let mut truncated: String = message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Malformed configuration that makes every repository's processing meaningless
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{label} is empty")]
    Empty { label: String },

    #[error("{label} `{value}` is not a valid ref name: {reason}")]
    InvalidRefName {
        label: String,
        value: String,
        reason: &'static str,
    },

    #[error("branch policy: {0}")]
    Policy(String),

    #[error("missing value for `{0}`")]
    MissingValue(String),

    #[error("invalid repository filter `{0}`")]
    InvalidRepoFilter(String),

    #[error("invalid exclusion pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Why a repository ended its run early
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MetadataUnavailable { status: u16 },
    ArchivedOrDisabled,
    NotAFork,
    NoMirrorBranch,
    RefLookupFailed { status: u16 },
    MirrorSyncFailed { status: u16 },
    BootstrapFailed { status: u16 },
    PromotionFailed { status: u16 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MetadataUnavailable { status } => {
                write!(f, "failed to fetch repo metadata ({})", status)
            }
            SkipReason::ArchivedOrDisabled => f.write_str("archived or disabled"),
            SkipReason::NotAFork => f.write_str("not a fork or missing upstream"),
            SkipReason::NoMirrorBranch => f.write_str("no mirror branch candidate exists"),
            SkipReason::RefLookupFailed { status } => {
                write!(f, "failed to read branch refs ({})", status)
            }
            SkipReason::MirrorSyncFailed { status } => {
                write!(f, "mirror sync failed ({})", status)
            }
            SkipReason::BootstrapFailed { status } => {
                write!(f, "branch bootstrap failed ({})", status)
            }
            SkipReason::PromotionFailed { status } => {
                write!(f, "branch promotion failed ({})", status)
            }
        }
    }
}
