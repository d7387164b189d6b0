//! Error taxonomy shared by every tanuki crate.

use std::time::Duration;

/// Coarse classification used by callers (and tests) to decide what to do with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operator input is wrong; never retried.
    Validation,
    /// Remote object is absent.
    NotFound,
    /// Remote object clashes with the declared one; resolve manually.
    Conflict,
    /// A bounded wait ran out of time.
    TimedOut,
    /// The invocation was cancelled by the caller.
    Cancelled,
    /// A wait reached an unexpected state or its probe failed.
    Failed,
    /// Network or HTTP layer failure from the remote API.
    Transport,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TanukiError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("validation: malformed id {input:?}: expected {expected} non-empty part(s) separated by ':', found {found}")]
    MalformedId { input: String, expected: usize, found: usize },

    #[error("not_found: {0}")]
    NotFound(String),

    #[error("conflict: {object}: {detail}")]
    Conflict { object: String, detail: String },

    #[error("timed out after {waited:?} waiting for {what} (last state: {})", .last_state.as_deref().unwrap_or("none"))]
    TimedOut { what: String, waited: Duration, last_state: Option<String> },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("failed waiting for {what}: {reason}")]
    ConvergenceFailed { what: String, state: Option<String>, reason: String },

    #[error("transport: {message}{}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport { status: Option<u16>, message: String },
}

pub type TanukiResult<T> = Result<T, TanukiError>;

impl TanukiError {
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }

    pub fn not_found(what: impl Into<String>) -> Self { Self::NotFound(what.into()) }

    pub fn conflict(object: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Conflict { object: object.into(), detail: detail.into() }
    }

    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport { status, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::MalformedId { .. } => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::ConvergenceFailed { .. } => ErrorKind::Failed,
            Self::Transport { .. } => ErrorKind::Transport,
        }
    }

    pub fn is_not_found(&self) -> bool { self.kind() == ErrorKind::NotFound }

    /// Timeouts and cancellations may succeed if the whole operation is re-applied later.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TimedOut | ErrorKind::Cancelled | ErrorKind::Transport)
    }
}
