//! Processing Error Types
//!
//! Every failure the processor can observe is folded into [`ProcessError`],
//! tagged with a [`FailureKind`], and classified by [`classify`].

use std::fmt;
use thiserror::Error;

use crate::core_types::AccountId;
use crate::queue::QueueError;
use crate::store::StoreError;
use crate::transaction::DecodeError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    // === Input Errors ===
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Unrecognized transaction kind: {0}")]
    UnrecognizedKind(String),

    #[error("Balance overflow on account {0}")]
    Overflow(AccountId),

    // === Store Errors ===
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Store error: {0}")]
    Store(String),

    // === Settlement Errors ===
    /// The queue rejected a reschedule, dead-letter or abandon signal
    #[error("Queue signal failed: {0}")]
    Queue(#[from] QueueError),
}

impl ProcessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessError::Decode(_) => FailureKind::Decode,
            ProcessError::AccountNotFound(_) => FailureKind::AccountNotFound,
            ProcessError::UnrecognizedKind(_) => FailureKind::UnrecognizedKind,
            ProcessError::ConcurrencyConflict(_) => FailureKind::ConcurrencyConflict,
            ProcessError::Timeout(_) => FailureKind::Timeout,
            ProcessError::Unavailable(_) => FailureKind::Unavailable,
            ProcessError::InvalidOperation(_) => FailureKind::InvalidOperation,
            ProcessError::Overflow(_) | ProcessError::Store(_) => FailureKind::Unclassified,
            ProcessError::Queue(err) => match err {
                QueueError::Timeout(_) => FailureKind::Timeout,
                QueueError::Unavailable(_) => FailureKind::Unavailable,
                QueueError::InvalidOperation(_) | QueueError::LockLost(_) => {
                    FailureKind::InvalidOperation
                }
                QueueError::Other(_) => FailureKind::Unclassified,
            },
        }
    }

    /// Stable code for log fields and dead-letter reasons
    pub fn code(&self) -> &'static str {
        match self {
            ProcessError::Decode(_) => "DECODE_ERROR",
            ProcessError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            ProcessError::UnrecognizedKind(_) => "UNRECOGNIZED_KIND",
            ProcessError::Overflow(_) => "BALANCE_OVERFLOW",
            ProcessError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            ProcessError::Timeout(_) => "TIMEOUT",
            ProcessError::Unavailable(_) => "UNAVAILABLE",
            ProcessError::InvalidOperation(_) => "INVALID_OPERATION",
            ProcessError::Store(_) => "STORE_ERROR",
            ProcessError::Queue(_) => "QUEUE_ERROR",
        }
    }
}

impl From<StoreError> for ProcessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict(msg) => ProcessError::ConcurrencyConflict(msg),
            StoreError::Timeout(msg) => ProcessError::Timeout(msg),
            StoreError::Unavailable(msg) => ProcessError::Unavailable(msg),
            StoreError::InvalidOperation(msg) => ProcessError::InvalidOperation(msg),
            StoreError::Other(msg) => ProcessError::Store(msg),
        }
    }
}

/// Closed set of failure tags the classifier understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Decode,
    AccountNotFound,
    UnrecognizedKind,
    ConcurrencyConflict,
    Timeout,
    Unavailable,
    InvalidOperation,
    Unclassified,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "DECODE",
            FailureKind::AccountNotFound => "ACCOUNT_NOT_FOUND",
            FailureKind::UnrecognizedKind => "UNRECOGNIZED_KIND",
            FailureKind::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Unavailable => "UNAVAILABLE",
            FailureKind::InvalidOperation => "INVALID_OPERATION",
            FailureKind::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retrying cannot help
    Permanent,
    /// May succeed on a later attempt
    Transient,
}

pub fn classify(kind: FailureKind) -> FailureClass {
    match kind {
        FailureKind::ConcurrencyConflict
        | FailureKind::Timeout
        | FailureKind::Unavailable
        | FailureKind::InvalidOperation => FailureClass::Transient,
        FailureKind::Decode
        | FailureKind::AccountNotFound
        | FailureKind::UnrecognizedKind
        | FailureKind::Unclassified => FailureClass::Permanent,
    }
}

/// Why a message ended in the dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The failure can never succeed
    Permanent(FailureKind),
    /// Transient failure, but the attempt limit was exceeded
    AttemptsExhausted { kind: FailureKind, attempt: u32 },
    /// Transient failure under a policy that does not retry
    NotRetried(FailureKind),
    /// A save timed out and its outcome could not be read back
    CommitUncertain(FailureKind),
}

impl DeadLetterReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            DeadLetterReason::Permanent(kind)
            | DeadLetterReason::AttemptsExhausted { kind, .. }
            | DeadLetterReason::NotRetried(kind)
            | DeadLetterReason::CommitUncertain(kind) => *kind,
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::Permanent(kind) => write!(f, "{kind}"),
            DeadLetterReason::AttemptsExhausted { kind, attempt } => {
                write!(f, "{kind}: attempts exhausted at {attempt}")
            }
            DeadLetterReason::NotRetried(kind) => write!(f, "{kind}: not retried"),
            DeadLetterReason::CommitUncertain(kind) => write!(f, "{kind}: commit uncertain"),
        }
    }
}
