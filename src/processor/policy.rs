use serde::Deserialize;
use std::fmt;

use super::retry::RetryPolicy;

/// How the processor reacts to transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Dead-letter on any failure
    DeadLetter,
    /// Retry with backoff, no rollback of staged changes
    Reschedule,
    /// Retry with backoff after rolling back staged changes
    #[default]
    RescheduleWithRollback,
    /// Release to the queue and let its delivery count decide
    Abandon,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::DeadLetter => "dead_letter",
            ProcessingMode::Reschedule => "reschedule",
            ProcessingMode::RescheduleWithRollback => "reschedule_with_rollback",
            ProcessingMode::Abandon => "abandon",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do with a message after a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientAction {
    DeadLetter,
    Retry,
    Abandon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorPolicy {
    pub transient: TransientAction,
    /// Undo staged balance changes before settling a failed message
    pub rollback: bool,
    pub retry: RetryPolicy,
}

impl Default for ProcessorPolicy {
    fn default() -> Self {
        Self::from_mode(ProcessingMode::default(), RetryPolicy::default())
    }
}

impl ProcessorPolicy {
    pub fn from_mode(mode: ProcessingMode, retry: RetryPolicy) -> Self {
        let (transient, rollback) = match mode {
            ProcessingMode::DeadLetter => (TransientAction::DeadLetter, false),
            ProcessingMode::Reschedule => (TransientAction::Retry, false),
            ProcessingMode::RescheduleWithRollback => (TransientAction::Retry, true),
            ProcessingMode::Abandon => (TransientAction::Abandon, false),
        };
        Self {
            transient,
            rollback,
            retry,
        }
    }

    pub fn dead_letter() -> Self {
        Self::from_mode(ProcessingMode::DeadLetter, RetryPolicy::default())
    }

    pub fn reschedule() -> Self {
        Self::from_mode(ProcessingMode::Reschedule, RetryPolicy::default())
    }

    pub fn reschedule_with_rollback() -> Self {
        Self::from_mode(ProcessingMode::RescheduleWithRollback, RetryPolicy::default())
    }

    pub fn abandon() -> Self {
        Self::from_mode(ProcessingMode::Abandon, RetryPolicy::default())
    }
}
