//! Processing FSM State Definitions

use std::fmt;

/// States a message passes through inside one processing invocation.
///
/// Terminal states: COMPLETED, RESCHEDULED, ABANDONED, DEAD_LETTERED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingState {
    /// Message handed to the processor
    Received,

    /// Payload parsed into a transaction
    Decoded,

    /// Target account loaded, snapshot taken
    AccountResolved,

    /// Balance mutated on the staged copy, nothing persisted yet
    Applied,

    /// Staged copy persisted, completion not yet signalled
    Committed,

    /// Terminal: completion signalled
    Completed,

    /// Terminal: handed back to the queue with a delay
    Rescheduled,

    /// Terminal: released to the queue for redelivery
    Abandoned,

    /// Terminal: moved to the dead-letter queue
    DeadLettered,
}

impl ProcessingState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingState::Completed
                | ProcessingState::Rescheduled
                | ProcessingState::Abandoned
                | ProcessingState::DeadLettered
        )
    }

    /// True once the balance may differ from the snapshot
    #[inline]
    pub fn has_staged_change(&self) -> bool {
        matches!(self, ProcessingState::Applied | ProcessingState::Committed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Received => "RECEIVED",
            ProcessingState::Decoded => "DECODED",
            ProcessingState::AccountResolved => "ACCOUNT_RESOLVED",
            ProcessingState::Applied => "APPLIED",
            ProcessingState::Committed => "COMMITTED",
            ProcessingState::Completed => "COMPLETED",
            ProcessingState::Rescheduled => "RESCHEDULED",
            ProcessingState::Abandoned => "ABANDONED",
            ProcessingState::DeadLettered => "DEAD_LETTERED",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
