//! Message Processing FSM
//!
//! Applies one decoded transaction per message and settles the message on the
//! queue exactly once.
//!
//! # State Machine
//!
//! ```text
//! RECEIVED ──decode──▶ DECODED ──find──▶ ACCOUNT_RESOLVED ──apply──▶ APPLIED ──save──▶ COMMITTED ──complete──▶ COMPLETED
//!    │                    │                    │                        │                  │
//!    │ decode error       │ not found          │ unknown kind           └────────┬─────────┘
//!    ▼                    ▼                    ▼                                 │ failure
//! DEAD_LETTERED ◀─────────┴────────────────────┘                                 ▼
//!                                                                   rollback (policy) ─▶ classify
//!                                                                                          │
//!                                      ┌──────────────┬────────────────────────────────────┤
//!                                      ▼              ▼                                    ▼
//!                                 RESCHEDULED     ABANDONED                         DEAD_LETTERED
//!                               (attempt <= max)  (abandon mode)         (permanent / attempts exhausted)
//! ```
//!
//! # Invariants
//!
//! 1. Exactly one queue settlement per invocation.
//! 2. Permanent failures are never retried.
//! 3. Staged balance changes are undone before a failed message is settled
//!    (retry-with-rollback policy).
//! 4. A change that is committed and stays applied settles as COMPLETED, so a
//!    redelivery can never apply it twice. A save that times out is read back
//!    to tell whether it landed.
//! 5. Retry delays come from a fixed table keyed on the processing counter.

pub mod error;
pub mod policy;
#[allow(clippy::module_inception)]
pub mod processor;
pub mod retry;
pub mod state;

#[cfg(test)]
mod integration_tests;

pub use error::{DeadLetterReason, FailureClass, FailureKind, ProcessError, classify};
pub use policy::{ProcessingMode, ProcessorPolicy, TransientAction};
pub use processor::{MessageProcessor, Outcome};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy, retry_delay};
pub use state::ProcessingState;
