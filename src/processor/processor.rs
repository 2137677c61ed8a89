//! Message Processor
//!
//! Drives one message to exactly one queue settlement. All failures funnel
//! through [`MessageProcessor::handle_failure`], which rolls back staged
//! balance changes (when the policy asks for it) and picks the settlement.
//! A committed change that stays applied is always settled as completed,
//! never handed back to the queue for redelivery.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::{DeadLetterReason, FailureClass, FailureKind, ProcessError, classify};
use super::policy::{ProcessorPolicy, TransientAction};
use super::retry::RetryDecision;
use super::state::ProcessingState;
use crate::core_types::{AccountId, Version};
use crate::queue::{EventMessage, QueueClient};
use crate::store::{Account, AccountStore, StoreError};
use crate::transaction::{JsonTransactionDecoder, TransactionDecoder};

/// Terminal result of one processing invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Rescheduled {
        available_at: chrono::DateTime<Utc>,
        delay: Duration,
    },
    DeadLettered {
        reason: DeadLetterReason,
    },
    Abandoned,
}

impl Outcome {
    pub fn state(&self) -> ProcessingState {
        match self {
            Outcome::Completed => ProcessingState::Completed,
            Outcome::Rescheduled { .. } => ProcessingState::Rescheduled,
            Outcome::DeadLettered { .. } => ProcessingState::DeadLettered,
            Outcome::Abandoned => ProcessingState::Abandoned,
        }
    }
}

/// A balance change made on behalf of the message being processed
#[derive(Debug, Clone)]
struct StagedChange {
    /// Key resolved from the payload, reused for rollback
    account_id: AccountId,
    /// Balance observed before the change
    snapshot: Decimal,
    delta: Decimal,
    /// Version written by the commit, `None` while the change is only staged
    committed_version: Option<Version>,
}

/// How a staged change ended up once a failure was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rollback {
    /// The change never committed
    NothingToUndo,
    Undone,
    /// The account no longer exists
    AccountGone,
    /// The committed change is still applied
    LeftApplied,
    /// A compensating save timed out and could not be read back
    Uncertain,
}

/// A save that did not produce a new version
#[derive(Debug)]
enum SaveFailure {
    /// Nothing was written
    Rejected(StoreError),
    /// Timed out and the follow-up read failed, the write may have landed
    Uncertain(StoreError),
}

/// Compensating saves attempted before giving up on a rollback
const ROLLBACK_ATTEMPTS: usize = 3;

/// Message Processor
///
/// Shared across worker tasks through `Arc`; holds no per-message state.
pub struct MessageProcessor {
    queue: Arc<dyn QueueClient>,
    store: Arc<dyn AccountStore>,
    decoder: Arc<dyn TransactionDecoder>,
    policy: ProcessorPolicy,
}

impl MessageProcessor {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        store: Arc<dyn AccountStore>,
        decoder: Arc<dyn TransactionDecoder>,
        policy: ProcessorPolicy,
    ) -> Self {
        Self {
            queue,
            store,
            decoder,
            policy,
        }
    }

    /// Strict JSON decoder and the default retry-with-rollback policy
    pub fn with_defaults(queue: Arc<dyn QueueClient>, store: Arc<dyn AccountStore>) -> Self {
        Self::new(
            queue,
            store,
            Arc::new(JsonTransactionDecoder::strict()),
            ProcessorPolicy::default(),
        )
    }

    pub fn policy(&self) -> &ProcessorPolicy {
        &self.policy
    }

    pub fn queue(&self) -> &Arc<dyn QueueClient> {
        &self.queue
    }

    /// Process one peeked message and settle it.
    ///
    /// `Ok` carries the settlement that was issued. `Err` means the settlement
    /// signal itself was rejected by the queue and the message is still
    /// locked. A broker redelivers it once its lock expires; `InMemoryQueue`
    /// has no lock expiry and keeps it locked for the life of the process.
    pub async fn process(&self, message: &EventMessage) -> Result<Outcome, ProcessError> {
        let attempt = message.processing_count;
        debug!(
            message_id = %message.id,
            attempt,
            state = %ProcessingState::Received,
            "Processing message"
        );

        // RECEIVED -> DECODED
        let transaction = match self.decoder.decode(&message.body) {
            Ok(tx) => tx,
            Err(e) => {
                return self
                    .handle_failure(message, ProcessingState::Received, e.into(), None)
                    .await;
            }
        };
        let account_id = transaction.account_id;

        // DECODED -> ACCOUNT_RESOLVED
        let account = match self.store.find_account(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                let err = ProcessError::AccountNotFound(account_id);
                return self
                    .handle_failure(message, ProcessingState::Decoded, err, None)
                    .await;
            }
            Err(e) => {
                return self
                    .handle_failure(message, ProcessingState::Decoded, e.into(), None)
                    .await;
            }
        };
        debug!(
            message_id = %message.id,
            transaction_id = %transaction.id,
            account_id = %account_id,
            version = account.version,
            state = %ProcessingState::AccountResolved,
            "Account resolved"
        );

        // ACCOUNT_RESOLVED -> APPLIED
        let Some(delta) = transaction.signed_amount() else {
            let err = ProcessError::UnrecognizedKind(transaction.kind.to_string());
            return self
                .handle_failure(message, ProcessingState::AccountResolved, err, None)
                .await;
        };
        let mut staged = StagedChange {
            account_id,
            snapshot: account.balance,
            delta,
            committed_version: None,
        };
        let Some(balance) = account.balance.checked_add(delta) else {
            let err = ProcessError::Overflow(account_id);
            return self
                .handle_failure(message, ProcessingState::Applied, err, Some(staged))
                .await;
        };
        let updated = Account { balance, ..account };

        // APPLIED -> COMMITTED
        match self.save_verified(&updated).await {
            Ok(saved) => staged.committed_version = Some(saved.version),
            Err(SaveFailure::Rejected(e)) => {
                return self
                    .handle_failure(message, ProcessingState::Applied, e.into(), Some(staged))
                    .await;
            }
            Err(SaveFailure::Uncertain(e)) => {
                let kind = ProcessError::from(e).kind();
                return self
                    .dead_letter(message, DeadLetterReason::CommitUncertain(kind))
                    .await;
            }
        }

        // COMMITTED -> COMPLETED
        if let Err(e) = self.queue.complete(message).await {
            return self
                .handle_failure(message, ProcessingState::Committed, e.into(), Some(staged))
                .await;
        }

        info!(
            message_id = %message.id,
            transaction_id = %transaction.id,
            account_id = %account_id,
            kind = %transaction.kind,
            amount = %transaction.amount,
            balance = %balance,
            state = %ProcessingState::Completed,
            "Transaction applied"
        );
        Ok(Outcome::Completed)
    }

    /// Single exit for every failure path
    async fn handle_failure(
        &self,
        message: &EventMessage,
        state: ProcessingState,
        err: ProcessError,
        staged: Option<StagedChange>,
    ) -> Result<Outcome, ProcessError> {
        let kind = err.kind();
        let class = classify(kind);
        warn!(
            message_id = %message.id,
            attempt = message.processing_count,
            state = %state,
            code = err.code(),
            class = ?class,
            error = %err,
            "Message processing failed"
        );

        let rollback = match &staged {
            Some(staged) if self.policy.rollback => self.roll_back(message, staged).await,
            Some(staged) if staged.committed_version.is_some() => {
                warn!(
                    message_id = %message.id,
                    account_id = %staged.account_id,
                    "Committed change left in place, rollback disabled"
                );
                Rollback::LeftApplied
            }
            _ => Rollback::NothingToUndo,
        };

        match rollback {
            // Redelivery would apply the change a second time
            Rollback::LeftApplied => return self.settle_applied(message).await,
            Rollback::Uncertain => {
                return self
                    .dead_letter(message, DeadLetterReason::CommitUncertain(kind))
                    .await;
            }
            Rollback::NothingToUndo | Rollback::Undone | Rollback::AccountGone => {}
        }

        match class {
            FailureClass::Permanent => {
                self.dead_letter(message, DeadLetterReason::Permanent(kind))
                    .await
            }
            FailureClass::Transient => match self.policy.transient {
                TransientAction::Retry => self.retry_or_dead_letter(message, kind).await,
                TransientAction::DeadLetter => {
                    self.dead_letter(message, DeadLetterReason::NotRetried(kind))
                        .await
                }
                TransientAction::Abandon => {
                    self.queue.abandon(message).await?;
                    info!(
                        message_id = %message.id,
                        attempt = message.processing_count,
                        state = %ProcessingState::Abandoned,
                        "Message abandoned"
                    );
                    Ok(Outcome::Abandoned)
                }
            },
        }
    }

    /// Undo a staged change.
    ///
    /// A committed change is compensated by subtracting its delta from the
    /// current balance, so a lost version race is re-read and retried up to
    /// [`ROLLBACK_ATTEMPTS`] times.
    async fn roll_back(&self, message: &EventMessage, staged: &StagedChange) -> Rollback {
        let Some(committed_version) = staged.committed_version else {
            debug!(
                message_id = %message.id,
                account_id = %staged.account_id,
                "Discarding uncommitted change"
            );
            return Rollback::NothingToUndo;
        };

        for attempt in 1..=ROLLBACK_ATTEMPTS {
            let current = match self.store.find_account(staged.account_id).await {
                Ok(Some(account)) => account,
                Ok(None) => {
                    warn!(
                        message_id = %message.id,
                        account_id = %staged.account_id,
                        "Account vanished, rollback skipped"
                    );
                    return Rollback::AccountGone;
                }
                Err(e) => {
                    error!(
                        message_id = %message.id,
                        account_id = %staged.account_id,
                        error = %e,
                        "Rollback read failed"
                    );
                    return Rollback::LeftApplied;
                }
            };

            // Subtract our delta rather than restoring the snapshot so a
            // concurrent writer's committed update survives
            let Some(restored) = current.balance.checked_sub(staged.delta) else {
                error!(
                    message_id = %message.id,
                    account_id = %staged.account_id,
                    "Rollback overflow"
                );
                return Rollback::LeftApplied;
            };
            let version = current.version;
            let compensated = Account {
                balance: restored,
                ..current
            };

            match self.save_verified(&compensated).await {
                Ok(_) => {
                    info!(
                        message_id = %message.id,
                        account_id = %staged.account_id,
                        snapshot = %staged.snapshot,
                        restored = %restored,
                        committed_version,
                        "Committed change rolled back"
                    );
                    return Rollback::Undone;
                }
                Err(SaveFailure::Rejected(StoreError::ConcurrencyConflict(_)))
                    if attempt < ROLLBACK_ATTEMPTS =>
                {
                    debug!(
                        message_id = %message.id,
                        account_id = %staged.account_id,
                        version,
                        attempt,
                        "Rollback lost a version race, re-reading"
                    );
                }
                Err(SaveFailure::Rejected(e)) => {
                    error!(
                        message_id = %message.id,
                        account_id = %staged.account_id,
                        version,
                        attempt,
                        error = %e,
                        "Rollback write failed"
                    );
                    return Rollback::LeftApplied;
                }
                Err(SaveFailure::Uncertain(e)) => {
                    error!(
                        message_id = %message.id,
                        account_id = %staged.account_id,
                        version,
                        error = %e,
                        "Rollback write outcome unknown"
                    );
                    return Rollback::Uncertain;
                }
            }
        }

        Rollback::LeftApplied
    }

    /// Save `account`, resolving a timeout by reading the row back.
    ///
    /// A deadline can fire after the store has already committed. The write
    /// counts as landed when the row sits exactly one version past the one we
    /// read and holds the balance we wrote.
    async fn save_verified(&self, account: &Account) -> Result<Account, SaveFailure> {
        let timed_out = match self.store.save_account(account).await {
            Ok(saved) => return Ok(saved),
            Err(e @ StoreError::Timeout(_)) => e,
            Err(e) => return Err(SaveFailure::Rejected(e)),
        };

        match self.store.find_account(account.id).await {
            Ok(Some(current))
                if current.version == account.version + 1 && current.balance == account.balance =>
            {
                warn!(
                    account_id = %account.id,
                    version = current.version,
                    "Save timed out but landed"
                );
                Ok(current)
            }
            Ok(_) => Err(SaveFailure::Rejected(timed_out)),
            Err(e) => {
                error!(
                    account_id = %account.id,
                    error = %e,
                    "Could not read back a timed-out save"
                );
                Err(SaveFailure::Uncertain(timed_out))
            }
        }
    }

    /// Settle a message whose committed change stays applied
    async fn settle_applied(&self, message: &EventMessage) -> Result<Outcome, ProcessError> {
        self.queue.complete(message).await?;
        warn!(
            message_id = %message.id,
            attempt = message.processing_count,
            state = %ProcessingState::Completed,
            "Committed change kept, message completed"
        );
        Ok(Outcome::Completed)
    }

    async fn retry_or_dead_letter(
        &self,
        message: &EventMessage,
        kind: FailureKind,
    ) -> Result<Outcome, ProcessError> {
        let attempt = message.processing_count;
        match self.policy.retry.decide(attempt, Utc::now()) {
            RetryDecision::Reschedule {
                available_at,
                delay,
            } => {
                self.queue.reschedule(message, available_at).await?;
                info!(
                    message_id = %message.id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    available_at = %available_at,
                    state = %ProcessingState::Rescheduled,
                    "Message rescheduled"
                );
                Ok(Outcome::Rescheduled {
                    available_at,
                    delay,
                })
            }
            RetryDecision::DeadLetter => {
                self.dead_letter(message, DeadLetterReason::AttemptsExhausted { kind, attempt })
                    .await
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &EventMessage,
        reason: DeadLetterReason,
    ) -> Result<Outcome, ProcessError> {
        self.queue
            .dead_letter(message, &reason.to_string())
            .await?;
        warn!(
            message_id = %message.id,
            attempt = message.processing_count,
            reason = %reason,
            state = %ProcessingState::DeadLettered,
            "Message dead-lettered"
        );
        Ok(Outcome::DeadLettered { reason })
    }
}
