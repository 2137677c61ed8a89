//! Integration Tests for the processing FSM
//!
//! Drive `MessageProcessor` end to end against the recording `MockQueue` and
//! the scriptable `MockAccountStore`.

use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::error::{DeadLetterReason, FailureKind};
use super::policy::ProcessorPolicy;
use super::processor::{MessageProcessor, Outcome};
use crate::core_types::AccountId;
use crate::queue::mock::{MockQueue, Signal};
use crate::queue::{EventMessage, QueueError};
use crate::store::StoreError;
use crate::store::mock::MockAccountStore;
use crate::transaction::{JsonTransactionDecoder, Transaction, TransactionKind};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Processor wired to mock adapters with one seeded account
struct TestHarness {
    processor: MessageProcessor,
    queue: Arc<MockQueue>,
    store: Arc<MockAccountStore>,
    account: AccountId,
}

impl TestHarness {
    fn new(balance: &str) -> Self {
        Self::with_policy(balance, ProcessorPolicy::default())
    }

    fn with_policy(balance: &str, policy: ProcessorPolicy) -> Self {
        Self::build(balance, policy, JsonTransactionDecoder::strict())
    }

    fn build(balance: &str, policy: ProcessorPolicy, decoder: JsonTransactionDecoder) -> Self {
        let account = Uuid::new_v4();
        let queue = Arc::new(MockQueue::new());
        let store = Arc::new(MockAccountStore::with_accounts([(account, dec(balance))]));
        let processor =
            MessageProcessor::new(queue.clone(), store.clone(), Arc::new(decoder), policy);

        Self {
            processor,
            queue,
            store,
            account,
        }
    }

    fn balance(&self) -> Decimal {
        self.store.balance(self.account).unwrap()
    }

    fn credit(&self, amount: &str) -> EventMessage {
        let payload = Transaction::credit(self.account, dec(amount))
            .to_payload()
            .unwrap();
        EventMessage::new(payload)
    }

    fn debit(&self, amount: &str) -> EventMessage {
        let payload = Transaction::debit(self.account, dec(amount))
            .to_payload()
            .unwrap();
        EventMessage::new(payload)
    }
}

fn assert_delay(outcome: &Outcome, secs: u64) {
    match outcome {
        Outcome::Rescheduled {
            available_at,
            delay,
        } => {
            assert_eq!(*delay, Duration::from_secs(secs));
            let expected = Utc::now() + chrono::Duration::seconds(secs as i64);
            let drift = (*available_at - expected).num_milliseconds().abs();
            assert!(drift <= 1000, "available_at off by {drift}ms");
        }
        other => panic!("expected reschedule, got {other:?}"),
    }
}

// ========================================================================
// Happy Path Tests
// ========================================================================

#[tokio::test]
async fn test_credit_applied_and_completed() {
    let h = TestHarness::new("100");

    let outcome = h.processor.process(&h.credit("50")).await.unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.balance(), dec("150"));
    assert_eq!(h.queue.completed(), 1);
    assert_eq!(h.queue.signals().len(), 1);
    assert_eq!(h.store.save_count(), 1);
}

#[tokio::test]
async fn test_debit_applied_and_completed() {
    let h = TestHarness::new("100");

    let outcome = h.processor.process(&h.debit("30")).await.unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.balance(), dec("70"));
    assert_eq!(h.queue.completed(), 1);
}

#[tokio::test]
async fn test_fractional_amounts_are_exact() {
    let h = TestHarness::new("0.2");

    h.processor.process(&h.credit("0.1")).await.unwrap();

    assert_eq!(h.balance(), dec("0.3"));
}

#[tokio::test]
async fn test_debit_may_go_negative() {
    let h = TestHarness::new("10");

    let outcome = h.processor.process(&h.debit("25.5")).await.unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.balance(), dec("-15.5"));
}

// ========================================================================
// Permanent Failure Tests
// ========================================================================

#[tokio::test]
async fn test_malformed_payload_dead_lettered_without_writes() {
    let h = TestHarness::new("100");

    let outcome = h
        .processor
        .process(&EventMessage::new("{not json"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::Permanent(FailureKind::Decode)
        }
    );
    assert_eq!(h.queue.dead_lettered(), 1);
    assert_eq!(h.queue.signals().len(), 1);
    assert_eq!(h.store.find_count(), 0);
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn test_missing_account_dead_lettered() {
    let h = TestHarness::new("100");
    let payload = Transaction::credit(Uuid::new_v4(), dec("5"))
        .to_payload()
        .unwrap();
    // Counter within the retry limit, still never retried
    let message = EventMessage::new(payload).with_processing_count(1);

    let outcome = h.processor.process(&message).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::Permanent(FailureKind::AccountNotFound)
        }
    );
    assert_eq!(h.queue.dead_lettered(), 1);
    assert_eq!(h.store.save_count(), 0);
    assert_eq!(h.balance(), dec("100"));
}

#[tokio::test]
async fn test_unrecognized_kind_dead_lettered() {
    let h = TestHarness::build(
        "100",
        ProcessorPolicy::default(),
        JsonTransactionDecoder::permissive(),
    );
    let tx = Transaction::new(
        TransactionKind::Unrecognized("Transfer".into()),
        h.account,
        dec("10"),
    );

    let outcome = h
        .processor
        .process(&EventMessage::new(tx.to_payload().unwrap()))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::Permanent(FailureKind::UnrecognizedKind)
        }
    );
    assert_eq!(h.balance(), dec("100"));
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn test_unrecognized_kind_rejected_by_strict_decoder() {
    let h = TestHarness::new("100");
    let tx = Transaction::new(
        TransactionKind::Unrecognized("Transfer".into()),
        h.account,
        dec("10"),
    );

    let outcome = h
        .processor
        .process(&EventMessage::new(tx.to_payload().unwrap()))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::Permanent(FailureKind::Decode)
        }
    );
    assert_eq!(h.store.find_count(), 0);
}

#[tokio::test]
async fn test_unclassified_store_error_dead_lettered() {
    let h = TestHarness::new("100");
    h.store.fail_next_save(StoreError::Other("disk on fire".into()));

    let outcome = h.processor.process(&h.credit("1")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::Permanent(FailureKind::Unclassified)
        }
    );
    assert_eq!(h.balance(), dec("100"));
}

#[tokio::test]
async fn test_overflow_dead_lettered() {
    let h = TestHarness::new("1");
    h.store.inner().insert(crate::store::Account::new(h.account, Decimal::MAX));

    let outcome = h.processor.process(&h.credit("1")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::Permanent(FailureKind::Unclassified)
        }
    );
    assert_eq!(h.balance(), Decimal::MAX);
    assert_eq!(h.store.save_count(), 0);
}

// ========================================================================
// Retry Tests
// ========================================================================

#[tokio::test]
async fn test_retry_delays_follow_table() {
    for (counter, secs) in [(1, 5), (2, 25), (3, 125)] {
        let h = TestHarness::new("100");
        h.store.fail_next_save(StoreError::Timeout("slow".into()));

        let message = h.credit("50").with_processing_count(counter);
        let outcome = h.processor.process(&message).await.unwrap();

        assert_delay(&outcome, secs);
        assert_eq!(h.queue.rescheduled().len(), 1);
        assert_eq!(h.balance(), dec("100"));
    }
}

#[tokio::test]
async fn test_first_delivery_uses_fallback_delay() {
    let h = TestHarness::new("100");
    h.store.fail_next_save(StoreError::Unavailable("down".into()));

    let outcome = h.processor.process(&h.credit("50")).await.unwrap();

    assert_delay(&outcome, 5);
}

#[tokio::test]
async fn test_attempts_exhausted_dead_lettered() {
    let h = TestHarness::new("100");
    h.store.fail_next_save(StoreError::Timeout("slow".into()));

    let message = h.credit("50").with_processing_count(4);
    let outcome = h.processor.process(&message).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::AttemptsExhausted {
                kind: FailureKind::Timeout,
                attempt: 4
            }
        }
    );
    assert!(h.queue.rescheduled().is_empty());
    assert_eq!(h.balance(), dec("100"));
}

#[tokio::test]
async fn test_transient_kinds_are_rescheduled() {
    let faults = [
        StoreError::ConcurrencyConflict("stale".into()),
        StoreError::Timeout("slow".into()),
        StoreError::Unavailable("down".into()),
        StoreError::InvalidOperation("bad state".into()),
    ];

    for fault in faults {
        let h = TestHarness::new("100");
        h.store.fail_next_save(fault.clone());

        let outcome = h.processor.process(&h.credit("1")).await.unwrap();

        assert!(
            matches!(outcome, Outcome::Rescheduled { .. }),
            "{fault:?} should reschedule"
        );
        assert_eq!(h.balance(), dec("100"));
    }
}

// ========================================================================
// Rollback Tests
// ========================================================================

#[tokio::test]
async fn test_conflict_keeps_concurrent_write() {
    let h = TestHarness::new("100");
    // Another writer commits +10 between our read and our save
    h.store.interleave_write(dec("10"));

    let outcome = h
        .processor
        .process(&h.credit("50").with_processing_count(1))
        .await
        .unwrap();

    assert_delay(&outcome, 5);
    assert_eq!(h.balance(), dec("110"));

    // Redelivery applies on top of the concurrent write
    let retry = h.credit("50").with_processing_count(2);
    let outcome = h.processor.process(&retry).await.unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.balance(), dec("160"));
}

#[tokio::test]
async fn test_completion_failure_after_commit_restores_balance() {
    let h = TestHarness::new("100");
    h.queue
        .fail_next_complete(QueueError::Timeout("ack lost".into()));

    let outcome = h
        .processor
        .process(&h.credit("50").with_processing_count(1))
        .await
        .unwrap();

    assert_delay(&outcome, 5);
    assert_eq!(h.balance(), dec("100"));
    // Commit plus the compensating write
    assert_eq!(h.store.save_count(), 2);
    assert_eq!(h.queue.completed(), 0);
}

#[tokio::test]
async fn test_rollback_preserves_write_landing_after_commit() {
    let h = TestHarness::new("100");
    h.queue
        .fail_next_complete(QueueError::Unavailable("broker down".into()));
    // Another writer commits +7 before the rollback re-reads the account
    h.store.interleave_write_before_find(2, dec("7"));

    h.processor.process(&h.debit("30")).await.unwrap();

    // Only our -30 is undone
    assert_eq!(h.balance(), dec("107"));
}

#[tokio::test]
async fn test_rollback_retries_after_losing_version_race() {
    let h = TestHarness::new("100");
    h.queue
        .fail_next_complete(QueueError::Timeout("ack lost".into()));
    // First compensating save loses the race to another writer's +7
    h.store.interleave_write_at(2, dec("7"));

    let outcome = h
        .processor
        .process(&h.credit("50").with_processing_count(1))
        .await
        .unwrap();

    assert_delay(&outcome, 5);
    // Commit, lost compensation, compensation after re-read
    assert_eq!(h.store.save_count(), 3);
    assert_eq!(h.balance(), dec("107"));

    // Redelivery applies the credit exactly once
    let retry = h.credit("50").with_processing_count(2);
    assert_eq!(h.processor.process(&retry).await.unwrap(), Outcome::Completed);
    assert_eq!(h.balance(), dec("157"));
}

#[tokio::test]
async fn test_rollback_that_cannot_land_completes_message() {
    let h = TestHarness::new("100");
    h.queue
        .fail_next_complete(QueueError::Timeout("ack lost".into()));
    // Every compensating save loses its race
    for save in 2..=4 {
        h.store.interleave_write_at(save, dec("7"));
    }

    let outcome = h
        .processor
        .process(&h.credit("50").with_processing_count(1))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.store.save_count(), 4);
    assert_eq!(h.balance(), dec("171"));
    assert!(h.queue.rescheduled().is_empty());
    assert_eq!(h.queue.signals().len(), 1);
    assert_eq!(h.queue.completed(), 1);
}

#[tokio::test]
async fn test_rollback_read_failure_completes_message() {
    let h = TestHarness::new("100");
    h.queue
        .fail_next_complete(QueueError::Timeout("ack lost".into()));
    h.store
        .fail_find_at(2, StoreError::Unavailable("read replica".into()));

    let outcome = h
        .processor
        .process(&h.credit("50").with_processing_count(2))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.store.find_count(), 2);
    assert_eq!(h.store.save_count(), 1);
    assert_eq!(h.balance(), dec("150"));
    assert!(h.queue.rescheduled().is_empty());
}

#[tokio::test]
async fn test_account_vanished_before_rollback_is_rescheduled() {
    let h = TestHarness::new("100");
    h.queue
        .fail_next_complete(QueueError::Timeout("ack lost".into()));
    // Account deleted between our commit and the rollback read
    h.store.remove_before_find(2);

    let outcome = h
        .processor
        .process(&h.credit("50").with_processing_count(1))
        .await
        .unwrap();

    assert_delay(&outcome, 5);
    assert_eq!(h.queue.signals().len(), 1);
    assert_eq!(h.queue.rescheduled().len(), 1);
    // No compensating save
    assert_eq!(h.store.save_count(), 1);
    assert_eq!(h.store.balance(h.account), None);
}

#[tokio::test]
async fn test_timed_out_save_that_landed_is_completed() {
    let h = TestHarness::new("100");
    // Written, but the reply never arrives
    h.store
        .fail_after_save_at(1, StoreError::Timeout("deadline".into()));

    let outcome = h.processor.process(&h.credit("50")).await.unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.balance(), dec("150"));
    assert_eq!(h.store.save_count(), 1);
    assert_eq!(h.queue.signals().len(), 1);
    assert_eq!(h.queue.completed(), 1);
}

#[tokio::test]
async fn test_timed_out_save_that_did_not_land_is_retried() {
    let h = TestHarness::new("100");
    h.store.fail_next_save(StoreError::Timeout("deadline".into()));

    let outcome = h.processor.process(&h.credit("50")).await.unwrap();

    assert_delay(&outcome, 5);
    // Original read plus the read-back
    assert_eq!(h.store.find_count(), 2);
    assert_eq!(h.balance(), dec("100"));
}

#[tokio::test]
async fn test_timed_out_save_with_unreadable_outcome_dead_lettered() {
    let h = TestHarness::new("100");
    h.store
        .fail_after_save_at(1, StoreError::Timeout("deadline".into()));
    h.store
        .fail_find_at(2, StoreError::Unavailable("connection reset".into()));

    let outcome = h.processor.process(&h.credit("50")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::CommitUncertain(FailureKind::Timeout)
        }
    );
    assert!(h.queue.rescheduled().is_empty());
    assert_eq!(h.queue.signals().len(), 1);
}

#[tokio::test]
async fn test_timed_out_compensation_that_landed_counts_as_undone() {
    let h = TestHarness::new("100");
    h.queue
        .fail_next_complete(QueueError::Timeout("ack lost".into()));
    h.store
        .fail_after_save_at(2, StoreError::Timeout("deadline".into()));

    let outcome = h
        .processor
        .process(&h.credit("50").with_processing_count(1))
        .await
        .unwrap();

    assert_delay(&outcome, 5);
    assert_eq!(h.balance(), dec("100"));
    assert_eq!(h.store.save_count(), 2);
}

#[tokio::test]
async fn test_store_failure_after_mutation_leaves_balance() {
    let h = TestHarness::new("100");
    h.store.fail_next_save(StoreError::Timeout("commit timed out".into()));

    h.processor.process(&h.debit("40")).await.unwrap();

    assert_eq!(h.balance(), dec("100"));
    // Nothing committed, so no compensating write
    assert_eq!(h.store.save_count(), 1);
}

// ========================================================================
// Policy Tests
// ========================================================================

#[tokio::test]
async fn test_abandon_mode_releases_message() {
    let h = TestHarness::with_policy("100", ProcessorPolicy::abandon());
    h.store.fail_next_save(StoreError::Timeout("slow".into()));

    let outcome = h.processor.process(&h.credit("50")).await.unwrap();

    assert_eq!(outcome, Outcome::Abandoned);
    assert_eq!(h.queue.abandoned(), 1);
    assert_eq!(h.balance(), dec("100"));
}

#[tokio::test]
async fn test_abandon_mode_dead_letters_permanent_failures() {
    let h = TestHarness::with_policy("100", ProcessorPolicy::abandon());

    let outcome = h
        .processor
        .process(&EventMessage::new("[]"))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::DeadLettered { .. }));
    assert_eq!(h.queue.abandoned(), 0);
}

#[tokio::test]
async fn test_dead_letter_mode_never_retries() {
    let h = TestHarness::with_policy("100", ProcessorPolicy::dead_letter());
    h.store
        .fail_next_save(StoreError::ConcurrencyConflict("stale".into()));

    let outcome = h.processor.process(&h.credit("50")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::DeadLettered {
            reason: DeadLetterReason::NotRetried(FailureKind::ConcurrencyConflict)
        }
    );
    assert!(h.queue.rescheduled().is_empty());
}

#[tokio::test]
async fn test_reschedule_mode_completes_committed_change() {
    let h = TestHarness::with_policy("100", ProcessorPolicy::reschedule());
    h.queue
        .fail_next_complete(QueueError::Timeout("ack lost".into()));

    let outcome = h.processor.process(&h.credit("50")).await.unwrap();

    // Without rollback the change stays, so it must not be redelivered
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.balance(), dec("150"));
    assert_eq!(h.store.save_count(), 1);
    assert!(h.queue.rescheduled().is_empty());
}

#[tokio::test]
async fn test_abandon_mode_completes_committed_change() {
    let h = TestHarness::with_policy("100", ProcessorPolicy::abandon());
    h.queue
        .fail_next_complete(QueueError::Unavailable("broker down".into()));

    let outcome = h.processor.process(&h.debit("20")).await.unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.balance(), dec("80"));
    assert_eq!(h.queue.abandoned(), 0);
}

#[tokio::test]
async fn test_exactly_one_signal_per_message() {
    let h = TestHarness::new("100");
    h.store.fail_next_save(StoreError::Timeout("slow".into()));

    let messages = [
        h.credit("1"),
        h.debit("2"),
        EventMessage::new("garbage"),
        h.credit("3").with_processing_count(9),
    ];
    for message in &messages {
        h.processor.process(message).await.unwrap();
    }

    let signals = h.queue.signals();
    assert_eq!(signals.len(), messages.len());
    for (message, signal) in messages.iter().zip(&signals) {
        let id = match signal {
            Signal::Completed(id)
            | Signal::Rescheduled(id, _)
            | Signal::DeadLettered(id, _)
            | Signal::Abandoned(id) => *id,
        };
        assert_eq!(id, message.id);
    }
}
