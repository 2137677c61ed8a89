//! Banking Event Receiver
//!
//! Queue-driven worker that applies credit/debit events to account balances,
//! with failure classification, retry scheduling and dead-lettering.
//!
//! # Modules
//!
//! - [`core_types`] - Identifier and version aliases
//! - [`transaction`] - Transaction model and payload decoder
//! - [`queue`] - Peek-lock queue seam and in-memory queue
//! - [`store`] - Optimistic account store seam, in-memory and PostgreSQL stores
//! - [`processor`] - Message processing FSM, classification and retry policy
//! - [`worker`] - Host loop, shutdown signal and statistics
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod logging;
pub mod processor;
pub mod queue;
pub mod store;
pub mod transaction;
pub mod worker;

// Convenient re-exports at crate root
pub use core_types::{AccountId, MessageId, TransactionId, Version};
pub use processor::{
    DeadLetterReason, FailureClass, FailureKind, MessageProcessor, Outcome, ProcessError,
    ProcessingMode, ProcessingState, ProcessorPolicy, RetryPolicy,
};
pub use queue::{EventMessage, InMemoryQueue, QueueClient, QueueError};
pub use store::{Account, AccountStore, InMemoryAccountStore, PostgresAccountStore, StoreError};
pub use transaction::{
    DecodeError, JsonTransactionDecoder, Transaction, TransactionDecoder, TransactionKind,
};
pub use worker::{MessageWorker, ShutdownSignal, WorkerConfig, WorkerStats, WorkerStatsSnapshot};
