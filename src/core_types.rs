//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

use uuid::Uuid;

/// Account ID - opaque unique key of a bank account.
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - **Pre-existing**: Accounts are created outside this service
///
/// # Wire format:
/// Carried as the `bankAccountId` string of a transaction payload.
pub type AccountId = Uuid;

/// Transaction ID - the `id` carried inside a transaction payload
pub type TransactionId = Uuid;

/// Message ID - assigned by the queue, unique per message
pub type MessageId = Uuid;

/// Row stamp used for optimistic concurrency checks
pub type Version = i64;
