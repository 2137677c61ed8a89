//! Queue Client
//!
//! Peek-lock message queue seam. A peeked message stays locked to the
//! receiver until exactly one settlement is issued for it:
//!
//! | Settlement    | Effect                                                    |
//! |---------------|-----------------------------------------------------------|
//! | `complete`    | Removed from the queue                                    |
//! | `reschedule`  | Redelivered at the given time, processing count + 1       |
//! | `dead_letter` | Moved to the dead-letter sub-queue                        |
//! | `abandon`     | Lock released, processing count + 1, the queue decides    |
//!
//! `processing_count` is the number of earlier processing attempts, so a
//! first delivery carries 0.

pub mod in_memory;

#[cfg(test)]
pub mod mock;

pub use in_memory::InMemoryQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core_types::MessageId;

/// A delivered message and its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    pub id: MessageId,
    pub body: Vec<u8>,
    pub processing_count: u32,
}

impl EventMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: MessageId::new_v4(),
            body: body.into(),
            processing_count: 0,
        }
    }

    pub fn with_processing_count(mut self, count: u32) -> Self {
        self.processing_count = count;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue operation timed out: {0}")]
    Timeout(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid queue operation: {0}")]
    InvalidOperation(String),

    /// The lock on the message expired or was never held
    #[error("Message lock lost: {0}")]
    LockLost(MessageId),

    #[error("Queue error: {0}")]
    Other(String),
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Lock and return the next available message, if any
    async fn peek(&self) -> Result<Option<EventMessage>, QueueError>;

    async fn complete(&self, message: &EventMessage) -> Result<(), QueueError>;

    /// Make the message available again no earlier than `available_at`
    async fn reschedule(
        &self,
        message: &EventMessage,
        available_at: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    async fn dead_letter(&self, message: &EventMessage, reason: &str) -> Result<(), QueueError>;

    async fn abandon(&self, message: &EventMessage) -> Result<(), QueueError>;
}
