//! Recording queue for processor tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{EventMessage, QueueClient, QueueError};
use crate::core_types::MessageId;

/// A settlement issued by the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Completed(MessageId),
    Rescheduled(MessageId, DateTime<Utc>),
    DeadLettered(MessageId, String),
    Abandoned(MessageId),
}

/// Queue that accepts any settlement and records it.
///
/// Unlike `InMemoryQueue` it does not require a prior `peek`, so tests can
/// hand-craft messages with arbitrary processing counts.
#[derive(Default)]
pub struct MockQueue {
    inbox: Mutex<VecDeque<EventMessage>>,
    signals: Mutex<Vec<Signal>>,
    complete_faults: Mutex<VecDeque<QueueError>>,
    settle_faults: Mutex<VecDeque<QueueError>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: EventMessage) {
        self.inbox.lock().unwrap().push_back(message);
    }

    /// Next `complete` call fails with `err`
    pub fn fail_next_complete(&self, err: QueueError) {
        self.complete_faults.lock().unwrap().push_back(err);
    }

    /// Next reschedule, dead-letter or abandon call fails with `err`
    pub fn fail_next_settlement(&self, err: QueueError) {
        self.settle_faults.lock().unwrap().push_back(err);
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, Signal::Completed(_)))
    }

    pub fn dead_lettered(&self) -> usize {
        self.count(|s| matches!(s, Signal::DeadLettered(..)))
    }

    pub fn rescheduled(&self) -> Vec<DateTime<Utc>> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Signal::Rescheduled(_, at) => Some(*at),
                _ => None,
            })
            .collect()
    }

    pub fn abandoned(&self) -> usize {
        self.count(|s| matches!(s, Signal::Abandoned(_)))
    }

    fn count(&self, pred: impl Fn(&Signal) -> bool) -> usize {
        self.signals.lock().unwrap().iter().filter(|s| pred(s)).count()
    }

    fn settle(&self, signal: Signal) -> Result<(), QueueError> {
        if let Some(err) = self.settle_faults.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }
}

#[async_trait]
impl QueueClient for MockQueue {
    async fn peek(&self) -> Result<Option<EventMessage>, QueueError> {
        Ok(self.inbox.lock().unwrap().pop_front())
    }

    async fn complete(&self, message: &EventMessage) -> Result<(), QueueError> {
        if let Some(err) = self.complete_faults.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.signals
            .lock()
            .unwrap()
            .push(Signal::Completed(message.id));
        Ok(())
    }

    async fn reschedule(
        &self,
        message: &EventMessage,
        available_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.settle(Signal::Rescheduled(message.id, available_at))
    }

    async fn dead_letter(&self, message: &EventMessage, reason: &str) -> Result<(), QueueError> {
        self.settle(Signal::DeadLettered(message.id, reason.to_string()))
    }

    async fn abandon(&self, message: &EventMessage) -> Result<(), QueueError> {
        self.settle(Signal::Abandoned(message.id))
    }
}
