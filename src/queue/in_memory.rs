//! In-memory peek-lock queue
//!
//! Messages move between three places: `pending` (visible), `scheduled`
//! (invisible until their availability time) and `locked` (handed out by
//! `peek`, waiting for a settlement). Dead-lettered messages are kept with
//! their reason for inspection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{EventMessage, QueueClient, QueueError};
use crate::core_types::MessageId;

/// Default number of deliveries before an abandoned message is dead-lettered
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 3;

/// A message parked in the dead-letter sub-queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message: EventMessage,
    pub reason: String,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<EventMessage>,
    scheduled: Vec<(DateTime<Utc>, EventMessage)>,
    locked: HashMap<MessageId, EventMessage>,
    dead_letters: Vec<DeadLetter>,
    completed: u64,
    /// Shift applied to the wall clock, lets tests fast-forward schedules
    clock_offset: chrono::Duration,
}

impl QueueState {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.clock_offset
    }

    /// Move every scheduled message whose time has come to `pending`
    fn promote_due(&mut self) {
        let now = self.now();
        let (mut due, later): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|(at, _)| *at <= now);
        self.scheduled = later;
        due.sort_by_key(|(at, _)| *at);
        self.pending.extend(due.into_iter().map(|(_, msg)| msg));
    }

    fn unlock(&mut self, id: MessageId) -> Result<EventMessage, QueueError> {
        self.locked.remove(&id).ok_or(QueueError::LockLost(id))
    }
}

pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    max_delivery_count: u32,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELIVERY_COUNT)
    }
}

impl InMemoryQueue {
    pub fn new(max_delivery_count: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_delivery_count: max_delivery_count.max(1),
        }
    }

    /// Enqueue a fresh message built from `body`, returning its id
    pub async fn send(&self, body: impl Into<Vec<u8>>) -> MessageId {
        let message = EventMessage::new(body);
        let id = message.id;
        self.enqueue(message).await;
        id
    }

    /// Enqueue a prepared message as-is
    pub async fn enqueue(&self, message: EventMessage) {
        self.state.lock().await.pending.push_back(message);
    }

    /// Fast-forward the queue clock
    pub async fn advance(&self, by: std::time::Duration) {
        if let Ok(step) = chrono::Duration::from_std(by) {
            self.state.lock().await.clock_offset += step;
        }
    }

    /// Messages not yet settled (visible, scheduled and locked)
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() + state.scheduled.len() + state.locked.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn scheduled_len(&self) -> usize {
        self.state.lock().await.scheduled.len()
    }

    pub async fn completed_count(&self) -> u64 {
        self.state.lock().await.completed
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Availability time of a scheduled message
    pub async fn scheduled_at(&self, id: MessageId) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state
            .scheduled
            .iter()
            .find(|(_, msg)| msg.id == id)
            .map(|(at, _)| *at)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn peek(&self) -> Result<Option<EventMessage>, QueueError> {
        let mut state = self.state.lock().await;
        state.promote_due();

        let Some(message) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.locked.insert(message.id, message.clone());
        Ok(Some(message))
    }

    async fn complete(&self, message: &EventMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.unlock(message.id)?;
        state.completed += 1;
        Ok(())
    }

    async fn reschedule(
        &self,
        message: &EventMessage,
        available_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let mut held = state.unlock(message.id)?;
        held.processing_count += 1;
        debug!(
            message_id = %held.id,
            processing_count = held.processing_count,
            available_at = %available_at,
            "Message rescheduled"
        );
        state.scheduled.push((available_at, held));
        Ok(())
    }

    async fn dead_letter(&self, message: &EventMessage, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let held = state.unlock(message.id)?;
        state.dead_letters.push(DeadLetter {
            message: held,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn abandon(&self, message: &EventMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let mut held = state.unlock(message.id)?;
        held.processing_count += 1;

        if held.processing_count >= self.max_delivery_count {
            warn!(
                message_id = %held.id,
                deliveries = held.processing_count,
                "Max delivery count reached, moving to dead-letter queue"
            );
            state.dead_letters.push(DeadLetter {
                message: held,
                reason: "MaxDeliveryCountExceeded".to_string(),
            });
        } else {
            state.pending.push_back(held);
        }
        Ok(())
    }
}
