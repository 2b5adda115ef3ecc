//! Events waiting for a live connection

use std::collections::VecDeque;

use impress_collab::CollabEvent;

use crate::error::ClientError;

/// FIFO of unsent events. Survives disconnects and is drained in order once
/// the client is connected again.
#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<CollabEvent>,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, event: CollabEvent) -> Result<(), ClientError> {
        if self.queue.len() >= self.capacity {
            return Err(ClientError::OutboxFull(self.queue.len()));
        }
        self.queue.push_back(event);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<CollabEvent> {
        self.queue.pop_front()
    }

    /// Put back an event whose send failed so it goes out first next time.
    pub fn requeue(&mut self, event: CollabEvent) {
        self.queue.push_front(event);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollabEvent> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
