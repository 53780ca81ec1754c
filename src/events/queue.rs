//! Bounded disconnect buffer.
//!
//! Holds events that arrive while the runtime connection is down. The
//! overflow policy is fixed at construction.

use std::collections::VecDeque;

pub use crate::config::OverflowPolicy;
use crate::error::{BridgeError, BridgeResult};
use crate::events::types::{QueuedEvent, RuntimeEvent};

/// What happened to an enqueued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Stored with room to spare.
    Accepted,
    /// Stored after evicting the oldest buffered event.
    EvictedOldest,
    /// Discarded; the buffer was full.
    DroppedNewest,
}

impl EnqueueOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueOutcome::Accepted => "accepted",
            EnqueueOutcome::EvictedOldest => "evicted_oldest",
            EnqueueOutcome::DroppedNewest => "dropped_newest",
        }
    }
}

#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<QueuedEvent>,
    capacity: usize,
    policy: OverflowPolicy,
    overflow_count: u64,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            policy,
            overflow_count: 0,
            next_sequence: 0,
        }
    }

    /// Buffer an event, applying the overflow policy when full.
    ///
    /// Under `Reject` a full buffer returns `EventQueueFull` to the producer.
    pub fn enqueue(&mut self, event: RuntimeEvent) -> BridgeResult<EnqueueOutcome> {
        let mut outcome = EnqueueOutcome::Accepted;

        if self.events.len() >= self.capacity {
            self.overflow_count += 1;
            match self.policy {
                OverflowPolicy::DropOldest => {
                    self.events.pop_front();
                    outcome = EnqueueOutcome::EvictedOldest;
                }
                OverflowPolicy::DropNewest => return Ok(EnqueueOutcome::DroppedNewest),
                OverflowPolicy::Reject => {
                    return Err(BridgeError::EventQueueFull {
                        capacity: self.capacity,
                    })
                }
            }
        }

        // a zero-capacity buffer still must not grow
        if self.capacity == 0 {
            return Ok(EnqueueOutcome::DroppedNewest);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.events.push_back(QueuedEvent { event, sequence });
        Ok(outcome)
    }

    /// Take every buffered event in arrival order.
    pub fn drain(&mut self) -> Vec<QueuedEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Drop buffered events and zero the overflow counter.
    pub fn clear(&mut self) {
        self.events.clear();
        self.overflow_count = 0;
    }
}
