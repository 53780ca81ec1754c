//! Bounded priority queue of pending commands.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::commands::types::{Command, Priority};

/// Dispatch order key: priority descending, then submission order.
pub type DispatchKey = (Reverse<Priority>, u64);

pub fn dispatch_key(command: &Command) -> DispatchKey {
    (Reverse(command.priority), command.sequence)
}

#[derive(Debug)]
pub struct CommandQueue {
    entries: BTreeMap<DispatchKey, Command>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    /// Insert a command; gives it back when the queue is full.
    pub fn push(&mut self, command: Command) -> Result<(), Command> {
        if self.entries.len() >= self.capacity {
            return Err(command);
        }
        self.entries.insert(dispatch_key(&command), command);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Command> {
        self.entries.pop_first().map(|(_, command)| command)
    }

    /// Up to `max` commands in dispatch order.
    pub fn pop_batch(&mut self, max: usize) -> Vec<Command> {
        let mut batch = Vec::with_capacity(max.min(self.entries.len()));
        while batch.len() < max {
            match self.pop() {
                Some(command) => batch.push(command),
                None => break,
            }
        }
        batch
    }

    /// Remove every command, in dispatch order.
    pub fn drain(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
