use crate::content::ContentItem;
use std::collections::VecDeque;

/// Bounded FIFO of ready content items.
#[derive(Debug, Clone)]
pub struct ContentBuffer {
    items: VecDeque<ContentItem>,
    capacity: usize,
}

impl ContentBuffer {
    /// Creates an empty buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an item at the tail. A full buffer hands the item back.
    pub fn push(&mut self, item: ContentItem) -> Result<(), ContentItem> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<ContentItem> {
        self.items.pop_front()
    }

    /// Drops every buffered item and returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
