//! Sorted queue of pending entries

/// A queued entry with its ordering key
#[derive(Debug, Clone)]
pub struct QueueEntry<E> {
    /// Lower values dispatch first
    pub priority: i32,
    /// Arrival order, assigned by the queue
    pub seq: u64,
    pub item: E,
}

impl<E> QueueEntry<E> {
    fn key(&self) -> (i32, u64) {
        (self.priority, self.seq)
    }
}

/// Queue kept sorted by `(priority asc, arrival asc)`
///
/// Insertion is a binary search for the first entry that sorts after the new
/// one followed by a shift, so equal priorities keep their arrival order.
/// The head is always the most urgent, earliest entry.
#[derive(Debug)]
pub struct PriorityQueue<E> {
    entries: Vec<QueueEntry<E>>,
    next_seq: u64,
}

impl<E> Default for PriorityQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> PriorityQueue<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    /// Insert an item and return its arrival sequence number
    pub fn insert(&mut self, priority: i32, item: E) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = QueueEntry { priority, seq, item };
        let key = entry.key();
        let index = self.entries.partition_point(|e| e.key() <= key);
        self.entries.insert(index, entry);
        seq
    }

    /// The most urgent entry
    pub fn peek(&self) -> Option<&QueueEntry<E>> {
        self.entries.first()
    }

    /// Remove the most urgent entry
    pub fn pop(&mut self) -> Option<QueueEntry<E>> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// The least urgent entry
    pub fn peek_back(&self) -> Option<&QueueEntry<E>> {
        self.entries.last()
    }

    /// Remove the least urgent entry
    pub fn pop_back(&mut self) -> Option<QueueEntry<E>> {
        self.entries.pop()
    }

    /// Remove the entry with the given sequence number
    pub fn remove(&mut self, seq: u64) -> Option<QueueEntry<E>> {
        let index = self.entries.iter().position(|e| e.seq == seq)?;
        Some(self.entries.remove(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry<E>> {
        self.entries.iter()
    }

    /// Remove everything, in dispatch order
    pub fn drain(&mut self) -> impl Iterator<Item = QueueEntry<E>> + '_ {
        self.entries.drain(..)
    }
}
