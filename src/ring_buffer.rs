//! Fixed-capacity ordered set of recently seen block hashes.
//!
//! Backed by a `VecDeque` for the order and a `HashSet` for O(1) membership,
//! the idiomatic pairing for this shape (see e.g. apibara's head tracker,
//! which buffers `BlockHeader`s the same way).

use std::collections::{HashSet, VecDeque};

use web3::types::H256;

pub struct RingBuffer {
    capacity: usize,
    order: VecDeque<H256>,
    member: HashSet<H256>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            member: HashSet::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.order.len() >= self.capacity
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.member.contains(hash)
    }

    /// Appends `hash`, evicting the oldest entry if the buffer is at capacity.
    pub fn enqueue(&mut self, hash: H256) {
        if self.is_full() {
            self.dequeue();
        }
        self.order.push_back(hash);
        self.member.insert(hash);
    }

    /// Removes and returns the oldest entry, if any.
    pub fn dequeue(&mut self) -> Option<H256> {
        let hash = self.order.pop_front()?;
        self.member.remove(&hash);
        Some(hash)
    }

    /// Removes `hash` from the buffer, wherever it sits, keeping the
    /// remaining entries contiguous and in order. No-op if absent.
    pub fn remove(&mut self, hash: &H256) -> bool {
        if !self.member.remove(hash) {
            return false;
        }
        if let Some(pos) = self.order.iter().position(|h| h == hash) {
            self.order.remove(pos);
        }
        true
    }

    /// The reorg primitive: removes `old` (wherever it sits) then appends
    /// `new`. If `old` isn't present this degrades to a plain `enqueue`.
    pub fn remove_and_enqueue(&mut self, new: H256, old: H256) {
        self.remove(&old);
        self.enqueue(new);
    }
}
