//! Bounded FIFO used between pipeline stages
//!
//! Plain insertion never blocks: a full ring hands the item back to the
//! caller. Extraction, and insertion through [`Ring::insert_wait`], wait up
//! to a bound, so a stage loop always regains control to re-check its
//! shutdown state.

use crate::buffer::Buffer;
use crate::control::ControlStructure;
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Item carried by the inter-stage rings
#[derive(Debug)]
pub enum RingItem {
    /// Coded-frame or decode-frame data (including drain markers)
    Buffer(Buffer),
    /// In-sequence control request
    Control(ControlStructure),
    /// Wakes a stage so it re-scans its internal state
    Poke,
}

/// Ring used between stages
pub type BufferRing = Ring<RingItem>;

/// Returned by [`Ring::insert`] when the ring is at capacity
#[derive(Debug)]
pub struct RingFull<T> {
    pub capacity: usize,
    pub item: T,
}

impl<T> std::fmt::Display for RingFull<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ring full ({} entries)", self.capacity)
    }
}

/// Fixed-capacity multi-producer FIFO
pub struct Ring<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
    available: Notify,
    space: Notify,
}

impl<T> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Notify::new(),
            space: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn insert(&self, item: T) -> Result<(), RingFull<T>> {
        {
            let mut entries = lock(&self.entries);
            if entries.len() >= self.capacity {
                return Err(RingFull {
                    capacity: self.capacity,
                    item,
                });
            }
            entries.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Insert, waiting up to `wait` for an entry to free up
    pub async fn insert_wait(&self, item: T, wait: Duration) -> Result<(), RingFull<T>> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut item = item;
        loop {
            let freed = self.space.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            match self.insert(item) {
                Ok(()) => return Ok(()),
                Err(full) => item = full.item,
            }
            if tokio::time::timeout_at(deadline, freed).await.is_err() {
                return self.insert(item);
            }
        }
    }

    pub fn try_extract(&self) -> Option<T> {
        let item = lock(&self.entries).pop_front();
        if item.is_some() {
            self.space.notify_one();
        }
        item
    }

    /// Remove the oldest item, waiting up to `wait` for one to arrive
    pub async fn extract(&self, wait: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let arrived = self.available.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if let Some(item) = self.try_extract() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return self.try_extract();
            }
        }
    }

    pub fn non_empty(&self) -> bool {
        !lock(&self.entries).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        !self.non_empty()
    }

    /// Remove everything still queued
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = lock(&self.entries).drain(..).collect();
        self.space.notify_waiters();
        drained
    }
}

impl Ring<RingItem> {
    /// Wake the consumer without delivering data
    pub fn poke(&self) {
        // A full ring already has something to wake the consumer
        let _ = self.insert(RingItem::Poke);
    }
}

impl<T> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
