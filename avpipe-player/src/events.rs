//! Event queue
//!
//! Fixed-capacity store of pending [`EventRecord`]s plus a small registry of
//! external wait handles.
//!
//! Records live in an arena of slots chained into a singly linked list in
//! arrival order. Appending is O(1) at the tail; collecting a record scans
//! from the head. When every slot is in use the oldest record is evicted so
//! that signalling never fails.

use crate::error::{Error, Result};
use crate::sync::{lock, Signal};
use avpipe_common::events::{EventMask, EventRecord};
use avpipe_common::{PlaybackId, StreamId};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

struct EventSlot {
    record: Option<EventRecord>,
    next: Option<usize>,
}

struct EventList {
    slots: Vec<EventSlot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    queued: usize,
}

impl EventList {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| EventSlot {
                    record: None,
                    next: None,
                })
                .collect(),
            free: (0..capacity).rev().collect(),
            head: None,
            tail: None,
            queued: 0,
        }
    }

    /// Unlink the head record
    fn pop_head(&mut self) -> Option<EventRecord> {
        let index = self.head?;
        self.head = self.slots[index].next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        self.queued -= 1;
        self.free.push(index);
        self.slots[index].record.take()
    }

    fn push_tail(&mut self, index: usize, record: EventRecord) {
        self.slots[index].record = Some(record);
        self.slots[index].next = None;
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.queued += 1;
    }

    /// Unlink the first record passing the filter
    fn remove_first(
        &mut self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        mask: EventMask,
    ) -> Option<EventRecord> {
        let mut previous: Option<usize> = None;
        let mut current = self.head;
        while let Some(index) = current {
            let matched = self.slots[index]
                .record
                .as_ref()
                .map_or(false, |r| r.matches(playback, stream, mask));
            if matched {
                let next = self.slots[index].next.take();
                match previous {
                    Some(prev) => self.slots[prev].next = next,
                    None => self.head = next,
                }
                if self.tail == Some(index) {
                    self.tail = previous;
                }
                self.queued -= 1;
                self.free.push(index);
                return self.slots[index].record.take();
            }
            previous = Some(index);
            current = self.slots[index].next;
        }
        None
    }

    fn remove_all_for(&mut self, playback: Option<PlaybackId>, stream: Option<StreamId>) -> usize {
        let mut removed = 0;
        while self.remove_first(playback, stream, EventMask::ALL).is_some() {
            removed += 1;
        }
        removed
    }
}

struct ExternalSignal {
    playback: Option<PlaybackId>,
    stream: Option<StreamId>,
    mask: EventMask,
    signal: Signal,
}

/// Event records and external wait handles
pub struct EventQueue {
    list: Mutex<EventList>,
    signals: Mutex<Vec<Option<ExternalSignal>>>,
    arrived: Notify,
}

impl EventQueue {
    pub fn new(capacity: usize, signal_capacity: usize) -> Self {
        Self {
            list: Mutex::new(EventList::new(capacity.max(1))),
            signals: Mutex::new((0..signal_capacity).map(|_| None).collect()),
            arrived: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.list).slots.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.list).queued
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a record, evicting the oldest one if the queue is full
    pub fn signal(&self, record: EventRecord) {
        debug!("Event {:?} for {:?}/{:?}", record.code, record.playback, record.stream);
        {
            let mut list = lock(&self.list);
            let index = match list.free.pop() {
                Some(index) => index,
                None => {
                    if let Some(evicted) = list.pop_head() {
                        warn!(
                            "Event queue full, discarding oldest event {:?} (user data {})",
                            evicted.code, evicted.user_data
                        );
                    }
                    match list.free.pop() {
                        Some(index) => index,
                        None => return,
                    }
                }
            };
            list.push_tail(index, record.clone());
        }

        self.arrived.notify_waiters();

        let signals = lock(&self.signals);
        for entry in signals.iter().flatten() {
            if record.matches(entry.playback, entry.stream, entry.mask) {
                entry.signal.set();
            }
        }
    }

    /// Remove and return the first matching record, if any
    pub fn take(
        &self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        mask: EventMask,
    ) -> Option<EventRecord> {
        lock(&self.list).remove_first(playback, stream, mask)
    }

    /// Take a matching record, waiting up to `wait` for one to be signalled
    pub async fn take_or_wait(
        &self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        mask: EventMask,
        wait: Duration,
    ) -> Option<EventRecord> {
        let arrived = self.arrived.notified();
        tokio::pin!(arrived);
        arrived.as_mut().enable();

        if let Some(record) = self.take(playback, stream, mask) {
            return Some(record);
        }
        let _ = tokio::time::timeout(wait, arrived).await;
        self.take(playback, stream, mask)
    }

    /// Drop pending records of a torn-down playback or stream
    pub fn flush(&self, playback: Option<PlaybackId>, stream: Option<StreamId>) -> usize {
        lock(&self.list).remove_all_for(playback, stream)
    }

    /// Register (or replace) an external wait handle for a filter
    pub fn set_signal(
        &self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        mask: EventMask,
        signal: Signal,
    ) -> Result<()> {
        let mut signals = lock(&self.signals);
        let existing = signals.iter_mut().flatten().find(|entry| {
            entry.playback == playback && entry.stream == stream
        });
        if let Some(entry) = existing {
            entry.mask = mask;
            entry.signal = signal;
            return Ok(());
        }

        let slot = signals
            .iter_mut()
            .find(|entry| entry.is_none())
            .ok_or_else(|| Error::TooMany("External event signal registry full".to_string()))?;
        *slot = Some(ExternalSignal {
            playback,
            stream,
            mask,
            signal,
        });
        Ok(())
    }

    pub fn clear_signal(&self, playback: Option<PlaybackId>, stream: Option<StreamId>) -> Result<()> {
        let mut signals = lock(&self.signals);
        let slot = signals
            .iter_mut()
            .find(|entry| {
                entry
                    .as_ref()
                    .map_or(false, |e| e.playback == playback && e.stream == stream)
            })
            .ok_or_else(|| Error::InvalidParameter("No matching event signal".to_string()))?;
        *slot = None;
        Ok(())
    }

    /// Forget wait handles registered for a torn-down playback or stream
    pub(crate) fn clear_signals_for(&self, playback: Option<PlaybackId>, stream: Option<StreamId>) {
        let mut signals = lock(&self.signals);
        for slot in signals.iter_mut() {
            let stale = slot.as_ref().map_or(false, |e| {
                (playback.is_some() && e.playback == playback) || (stream.is_some() && e.stream == stream)
            });
            if stale {
                *slot = None;
            }
        }
    }
}
