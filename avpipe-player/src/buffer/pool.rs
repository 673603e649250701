//! Arena buffer pool with reference-counted handles
//!
//! A pool owns a fixed array of slots. [`BufferPool::get_buffer`] leases a
//! free slot and returns a [`Buffer`] handle holding one reference. Each
//! handle records a single [`OwnerTag`]; [`Buffer::share`] creates another
//! handle (another reference) for a second owner, and dropping a handle
//! releases its reference. When the last reference goes the slot's payload,
//! metadata and attached buffers are released and the slot returns to the
//! free list.
//!
//! Attaching a buffer to another (a coded frame to the decode frame derived
//! from it) keeps the attached buffer alive until the holder is released,
//! and metadata lookups fall through to attached buffers.

use super::metadata::{
    BufferMetadata, CodedFrameParameters, MetadataType, ParsedFrameParameters, SequenceNumber,
};
use crate::error::{Error, Result};
use crate::pipeline::Boundary;
use crate::sync::lock;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, trace};

/// What a pool's buffers hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    CodedFrame,
    DecodeFrame,
    ControlStructure,
}

/// Logical holder of one buffer reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerTag {
    Producer,
    Collator,
    FrameParser,
    Codec,
    OutputTimer,
    Manifestor,
    Stage(Boundary),
    ReorderTable,
    NonDecodedList,
    Drain,
    InSequenceCall,
    /// Reference held inside another buffer's attachment list
    Attachment,
    External,
}

/// Snapshot returned by [`BufferPool::usage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolUsage {
    pub buffers: usize,
    pub in_use: usize,
    pub bytes_pooled: usize,
    pub bytes_allocated: usize,
}

struct Slot {
    references: u32,
    owners: Vec<OwnerTag>,
    size: usize,
    payload: Vec<u8>,
    metadata: BufferMetadata,
    attached: Vec<Buffer>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            references: 0,
            owners: Vec::new(),
            size: 0,
            payload: Vec::new(),
            metadata: BufferMetadata::default(),
            attached: Vec::new(),
        }
    }
}

struct PoolInner {
    slots: Vec<Slot>,
    free: Vec<usize>,
    attached_metadata: Vec<MetadataType>,
    bytes_allocated: usize,
}

struct PoolShared {
    name: String,
    kind: BufferKind,
    memory_size: usize,
    max_buffer_size: usize,
    inner: Mutex<PoolInner>,
    freed: Notify,
}

/// Fixed-capacity pool of buffers of one kind
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers
    ///
    /// `memory_size` bounds the sum of sizes of leased buffers (0 means
    /// unbounded); `max_buffer_size` bounds a single request (0 means
    /// unbounded).
    pub fn new(
        kind: BufferKind,
        name: impl Into<String>,
        capacity: usize,
        memory_size: usize,
        max_buffer_size: usize,
    ) -> Self {
        let slots = (0..capacity).map(|_| Slot::empty()).collect();
        // Lowest index is handed out first
        let free = (0..capacity).rev().collect();
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                kind,
                memory_size,
                max_buffer_size,
                inner: Mutex::new(PoolInner {
                    slots,
                    free,
                    attached_metadata: Vec::new(),
                    bytes_allocated: 0,
                }),
                freed: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> BufferKind {
        self.shared.kind
    }

    pub fn capacity(&self) -> usize {
        lock(&self.shared.inner).slots.len()
    }

    /// Make every buffer handed out from now on carry `metadata_type`
    pub fn attach_metadata(&self, metadata_type: MetadataType) {
        let mut inner = lock(&self.shared.inner);
        if !inner.attached_metadata.contains(&metadata_type) {
            inner.attached_metadata.push(metadata_type);
        }
    }

    /// Lease a buffer without waiting
    pub fn get_buffer(&self, owner: OwnerTag, size: usize) -> Result<Buffer> {
        if self.shared.max_buffer_size != 0 && size > self.shared.max_buffer_size {
            return Err(Error::InvalidParameter(format!(
                "Requested {} bytes from pool {} (maximum {})",
                size, self.shared.name, self.shared.max_buffer_size
            )));
        }

        let mut inner = lock(&self.shared.inner);
        if self.shared.memory_size != 0 && inner.bytes_allocated + size > self.shared.memory_size {
            return Err(Error::InsufficientResources(format!(
                "Pool {} memory exhausted",
                self.shared.name
            )));
        }
        let index = inner.free.pop().ok_or_else(|| {
            Error::InsufficientResources(format!("Pool {} has no free buffers", self.shared.name))
        })?;

        let metadata = BufferMetadata::for_types(&inner.attached_metadata);
        inner.bytes_allocated += size;
        let slot = &mut inner.slots[index];
        slot.references = 1;
        slot.owners.push(owner);
        slot.size = size;
        slot.metadata = metadata;

        trace!("Pool {}: leased buffer {} to {:?}", self.shared.name, index, owner);
        Ok(Buffer {
            pool: Arc::clone(&self.shared),
            index,
            owner,
        })
    }

    /// Lease a buffer, waiting up to `wait` for one to be released
    pub async fn get_buffer_wait(&self, owner: OwnerTag, size: usize, wait: Duration) -> Result<Buffer> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let freed = self.shared.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            match self.get_buffer(owner, size) {
                Err(Error::InsufficientResources(reason)) => {
                    if tokio::time::timeout_at(deadline, freed).await.is_err() {
                        return Err(Error::InsufficientResources(reason));
                    }
                }
                result => return result,
            }
        }
    }

    /// Wait until at least one buffer is free, up to `wait`
    pub async fn wait_for_free(&self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let freed = self.shared.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            if !lock(&self.shared.inner).free.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, freed).await.is_err() {
                return !lock(&self.shared.inner).free.is_empty();
            }
        }
    }

    pub fn usage(&self) -> PoolUsage {
        let inner = lock(&self.shared.inner);
        PoolUsage {
            buffers: inner.slots.len(),
            in_use: inner.slots.len() - inner.free.len(),
            bytes_pooled: self.shared.memory_size,
            bytes_allocated: inner.bytes_allocated,
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .field("usage", &self.usage())
            .finish()
    }
}

/// One reference to a pooled buffer
pub struct Buffer {
    pool: Arc<PoolShared>,
    index: usize,
    owner: OwnerTag,
}

impl Buffer {
    /// Slot index within the owning pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> BufferKind {
        self.pool.kind
    }

    pub fn owner(&self) -> OwnerTag {
        self.owner
    }

    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    /// True if both handles reference the same slot of the same pool
    pub fn same_buffer(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool) && self.index == other.index
    }

    /// Take an additional reference for `owner`
    pub fn share(&self, owner: OwnerTag) -> Buffer {
        let mut inner = lock(&self.pool.inner);
        let slot = &mut inner.slots[self.index];
        slot.references += 1;
        slot.owners.push(owner);
        Buffer {
            pool: Arc::clone(&self.pool),
            index: self.index,
            owner,
        }
    }

    /// Hand this reference to a new owner
    pub fn transfer_ownership(&mut self, owner: OwnerTag) {
        let mut inner = lock(&self.pool.inner);
        let slot = &mut inner.slots[self.index];
        if let Some(tag) = slot.owners.iter_mut().find(|tag| **tag == self.owner) {
            *tag = owner;
        }
        self.owner = owner;
    }

    pub fn reference_count(&self) -> u32 {
        lock(&self.pool.inner).slots[self.index].references
    }

    pub fn owners(&self) -> Vec<OwnerTag> {
        lock(&self.pool.inner).slots[self.index].owners.clone()
    }

    pub fn size(&self) -> usize {
        lock(&self.pool.inner).slots[self.index].size
    }

    /// Replace the buffer contents
    pub fn set_payload(&self, data: &[u8]) -> Result<()> {
        if self.pool.max_buffer_size != 0 && data.len() > self.pool.max_buffer_size {
            return Err(Error::InvalidParameter(format!(
                "Payload of {} bytes exceeds pool {} maximum of {}",
                data.len(),
                self.pool.name,
                self.pool.max_buffer_size
            )));
        }
        let mut inner = lock(&self.pool.inner);
        let previous = inner.slots[self.index].size;
        inner.bytes_allocated = inner.bytes_allocated - previous + data.len();
        let slot = &mut inner.slots[self.index];
        slot.size = data.len();
        slot.payload.clear();
        slot.payload.extend_from_slice(data);
        Ok(())
    }

    pub fn payload(&self) -> Vec<u8> {
        lock(&self.pool.inner).slots[self.index].payload.clone()
    }

    pub fn payload_len(&self) -> usize {
        lock(&self.pool.inner).slots[self.index].payload.len()
    }

    /// Keep `other` alive for as long as this buffer is
    pub fn attach_buffer(&self, mut other: Buffer) -> Result<()> {
        if Arc::ptr_eq(&self.pool, &other.pool) {
            return Err(Error::InvalidParameter(
                "Cannot attach a buffer from the same pool".to_string(),
            ));
        }
        other.transfer_ownership(OwnerTag::Attachment);
        lock(&self.pool.inner).slots[self.index].attached.push(other);
        Ok(())
    }

    pub fn attached_count(&self) -> usize {
        lock(&self.pool.inner).slots[self.index].attached.len()
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        walk_metadata(&self.pool, self.index, &mut |m| m.sequence)
    }

    /// Modify the sequence number of this buffer, or of the first attached
    /// buffer carrying one; false if none does
    pub fn update_sequence_number(&self, f: impl FnOnce(&mut SequenceNumber)) -> bool {
        let mut f = Some(f);
        walk_metadata(&self.pool, self.index, &mut |m| {
            let seq = m.sequence.as_mut()?;
            if let Some(f) = f.take() {
                f(seq);
            }
            Some(())
        })
        .is_some()
    }

    pub fn set_sequence_number(&self, sequence: SequenceNumber) {
        lock(&self.pool.inner).slots[self.index].metadata.sequence = Some(sequence);
    }

    pub fn coded_frame_parameters(&self) -> Option<CodedFrameParameters> {
        walk_metadata(&self.pool, self.index, &mut |m| m.coded)
    }

    pub fn set_coded_frame_parameters(&self, params: CodedFrameParameters) {
        lock(&self.pool.inner).slots[self.index].metadata.coded = Some(params);
    }

    pub fn parsed_frame_parameters(&self) -> Option<ParsedFrameParameters> {
        walk_metadata(&self.pool, self.index, &mut |m| m.parsed)
    }

    pub fn set_parsed_frame_parameters(&self, params: ParsedFrameParameters) {
        lock(&self.pool.inner).slots[self.index].metadata.parsed = Some(params);
    }

    pub fn update_parsed_frame_parameters(&self, f: impl FnOnce(&mut ParsedFrameParameters)) -> bool {
        let mut f = Some(f);
        walk_metadata(&self.pool, self.index, &mut |m| {
            let parsed = m.parsed.as_mut()?;
            if let Some(f) = f.take() {
                f(parsed);
            }
            Some(())
        })
        .is_some()
    }

    /// True for the distinguished drain marker
    pub fn is_marker(&self) -> bool {
        self.sequence_number().map_or(false, |s| s.marker_frame)
    }
}

/// Look up metadata on a slot, falling through to attached buffers
///
/// The slot lock is released before descending so attached pools are
/// never locked while this one is held.
fn walk_metadata<R>(
    pool: &Arc<PoolShared>,
    index: usize,
    pick: &mut dyn FnMut(&mut BufferMetadata) -> Option<R>,
) -> Option<R> {
    let attached: Vec<(Arc<PoolShared>, usize)> = {
        let mut inner = lock(&pool.inner);
        let slot = &mut inner.slots[index];
        if let Some(found) = pick(&mut slot.metadata) {
            return Some(found);
        }
        slot.attached
            .iter()
            .map(|b| (Arc::clone(&b.pool), b.index))
            .collect()
    };
    attached
        .iter()
        .find_map(|(attached_pool, attached_index)| walk_metadata(attached_pool, *attached_index, pick))
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.share(self.owner)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let released = {
            let mut inner = lock(&self.pool.inner);
            let slot = &mut inner.slots[self.index];
            if slot.references == 0 {
                error!(
                    "Pool {}: buffer {} released with no outstanding references",
                    self.pool.name, self.index
                );
                return;
            }
            slot.references -= 1;
            if let Some(pos) = slot.owners.iter().position(|tag| *tag == self.owner) {
                slot.owners.swap_remove(pos);
            }
            if slot.references > 0 {
                return;
            }

            let size = slot.size;
            let attached = std::mem::take(&mut slot.attached);
            slot.owners.clear();
            slot.size = 0;
            slot.payload.clear();
            slot.metadata = BufferMetadata::default();
            inner.bytes_allocated = inner.bytes_allocated.saturating_sub(size);
            inner.free.push(self.index);
            attached
        };

        trace!("Pool {}: buffer {} returned", self.pool.name, self.index);
        // Attached buffers belong to other pools; release them unlocked
        drop(released);
        self.pool.freed.notify_waiters();
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("pool", &self.pool.name)
            .field("index", &self.index)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coded_pool(capacity: usize) -> BufferPool {
        let pool = BufferPool::new(BufferKind::CodedFrame, "test-coded", capacity, 0, 1024);
        pool.attach_metadata(MetadataType::SequenceNumber);
        pool
    }

    #[test]
    fn test_exhaustion_and_release() {
        let pool = coded_pool(2);
        let a = pool.get_buffer(OwnerTag::Producer, 0).unwrap();
        let _b = pool.get_buffer(OwnerTag::Producer, 0).unwrap();
        assert!(matches!(
            pool.get_buffer(OwnerTag::Producer, 0),
            Err(Error::InsufficientResources(_))
        ));

        drop(a);
        assert_eq!(pool.usage().in_use, 1);
        assert!(pool.get_buffer(OwnerTag::Producer, 0).is_ok());
    }

    #[test]
    fn test_share_keeps_slot_alive() {
        let pool = coded_pool(1);
        let a = pool.get_buffer(OwnerTag::Collator, 0).unwrap();
        let b = a.share(OwnerTag::FrameParser);
        assert_eq!(a.reference_count(), 2);
        assert!(b.owners().contains(&OwnerTag::FrameParser));

        drop(a);
        assert_eq!(pool.usage().in_use, 1);
        drop(b);
        assert_eq!(pool.usage().in_use, 0);
    }

    #[test]
    fn test_transfer_replaces_owner_tag() {
        let pool = coded_pool(1);
        let mut a = pool.get_buffer(OwnerTag::Collator, 0).unwrap();
        a.transfer_ownership(OwnerTag::Stage(Boundary::CollateToParse));
        assert_eq!(a.owners(), vec![OwnerTag::Stage(Boundary::CollateToParse)]);
    }

    #[test]
    fn test_metadata_reset_on_reuse() {
        let pool = coded_pool(1);
        let a = pool.get_buffer(OwnerTag::Producer, 0).unwrap();
        a.update_sequence_number(|s| s.value = 42);
        assert_eq!(a.sequence_number().unwrap().value, 42);
        drop(a);

        let b = pool.get_buffer(OwnerTag::Producer, 0).unwrap();
        assert_eq!(b.sequence_number().unwrap().value, 0);
    }

    #[test]
    fn test_attached_metadata_fall_through() {
        let coded = coded_pool(1);
        let decode = BufferPool::new(BufferKind::DecodeFrame, "test-decode", 1, 0, 0);

        let c = coded.get_buffer(OwnerTag::Codec, 0).unwrap();
        c.update_sequence_number(|s| s.value = 7);
        c.set_parsed_frame_parameters(ParsedFrameParameters {
            display_frame_index: Some(3),
            ..Default::default()
        });

        let d = decode.get_buffer(OwnerTag::Codec, 0).unwrap();
        d.attach_buffer(c).unwrap();

        assert_eq!(d.sequence_number().unwrap().value, 7);
        assert_eq!(d.parsed_frame_parameters().unwrap().display_frame_index, Some(3));
        assert!(d.update_sequence_number(|s| s.value = 8));
        assert_eq!(coded.usage().in_use, 1);

        drop(d);
        assert_eq!(coded.usage().in_use, 0);
        assert_eq!(decode.usage().in_use, 0);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let pool = coded_pool(1);
        let a = pool.get_buffer(OwnerTag::Producer, 0).unwrap();
        assert!(a.set_payload(&[0u8; 2048]).is_err());
        a.set_payload(&[1, 2, 3]).unwrap();
        assert_eq!(a.payload(), vec![1, 2, 3]);
        assert_eq!(pool.usage().bytes_allocated, 3);
    }

    #[tokio::test]
    async fn test_wait_for_release() {
        let pool = coded_pool(1);
        let held = pool.get_buffer(OwnerTag::Producer, 0).unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.get_buffer_wait(OwnerTag::Drain, 0, Duration::from_secs(5))
                    .await
                    .is_ok()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }
}
