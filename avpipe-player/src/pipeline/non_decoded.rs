//! Frames skipped before decode
//!
//! When Parse→Decode discards the first partition of an output frame, that
//! display index will never reach Decode→Manifest. The buffer is held here
//! (its display index may only become known later, once the frame parser
//! has finished with it) so the reordering stage can step over the hole.

use crate::buffer::{Buffer, OwnerTag};
use crate::error::{Error, Result};
use tracing::trace;

struct NonDecodedEntry {
    buffer: Buffer,
    display_index: Option<u32>,
}

pub(crate) struct NonDecodedList {
    entries: Vec<Option<NonDecodedEntry>>,
}

impl NonDecodedList {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| None).collect(),
        }
    }

    pub(crate) fn record(&mut self, mut buffer: Buffer) -> Result<()> {
        let slot = self
            .entries
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or_else(|| Error::InsufficientResources("Non-decoded frame table full".to_string()))?;
        buffer.transfer_ownership(OwnerTag::NonDecodedList);
        let display_index = buffer.parsed_frame_parameters().and_then(|p| p.display_frame_index);
        *slot = Some(NonDecodedEntry {
            buffer,
            display_index,
        });
        Ok(())
    }

    /// True if `desired` belongs to a skipped frame; that entry is consumed
    ///
    /// Entries whose index is already behind `desired` can never be used
    /// and are released along the way.
    pub(crate) fn check(&mut self, desired: u32) -> bool {
        let mut found = false;
        for slot in self.entries.iter_mut() {
            let Some(entry) = slot.as_mut() else {
                continue;
            };
            if entry.display_index.is_none() {
                entry.display_index = entry
                    .buffer
                    .parsed_frame_parameters()
                    .and_then(|p| p.display_frame_index);
            }
            match entry.display_index {
                Some(index) if index == desired && !found => {
                    trace!("Skipping display index {} (not decoded)", index);
                    *slot = None;
                    found = true;
                }
                Some(index) if index < desired => *slot = None,
                _ => {}
            }
        }
        found
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub(crate) fn flush(&mut self) {
        for slot in self.entries.iter_mut() {
            *slot = None;
        }
    }
}
