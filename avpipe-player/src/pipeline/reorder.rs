//! Display-order reassembly for Decode→Manifest
//!
//! Decodes complete in decode order; B-frames make that differ from display
//! order. The table holds decoded frames keyed by display index and hands
//! back the lowest one when it may be shown:
//!
//! - its index is the next one expected,
//! - its index is already behind (a reordering failure, it is late),
//! - it asks for holes before it to be collapsed,
//! - the table holds as many frames as may be out of order,
//! - the owner is flushing (a marker or discontinuity is waiting).
//!
//! Frames with no display index are released immediately.

use avpipe_common::PlayDirection;

/// One held frame
#[derive(Debug)]
pub struct ReorderEntry<T> {
    pub item: T,
    pub display_index: Option<u32>,
    pub collapse_holes: bool,
    pub sequence: u64,
}

/// Why a frame left the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    InOrder,
    Late,
    CollapseHoles,
    TableFull,
    Flush,
    NoDisplayIndex,
}

/// A frame leaving the table
#[derive(Debug)]
pub struct Release<T> {
    pub entry: ReorderEntry<T>,
    pub reason: ReleaseReason,
    /// Lowest sequence number held at the moment of release
    pub minimum_sequence: u64,
}

/// Bound on frames held out of display order
///
/// `decode_buffers` minus the working set the codec needs is the hard cap.
/// Forward play may be limited further; reverse play holds at most three
/// quarters of the decode buffers.
pub fn max_out_of_order(
    decode_buffers: usize,
    reserved_working_set: usize,
    forward_limit: Option<usize>,
    direction: PlayDirection,
) -> usize {
    let hard_cap = decode_buffers.saturating_sub(reserved_working_set).max(1);
    match direction {
        PlayDirection::Forward => forward_limit.map_or(hard_cap, |limit| limit.min(hard_cap)),
        PlayDirection::Backward => ((3 * decode_buffers) / 4).min(hard_cap),
    }
}

pub struct ReorderTable<T> {
    entries: Vec<Option<ReorderEntry<T>>>,
    occupancy: usize,
    desired_index: u32,
}

impl<T> ReorderTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity.max(1)).map(|_| None).collect(),
            occupancy: 0,
            desired_index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.occupancy
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    pub fn desired_index(&self) -> u32 {
        self.desired_index
    }

    pub fn set_desired_index(&mut self, index: u32) {
        self.desired_index = index;
    }

    /// Advance the expected index past a shown or skipped frame
    pub fn advance_past(&mut self, display_index: u32) {
        self.desired_index = self.desired_index.max(display_index.saturating_add(1));
    }

    /// Hold a frame; hands it back if every slot is taken
    pub fn insert(&mut self, entry: ReorderEntry<T>) -> Result<(), ReorderEntry<T>> {
        match self.entries.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(entry);
                self.occupancy += 1;
                Ok(())
            }
            None => Err(entry),
        }
    }

    pub fn minimum_sequence(&self) -> Option<u64> {
        self.entries.iter().flatten().map(|e| e.sequence).min()
    }

    /// Take the next frame that may be shown, if any
    pub fn next_release(&mut self, max_out_of_order: usize, flushing: bool) -> Option<Release<T>> {
        let minimum_sequence = self.minimum_sequence()?;

        if let Some(slot) = self.entries.iter().position(|e| {
            e.as_ref().map_or(false, |e| e.display_index.is_none())
        }) {
            return self.take(slot, ReleaseReason::NoDisplayIndex, minimum_sequence);
        }

        let (slot, lowest) = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(slot, e)| e.as_ref().map(|e| (slot, e)))
            .min_by_key(|(_, e)| e.display_index)?;

        let index = lowest.display_index.unwrap_or(u32::MAX);
        let reason = if index == self.desired_index {
            ReleaseReason::InOrder
        } else if index < self.desired_index {
            ReleaseReason::Late
        } else if lowest.collapse_holes {
            ReleaseReason::CollapseHoles
        } else if self.occupancy >= max_out_of_order {
            ReleaseReason::TableFull
        } else if flushing {
            ReleaseReason::Flush
        } else {
            return None;
        };
        self.take(slot, reason, minimum_sequence)
    }

    fn take(&mut self, slot: usize, reason: ReleaseReason, minimum_sequence: u64) -> Option<Release<T>> {
        let entry = self.entries[slot].take()?;
        self.occupancy -= 1;
        Some(Release {
            entry,
            reason,
            minimum_sequence,
        })
    }

    /// Remove everything, lowest display index first
    pub fn drain(&mut self) -> Vec<ReorderEntry<T>> {
        let mut held: Vec<ReorderEntry<T>> = self.entries.iter_mut().filter_map(Option::take).collect();
        held.sort_by_key(|e| e.display_index);
        self.occupancy = 0;
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn entry(display: u32, sequence: u64) -> ReorderEntry<u32> {
        ReorderEntry {
            item: display,
            display_index: Some(display),
            collapse_holes: false,
            sequence,
        }
    }

    /// Feed frames in the given order, releasing as the stage loop would
    fn run(order: &[u32], capacity: usize, max_ooo: usize) -> (Vec<u32>, Vec<ReleaseReason>) {
        let mut table = ReorderTable::new(capacity);
        let mut shown = Vec::new();
        let mut reasons = Vec::new();
        let mut release_all = |table: &mut ReorderTable<u32>, flushing: bool| {
            while let Some(release) = table.next_release(max_ooo, flushing) {
                if let Some(index) = release.entry.display_index {
                    table.advance_past(index);
                }
                shown.push(release.entry.item);
                reasons.push(release.reason);
            }
        };
        for (sequence, display) in order.iter().enumerate() {
            release_all(&mut table, false);
            table.insert(entry(*display, sequence as u64)).unwrap();
        }
        release_all(&mut table, false);
        release_all(&mut table, true);
        (shown, reasons)
    }

    #[test]
    fn test_b_frame_reordered() {
        let (shown, reasons) = run(&[0, 2, 3, 1], 8, 5);
        assert_eq!(shown, vec![0, 1, 2, 3]);
        assert!(reasons.iter().all(|r| *r == ReleaseReason::InOrder));
    }

    #[test]
    fn test_table_full_releases_past_hole() {
        // Index 1 never arrives; the bound forces 2 out
        let (shown, reasons) = run(&[0, 2, 3, 4], 8, 2);
        assert_eq!(shown, vec![0, 2, 3, 4]);
        assert_eq!(reasons[1], ReleaseReason::TableFull);
    }

    #[test]
    fn test_collapse_holes() {
        let mut table = ReorderTable::new(4);
        table.insert(ReorderEntry {
            item: 5,
            display_index: Some(5),
            collapse_holes: true,
            sequence: 0,
        })
        .unwrap();
        let release = table.next_release(3, false).unwrap();
        assert_eq!(release.reason, ReleaseReason::CollapseHoles);
    }

    #[test]
    fn test_minimum_sequence_reported_before_removal() {
        let mut table = ReorderTable::new(4);
        table.insert(entry(2, 1)).unwrap();
        table.insert(entry(3, 2)).unwrap();
        table.insert(entry(1, 3)).unwrap();
        table.set_desired_index(1);

        let release = table.next_release(3, false).unwrap();
        assert_eq!(release.entry.item, 1);
        assert_eq!(release.minimum_sequence, 1);
    }

    #[test]
    fn test_missing_display_index_released_first() {
        let mut table = ReorderTable::new(4);
        table.insert(entry(4, 0)).unwrap();
        table.insert(ReorderEntry {
            item: 99,
            display_index: None,
            collapse_holes: false,
            sequence: 1,
        })
        .unwrap();
        let release = table.next_release(3, false).unwrap();
        assert_eq!(release.reason, ReleaseReason::NoDisplayIndex);
        assert_eq!(release.entry.item, 99);
    }

    #[test]
    fn test_max_out_of_order_bounds() {
        assert_eq!(max_out_of_order(8, 3, Some(12), PlayDirection::Forward), 5);
        assert_eq!(max_out_of_order(32, 3, Some(12), PlayDirection::Forward), 12);
        assert_eq!(max_out_of_order(32, 3, None, PlayDirection::Forward), 29);
        assert_eq!(max_out_of_order(32, 3, Some(12), PlayDirection::Backward), 24);
        assert_eq!(max_out_of_order(2, 3, None, PlayDirection::Forward), 1);
    }

    /// Shuffle display indices within windows no wider than the bound: the
    /// output must come back sorted with nothing lost or repeated
    #[test]
    fn test_shuffled_windows_within_bound_emit_in_order() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let decode_buffers = rng.gen_range(4..24);
            let bound = max_out_of_order(decode_buffers, 3, Some(12), PlayDirection::Forward);
            let window = rng.gen_range(1..=bound);
            let frames = rng.gen_range(1..120u32);

            let mut order: Vec<u32> = (0..frames).collect();
            for chunk in order.chunks_mut(window) {
                chunk.shuffle(&mut rng);
            }

            let (shown, _) = run(&order, decode_buffers, bound);
            let expected: Vec<u32> = (0..frames).collect();
            assert_eq!(shown, expected, "order {:?} bound {}", order, bound);
        }
    }

    /// With a bound smaller than the actual reordering depth frames do come
    /// out of order; they must still never be duplicated or lost
    #[test]
    fn test_undersized_bound_never_duplicates() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xb0b);
        for _ in 0..200 {
            let frames = rng.gen_range(2..80u32);
            let mut order: Vec<u32> = (0..frames).collect();
            order.shuffle(&mut rng);

            let (mut shown, _) = run(&order, 8, 2);
            assert_eq!(shown.len(), frames as usize);
            shown.sort_unstable();
            shown.dedup();
            assert_eq!(shown.len(), frames as usize);
        }
    }
}
