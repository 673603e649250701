//! Per-stage tables of control messages waiting for their threshold

use crate::control::ControlStructure;
use avpipe_common::time::NativeTime;

/// Before and after tables for one stage boundary
pub(crate) struct AccumulatedControls {
    before: Vec<ControlStructure>,
    after: Vec<ControlStructure>,
    capacity: usize,
}

impl AccumulatedControls {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            before: Vec::with_capacity(capacity),
            after: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Hold a control until it becomes eligible; hands it back if the
    /// relevant table is full
    pub(crate) fn accumulate(&mut self, control: ControlStructure) -> Result<(), ControlStructure> {
        let table = if control.sequence.is_before() {
            &mut self.before
        } else {
            &mut self.after
        };
        if table.len() >= self.capacity {
            return Err(control);
        }
        table.push(control);
        Ok(())
    }

    /// Remove, in arrival order, every control whose threshold is reached
    pub(crate) fn take_ready(
        &mut self,
        before: bool,
        sequence: Option<u64>,
        time: Option<NativeTime>,
    ) -> Vec<ControlStructure> {
        let table = if before { &mut self.before } else { &mut self.after };
        if table.is_empty() {
            return Vec::new();
        }
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(table)
            .into_iter()
            .partition(|c| c.sequence.satisfied_by(sequence, time));
        *table = waiting;
        ready
    }

    pub(crate) fn len(&self) -> usize {
        self.before.len() + self.after.len()
    }

    /// Drop everything held, returning how many entries there were
    pub(crate) fn clear(&mut self) -> usize {
        let held = self.len();
        self.before.clear();
        self.after.clear();
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferKind, BufferPool};
    use crate::control::{InSequenceCall, SequenceType};

    fn control(pool: &BufferPool, sequence: SequenceType) -> ControlStructure {
        ControlStructure::new(pool, sequence, InSequenceCall::CodecOutputPartialDecodeBuffers).unwrap()
    }

    #[test]
    fn test_before_and_after_are_separate() {
        let pool = BufferPool::new(BufferKind::ControlStructure, "controls", 8, 0, 0);
        let mut table = AccumulatedControls::new(1);

        table.accumulate(control(&pool, SequenceType::BeforeSequenceNumber(5))).unwrap();
        table.accumulate(control(&pool, SequenceType::AfterSequenceNumber(5))).unwrap();
        assert!(table
            .accumulate(control(&pool, SequenceType::BeforeSequenceNumber(6)))
            .is_err());

        assert!(table.take_ready(true, Some(4), None).is_empty());
        assert_eq!(table.take_ready(true, Some(5), None).len(), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.take_ready(false, Some(7), None).len(), 1);
    }

    #[test]
    fn test_ready_entries_keep_arrival_order() {
        let pool = BufferPool::new(BufferKind::ControlStructure, "controls", 8, 0, 0);
        let mut table = AccumulatedControls::new(4);
        table.accumulate(control(&pool, SequenceType::BeforeSequenceNumber(3))).unwrap();
        table.accumulate(control(&pool, SequenceType::BeforeSequenceNumber(9))).unwrap();
        table.accumulate(control(&pool, SequenceType::BeforeSequenceNumber(1))).unwrap();

        let ready: Vec<SequenceType> = table
            .take_ready(true, Some(3), None)
            .into_iter()
            .map(|c| c.sequence)
            .collect();
        assert_eq!(
            ready,
            vec![
                SequenceType::BeforeSequenceNumber(3),
                SequenceType::BeforeSequenceNumber(1)
            ]
        );
        assert_eq!(table.clear(), 1);
    }

    #[test]
    fn test_time_thresholds_need_a_time() {
        let pool = BufferPool::new(BufferKind::ControlStructure, "controls", 8, 0, 0);
        let mut table = AccumulatedControls::new(4);
        table.accumulate(control(&pool, SequenceType::BeforePlaybackTime(500))).unwrap();

        assert!(table.take_ready(true, Some(1000), None).is_empty());
        assert_eq!(table.take_ready(true, None, Some(500)).len(), 1);
    }
}
