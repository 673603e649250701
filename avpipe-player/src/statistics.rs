//! Per-stream counters

use crate::pipeline::Boundary;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStatistics {
    /// Data buffers seen entering each stage
    pub frames_entered: [u64; Boundary::COUNT],
    /// Data buffers dropped at each stage instead of being forwarded
    pub frames_discarded: [u64; Boundary::COUNT],
    pub frames_manifested: u64,
    pub frames_retimed: u64,
    pub controls_executed: u64,
    pub controls_accumulated: u64,
    pub reordering_failures: u64,
    pub non_decoded_frames: u64,
    pub markers_completed: u64,
    /// Longest observed time from Collate→Parse to Post-Manifest
    pub max_latency: Option<Duration>,
}

impl StreamStatistics {
    pub(crate) fn entered(&mut self, boundary: Boundary) {
        self.frames_entered[boundary.index()] += 1;
    }

    pub(crate) fn discarded(&mut self, boundary: Boundary) {
        self.frames_discarded[boundary.index()] += 1;
    }

    pub(crate) fn record_latency(&mut self, latency: Duration) {
        self.max_latency = Some(self.max_latency.map_or(latency, |max| max.max(latency)));
    }
}
