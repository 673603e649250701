//! Playback: a set of streams sharing one output coordinator and clock

use super::stream::Stream;
use crate::components::{OutputCoordinator, PresentationInterval};
use crate::sync::lock;
use avpipe_common::config::{CodedBufferSizing, CodedBufferTable};
use avpipe_common::time::NativeTime;
use avpipe_common::{PlayDirection, PlaybackId, StreamId, StreamType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct Playback {
    pub(crate) id: PlaybackId,
    pub(crate) output_coordinator: Arc<dyn OutputCoordinator>,
    streams: Mutex<Vec<Arc<Stream>>>,
    speed: Mutex<(f64, PlayDirection)>,
    coded_buffers: Mutex<CodedBufferTable>,
    last_native_time: Mutex<Option<NativeTime>>,
    presentation_interval: Mutex<PresentationInterval>,
    terminating: AtomicBool,
}

impl Playback {
    pub(crate) fn new(output_coordinator: Arc<dyn OutputCoordinator>, coded_buffers: CodedBufferTable) -> Self {
        Self {
            id: PlaybackId::new(),
            output_coordinator,
            streams: Mutex::new(Vec::new()),
            speed: Mutex::new((1.0, PlayDirection::Forward)),
            coded_buffers: Mutex::new(coded_buffers),
            last_native_time: Mutex::new(None),
            presentation_interval: Mutex::new(PresentationInterval::default()),
            terminating: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> PlaybackId {
        self.id
    }

    pub(crate) fn streams(&self) -> Vec<Arc<Stream>> {
        lock(&self.streams).clone()
    }

    pub(crate) fn find_stream(&self, id: StreamId) -> Option<Arc<Stream>> {
        lock(&self.streams).iter().find(|s| s.id == id).cloned()
    }

    pub(crate) fn add_stream(&self, stream: Arc<Stream>) {
        lock(&self.streams).push(stream);
    }

    /// Returns the number of streams left
    pub(crate) fn remove_stream(&self, id: StreamId) -> usize {
        let mut streams = lock(&self.streams);
        streams.retain(|s| s.id != id);
        streams.len()
    }

    pub(crate) fn speed(&self) -> (f64, PlayDirection) {
        *lock(&self.speed)
    }

    pub(crate) fn set_speed(&self, speed: f64, direction: PlayDirection) {
        *lock(&self.speed) = (speed, direction);
    }

    pub(crate) fn coded_buffer_sizing(&self, stream_type: StreamType) -> Option<CodedBufferSizing> {
        lock(&self.coded_buffers).for_type(stream_type)
    }

    /// Sizing used by streams added after this call
    pub(crate) fn set_coded_buffer_sizing(
        &self,
        stream_type: StreamType,
        sizing: CodedBufferSizing,
    ) -> crate::error::Result<()> {
        lock(&self.coded_buffers).set_for_type(stream_type, sizing)?;
        Ok(())
    }

    pub(crate) fn last_native_time(&self) -> Option<NativeTime> {
        *lock(&self.last_native_time)
    }

    pub(crate) fn record_native_time(&self, time: NativeTime) {
        *lock(&self.last_native_time) = Some(time);
    }

    pub(crate) fn presentation_interval(&self) -> PresentationInterval {
        *lock(&self.presentation_interval)
    }

    pub(crate) fn set_presentation_interval(&self, interval: PresentationInterval) {
        *lock(&self.presentation_interval) = interval;
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub(crate) fn begin_termination(&self) -> bool {
        !self.terminating.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Playback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playback")
            .field("id", &self.id)
            .field("streams", &lock(&self.streams).len())
            .field("speed", &self.speed())
            .finish()
    }
}
