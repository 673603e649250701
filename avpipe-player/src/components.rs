//! Collaborator interfaces
//!
//! The pipeline drives these traits but does not implement them. Each
//! collaborator is registered with a [`ComponentContext`] describing the
//! stream it serves, and the producing collaborators are given the ring
//! their output must be inserted into.
//!
//! All methods are synchronous and must return promptly; a stage task calls
//! them directly.

use crate::buffer::{Buffer, BufferPool};
use crate::control::ReferenceFrameRelease;
use crate::error::{Error, Result};
use crate::player::stream::Stream;
use crate::ring::BufferRing;
use avpipe_common::events::EventRecord;
use avpipe_common::time::NativeTime;
use avpipe_common::{PlayDirection, PlaybackId, StreamId, StreamType};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Operations every collaborator supports
pub trait BaseComponent: Send + Sync {
    fn register_player(&self, _context: ComponentContext) -> Result<()> {
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn set_module_parameters(&self, _parameters: &[u8]) -> Result<()> {
        Err(Error::NotSupported("set_module_parameters".to_string()))
    }
}

/// Turns raw input into coded-frame buffers
pub trait Collator: BaseComponent {
    fn register_output_ring(&self, ring: Arc<BufferRing>) -> Result<()>;

    fn input(&self, data: &[u8]) -> Result<()>;

    /// Discontinuity in the input; an empty coded frame signals it downstream
    fn input_jump(&self, surplus_data: bool, continuous_reverse_jump: bool) -> Result<()>;

    fn discard_accumulated_data(&self) -> Result<()>;
}

/// Derives frame parameters (display order, timing) from coded frames
pub trait FrameParser: BaseComponent {
    fn register_output_ring(&self, ring: Arc<BufferRing>) -> Result<()>;

    fn input(&self, buffer: Buffer) -> Result<()>;
}

/// Produces decode buffers from parsed coded frames
pub trait Codec: BaseComponent {
    fn register_output_ring(&self, ring: Arc<BufferRing>) -> Result<()>;

    fn input(&self, buffer: Buffer) -> Result<()>;

    fn output_partial_decode_buffers(&self) -> Result<()>;

    fn discard_queued_decodes(&self) -> Result<()>;

    fn release_reference_frame(&self, release: ReferenceFrameRelease) -> Result<()>;

    /// A decode buffer the codec produced is no longer needed downstream
    fn release_decode_buffer(&self, buffer: Buffer) -> Result<()> {
        drop(buffer);
        Ok(())
    }
}

/// Admission to the decode window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeWindow {
    Enter,
    /// Not yet; ask again after this long
    Wait(Duration),
}

/// Points at which the output timer may drop a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDropPoint {
    BeforeDecodeWindow,
    BeforeDecode,
    BeforeOutputTiming,
    BeforeManifestation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDrop {
    Keep,
    Drop,
}

/// Maps native time onto the output clock
pub trait OutputTimer: BaseComponent {
    fn register_output_coordinator(&self, coordinator: Arc<dyn OutputCoordinator>) -> Result<()>;

    fn await_entry_into_decode_window(&self, buffer: &Buffer) -> Result<DecodeWindow>;

    fn test_for_frame_drop(&self, buffer: &Buffer, point: FrameDropPoint) -> FrameDrop;

    fn generate_frame_timing(&self, buffer: &Buffer) -> Result<()>;

    fn record_actual_frame_timing(&self, buffer: &Buffer) -> Result<()>;

    fn reset_time_mapping(&self) -> Result<()>;
}

/// Presents decode buffers and returns them once shown
pub trait Manifestor: BaseComponent {
    fn register_output_ring(&self, ring: Arc<BufferRing>) -> Result<()>;

    /// Pool the codec decodes into
    fn decode_buffer_pool(&self) -> Result<BufferPool>;

    fn queue_decode_buffer(&self, buffer: Buffer) -> Result<()>;

    /// Return every queued but unshown buffer to the output ring
    fn release_queued_decode_buffers(&self) -> Result<()>;

    /// Stop showing the current frame
    fn queue_null_manifestation(&self) -> Result<()>;

    fn queue_event_signal(&self, event: EventRecord) -> Result<()>;

    /// When the last queued frame will be shown, if any is queued
    fn next_queued_manifestation_time(&self) -> Option<Instant>;
}

/// Shared clock arbitration between the streams of one playback
pub trait OutputCoordinator: Send + Sync {
    fn register_stream(&self, stream: StreamId, stream_type: StreamType) -> Result<()>;

    fn deregister_stream(&self, stream: StreamId) -> Result<()>;

    fn set_playback_speed(&self, speed: f64, direction: PlayDirection) -> Result<()>;

    fn halt(&self) -> Result<()> {
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }
}

/// One elementary-stream packet split out of a multiplex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxedPacket {
    pub identifier: u32,
    pub data: Vec<u8>,
}

/// Splits multiplexed input into per-stream packets
pub trait Demultiplexor: Send + Sync {
    fn demux(&self, data: &[u8]) -> Result<Vec<DemuxedPacket>>;
}

/// Window of native time to present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentationInterval {
    pub start: Option<NativeTime>,
    pub end: Option<NativeTime>,
}

impl PresentationInterval {
    pub fn contains(&self, time: NativeTime) -> bool {
        self.start.map_or(true, |start| time >= start) && self.end.map_or(true, |end| time <= end)
    }
}

/// What a collaborator knows about the stream it serves
#[derive(Clone)]
pub struct ComponentContext {
    pub playback: PlaybackId,
    pub stream: StreamId,
    pub stream_type: StreamType,
    pub coded_frame_pool: BufferPool,
    pub(crate) owner: Weak<Stream>,
}

impl ComponentContext {
    /// Raise an event on behalf of this stream
    pub fn signal_event(&self, record: EventRecord) {
        if let Some(stream) = self.owner.upgrade() {
            stream
                .ctx
                .events
                .signal(record.with_playback(self.playback).with_stream(self.stream));
        }
    }

    /// Stop further processing of this stream's data
    pub fn mark_stream_unplayable(&self) -> Result<()> {
        let stream = self.owner.upgrade().ok_or(Error::UnknownStream)?;
        stream.mark_unplayable()
    }

    /// Report a frame discarded before decode so its display slot can be skipped
    pub fn record_non_decoded_frame(&self, buffer: Buffer) -> Result<()> {
        let stream = self.owner.upgrade().ok_or(Error::UnknownStream)?;
        stream.record_non_decoded_frame(buffer)
    }

    pub fn presentation_interval(&self) -> PresentationInterval {
        self.owner
            .upgrade()
            .map(|stream| stream.presentation_interval())
            .unwrap_or_default()
    }

    pub fn playback_speed(&self) -> (f64, PlayDirection) {
        self.owner
            .upgrade()
            .map(|stream| stream.playback_speed())
            .unwrap_or((1.0, PlayDirection::Forward))
    }
}

impl std::fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("playback", &self.playback)
            .field("stream", &self.stream)
            .field("stream_type", &self.stream_type)
            .finish()
    }
}

/// Collaborators of one stream
#[derive(Clone)]
pub struct StreamComponents {
    pub collator: Arc<dyn Collator>,
    pub frame_parser: Arc<dyn FrameParser>,
    pub codec: Arc<dyn Codec>,
    pub output_timer: Arc<dyn OutputTimer>,
    pub manifestor: Option<Arc<dyn Manifestor>>,
}

/// Replacements for a stream switch; `None` keeps the current collaborator
#[derive(Clone, Default)]
pub struct SwitchComponents {
    pub frame_parser: Option<Arc<dyn FrameParser>>,
    pub codec: Option<Arc<dyn Codec>>,
    pub output_timer: Option<Arc<dyn OutputTimer>>,
}
