//! Event types for the avpipe event queue
//!
//! Events are delivered to callers through the player's event queue. Each
//! record carries an [`EventCode`], the playback and stream it concerns, an
//! optional native playback time and an opaque user value supplied when the
//! event was requested.

use crate::ids::{PlaybackId, StreamId};
use crate::time::NativeTime;
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Event identifiers
///
/// Each code owns one bit so that waiters can filter with an [`EventMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCode {
    FirstFrameManifested,
    PlaybackTerminated,
    StreamTerminated,
    StreamSwitched,
    StreamDrained,
    TimeNotification,
    DecodeBufferAvailable,
    PlaybackCreated,
    StreamCreated,
    StreamUnPlayable,
    InputFormatChanged,
    FrameRateChanged,
}

impl EventCode {
    /// The mask bit for this code
    pub const fn bit(self) -> u32 {
        match self {
            EventCode::FirstFrameManifested => 0x0001,
            EventCode::PlaybackTerminated => 0x0002,
            EventCode::StreamTerminated => 0x0004,
            EventCode::StreamSwitched => 0x0008,
            EventCode::StreamDrained => 0x0010,
            EventCode::TimeNotification => 0x0020,
            EventCode::DecodeBufferAvailable => 0x0040,
            EventCode::PlaybackCreated => 0x0080,
            EventCode::StreamCreated => 0x0100,
            EventCode::StreamUnPlayable => 0x0200,
            EventCode::InputFormatChanged => 0x0400,
            EventCode::FrameRateChanged => 0x0800,
        }
    }

    pub const fn mask(self) -> EventMask {
        EventMask(self.bit())
    }
}

/// Bit set of event codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventMask(pub u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const ALL: EventMask = EventMask(u32::MAX);

    pub const fn contains(self, code: EventCode) -> bool {
        self.0 & code.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<EventCode> for EventMask {
    fn from(code: EventCode) -> Self {
        code.mask()
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOr<EventCode> for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventCode) -> EventMask {
        EventMask(self.0 | rhs.bit())
    }
}

impl BitOr for EventCode {
    type Output = EventMask;

    fn bitor(self, rhs: EventCode) -> EventMask {
        EventMask(self.bit() | rhs.bit())
    }
}

impl BitOrAssign<EventCode> for EventMask {
    fn bitor_assign(&mut self, rhs: EventCode) {
        self.0 |= rhs.bit();
    }
}

/// One delivered (or pending) event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub code: EventCode,
    pub playback: Option<PlaybackId>,
    pub stream: Option<StreamId>,
    /// Native playback time the event refers to, when known
    pub playback_time: Option<NativeTime>,
    /// Opaque value supplied by whoever requested the event
    pub user_data: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl EventRecord {
    pub fn new(code: EventCode) -> Self {
        Self {
            code,
            playback: None,
            stream: None,
            playback_time: None,
            user_data: 0,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_playback(mut self, playback: PlaybackId) -> Self {
        self.playback = Some(playback);
        self
    }

    pub fn with_stream(mut self, stream: StreamId) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_playback_time(mut self, time: NativeTime) -> Self {
        self.playback_time = Some(time);
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }

    /// True when this record passes a (playback, stream, mask) filter
    ///
    /// A `None` playback or stream in the filter matches any value.
    pub fn matches(
        &self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        mask: EventMask,
    ) -> bool {
        mask.contains(self.code)
            && playback.map_or(true, |p| self.playback == Some(p))
            && stream.map_or(true, |s| self.stream == Some(s))
    }

    /// Serialize for logging or external transport
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
