//! Deterministic in-process collaborators
//!
//! Coded frames are newline-terminated JSON [`LoopbackFrame`] headers. The
//! loopback codec "decodes" a frame by leasing a decode buffer and
//! attaching the coded buffer to it, so all frame metadata is read through
//! the attachment. These implementations drive the simulator binary and
//! the integration tests.

mod codec;
mod collator;
mod coordinator;
mod demux;
mod frame_parser;
mod manifestor;
mod output_timer;

pub use codec::LoopbackCodec;
pub use collator::LoopbackCollator;
pub use coordinator::LoopbackOutputCoordinator;
pub use demux::LoopbackDemultiplexor;
pub use frame_parser::LoopbackFrameParser;
pub use manifestor::{LoopbackManifestor, ManifestedFrame};
pub use output_timer::LoopbackOutputTimer;

use crate::buffer::ParsedFrameParameters;
use crate::components::StreamComponents;
use crate::error::{Error, Result};
use avpipe_common::time::NativeTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header of one loopback coded frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopbackFrame {
    pub decode_index: u32,
    #[serde(default)]
    pub display_index: Option<u32>,
    #[serde(default)]
    pub playback_time: Option<NativeTime>,
    #[serde(default)]
    pub key_frame: bool,
    #[serde(default)]
    pub new_stream_parameters: bool,
    #[serde(default)]
    pub collapse_holes: bool,
}

impl LoopbackFrame {
    /// Frame shown at `display_index`, one every 40ms of native time
    pub fn new(decode_index: u32, display_index: u32) -> Self {
        Self {
            decode_index,
            display_index: Some(display_index),
            playback_time: Some(u64::from(display_index) * 40_000),
            key_frame: decode_index == 0,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes =
            serde_json::to_vec(self).map_err(|e| Error::Component(format!("Encoding frame header: {}", e)))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let line = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        serde_json::from_slice(line).map_err(|e| Error::Component(format!("Decoding frame header: {}", e)))
    }

    pub(crate) fn parsed_parameters(&self) -> ParsedFrameParameters {
        ParsedFrameParameters {
            decode_frame_index: self.decode_index,
            display_frame_index: self.display_index,
            native_playback_time: self.playback_time,
            first_parsed_partition_of_decode_frame: true,
            key_frame: self.key_frame,
            reference_frame: self.key_frame,
            new_stream_parameters: self.new_stream_parameters,
            collapse_holes_in_display_indices: self.collapse_holes,
        }
    }
}

/// Encode a run of frames into one input chunk
pub fn encode_frames(frames: &[LoopbackFrame]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for frame in frames {
        data.extend(frame.encode()?);
    }
    Ok(data)
}

/// A full set of loopback collaborators for one stream
#[derive(Clone)]
pub struct LoopbackStream {
    pub collator: Arc<LoopbackCollator>,
    pub frame_parser: Arc<LoopbackFrameParser>,
    pub codec: Arc<LoopbackCodec>,
    pub output_timer: Arc<LoopbackOutputTimer>,
    pub manifestor: Arc<LoopbackManifestor>,
}

impl LoopbackStream {
    /// Collaborators with `decode_buffers` decode buffers and a codec that
    /// holds up to `codec_delay` frames before output
    pub fn new(decode_buffers: usize, codec_delay: usize) -> Self {
        let manifestor = Arc::new(LoopbackManifestor::new(decode_buffers));
        Self {
            collator: Arc::new(LoopbackCollator::new()),
            frame_parser: Arc::new(LoopbackFrameParser::new()),
            codec: Arc::new(LoopbackCodec::new(manifestor.pool(), codec_delay)),
            output_timer: Arc::new(LoopbackOutputTimer::new()),
            manifestor,
        }
    }

    pub fn components(&self) -> StreamComponents {
        StreamComponents {
            collator: self.collator.clone(),
            frame_parser: self.frame_parser.clone(),
            codec: self.codec.clone(),
            output_timer: self.output_timer.clone(),
            manifestor: Some(self.manifestor.clone()),
        }
    }

    /// Same collaborators without a manifestor (two-stage stream)
    pub fn components_without_manifestor(&self) -> StreamComponents {
        StreamComponents {
            manifestor: None,
            ..self.components()
        }
    }
}
