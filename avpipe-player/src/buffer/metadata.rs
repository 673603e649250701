//! Metadata carried by pipeline buffers

use crate::pipeline::Boundary;
use avpipe_common::time::NativeTime;
use std::time::Instant;

/// Metadata kinds a pool can attach to every buffer it hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataType {
    SequenceNumber,
    CodedFrameParameters,
    ParsedFrameParameters,
}

/// Ordering key of a coded frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SequenceNumber {
    /// Strictly increasing per stream; markers take a reserved value
    pub value: u64,
    pub marker_frame: bool,
    /// Time the buffer entered each stage
    pub stage_entry: [Option<Instant>; Boundary::COUNT],
    /// Set by the manifestor once the frame has actually been shown
    pub manifested: bool,
}

impl SequenceNumber {
    pub fn marker(value: u64) -> Self {
        Self {
            value,
            marker_frame: true,
            ..Self::default()
        }
    }

    /// Time from entering Collate→Parse to entering `boundary`
    pub fn latency_to(&self, boundary: Boundary) -> Option<std::time::Duration> {
        let start = self.stage_entry[Boundary::CollateToParse.index()]?;
        let end = self.stage_entry[boundary.index()]?;
        Some(end.saturating_duration_since(start))
    }
}

/// Parameters known once a frame has been collated
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CodedFrameParameters {
    pub playback_time: Option<NativeTime>,
    pub decode_time: Option<NativeTime>,
}

/// Parameters produced by the frame parser
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParsedFrameParameters {
    pub decode_frame_index: u32,
    /// Position in presentation order, when known
    pub display_frame_index: Option<u32>,
    pub native_playback_time: Option<NativeTime>,
    /// First partition of its decode frame (partitions share one output frame)
    pub first_parsed_partition_of_decode_frame: bool,
    pub key_frame: bool,
    pub reference_frame: bool,
    /// Stream parameters changed at this frame
    pub new_stream_parameters: bool,
    /// Release without waiting for lower display indices
    pub collapse_holes_in_display_indices: bool,
}

/// Per-slot metadata storage
#[derive(Debug, Default)]
pub(crate) struct BufferMetadata {
    pub(crate) sequence: Option<SequenceNumber>,
    pub(crate) coded: Option<CodedFrameParameters>,
    pub(crate) parsed: Option<ParsedFrameParameters>,
}

impl BufferMetadata {
    /// Fresh metadata with defaults for every attached type
    pub(crate) fn for_types(types: &[MetadataType]) -> Self {
        let mut metadata = Self::default();
        for t in types {
            match t {
                MetadataType::SequenceNumber => metadata.sequence = Some(SequenceNumber::default()),
                MetadataType::CodedFrameParameters => {
                    metadata.coded = Some(CodedFrameParameters::default())
                }
                MetadataType::ParsedFrameParameters => {
                    metadata.parsed = Some(ParsedFrameParameters::default())
                }
            }
        }
        metadata
    }
}
