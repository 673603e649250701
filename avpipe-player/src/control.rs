//! In-sequence control requests
//!
//! A [`ControlStructure`] travels through the same rings as data buffers so
//! that it is ordered against them without any other synchronisation. Each
//! one names its target operation as an [`InSequenceCall`] and the point in
//! the data flow at which it must run as a [`SequenceType`].

use crate::buffer::{Buffer, BufferPool, OwnerTag};
use crate::error::{Error, Result};
use crate::pipeline::Boundary;
use crate::sync::Signal;
use avpipe_common::events::EventRecord;
use avpipe_common::time::NativeTime;
use std::fmt;

/// When an in-sequence call becomes eligible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceType {
    Immediate,
    BeforeSequenceNumber(u64),
    AfterSequenceNumber(u64),
    BeforePlaybackTime(NativeTime),
    AfterPlaybackTime(NativeTime),
}

impl SequenceType {
    pub fn is_immediate(&self) -> bool {
        matches!(self, SequenceType::Immediate)
    }

    /// Before variants are checked ahead of forwarding a buffer
    pub fn is_before(&self) -> bool {
        matches!(
            self,
            SequenceType::BeforeSequenceNumber(_) | SequenceType::BeforePlaybackTime(_)
        )
    }

    /// True once the threshold is reached by what a stage has observed
    ///
    /// Sequence thresholds compare against the highest sequence number seen
    /// at the stage; time thresholds against the native time of the buffer
    /// being handled. An unknown key never satisfies a threshold.
    pub fn satisfied_by(&self, sequence: Option<u64>, time: Option<NativeTime>) -> bool {
        match *self {
            SequenceType::Immediate => true,
            SequenceType::BeforeSequenceNumber(threshold)
            | SequenceType::AfterSequenceNumber(threshold) => {
                sequence.map_or(false, |seen| seen >= threshold)
            }
            SequenceType::BeforePlaybackTime(threshold)
            | SequenceType::AfterPlaybackTime(threshold) => {
                time.map_or(false, |seen| seen >= threshold)
            }
        }
    }
}

/// Collaborators addressable by a parameter update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Collator,
    FrameParser,
    Codec,
    OutputTimer,
    Manifestor,
}

impl Component {
    /// Stage boundary at which this component consumes data
    pub fn boundary(self) -> Boundary {
        match self {
            Component::Collator | Component::FrameParser => Boundary::CollateToParse,
            Component::Codec => Boundary::ParseToDecode,
            Component::OutputTimer | Component::Manifestor => Boundary::DecodeToManifest,
        }
    }
}

/// Size-checked opaque parameter block
#[derive(Clone, PartialEq, Eq)]
pub struct ParameterBlock(Vec<u8>);

impl ParameterBlock {
    pub fn new(bytes: impl Into<Vec<u8>>, limit: usize) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > limit {
            return Err(Error::InvalidParameter(format!(
                "Parameter block of {} bytes exceeds limit of {}",
                bytes.len(),
                limit
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ParameterBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParameterBlock({} bytes)", self.0.len())
    }
}

/// Which reference frames a codec should let go of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFrameRelease {
    All,
    DecodeIndex(u32),
}

/// Target operation of an in-sequence call
#[derive(Debug, Clone)]
pub enum InSequenceCall {
    SetModuleParameters {
        component: Component,
        parameters: ParameterBlock,
    },
    /// Parameter update ordered behind the data already injected; once
    /// Collate->Parse has numbered that data it becomes a
    /// `SetModuleParameters` before the next sequence number
    SetModuleParametersInInputOrder {
        component: Component,
        parameters: ParameterBlock,
    },
    CodecReleaseReferenceFrame(ReferenceFrameRelease),
    CodecOutputPartialDecodeBuffers,
    OutputTimerResetTimeMapping,
    /// Manifestor raises the event when its next frame is shown
    ManifestorQueueEventSignal(EventRecord),
    /// Player raises the event directly
    SignalEvent(EventRecord),
    /// Sets an event once all preceding data has left manifestation
    SetEventOnPostManifestation(Signal),
    SwitchFrameParser,
    SwitchCodec,
    SwitchOutputTimer,
    SwitchComplete,
}

impl InSequenceCall {
    /// Stage that executes this call
    pub fn destination(&self) -> Boundary {
        match self {
            InSequenceCall::SetModuleParameters { component, .. } => component.boundary(),
            InSequenceCall::SetModuleParametersInInputOrder { .. } => Boundary::CollateToParse,
            InSequenceCall::CodecReleaseReferenceFrame(_)
            | InSequenceCall::CodecOutputPartialDecodeBuffers => Boundary::ParseToDecode,
            InSequenceCall::OutputTimerResetTimeMapping
            | InSequenceCall::ManifestorQueueEventSignal(_) => Boundary::DecodeToManifest,
            InSequenceCall::SignalEvent(_) | InSequenceCall::SetEventOnPostManifestation(_) => {
                Boundary::PostManifest
            }
            InSequenceCall::SwitchFrameParser => Boundary::CollateToParse,
            InSequenceCall::SwitchCodec => Boundary::ParseToDecode,
            InSequenceCall::SwitchOutputTimer => Boundary::DecodeToManifest,
            InSequenceCall::SwitchComplete => Boundary::PostManifest,
        }
    }

    /// Calls that only make sense with a manifestor attached
    pub fn requires_manifestor(&self) -> bool {
        matches!(
            self,
            InSequenceCall::ManifestorQueueEventSignal(_)
                | InSequenceCall::SetModuleParameters {
                    component: Component::Manifestor,
                    ..
                }
                | InSequenceCall::SetModuleParametersInInputOrder {
                    component: Component::Manifestor,
                    ..
                }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            InSequenceCall::SetModuleParameters { .. } => "SetModuleParameters",
            InSequenceCall::SetModuleParametersInInputOrder { .. } => "SetModuleParametersInInputOrder",
            InSequenceCall::CodecReleaseReferenceFrame(_) => "CodecReleaseReferenceFrame",
            InSequenceCall::CodecOutputPartialDecodeBuffers => "CodecOutputPartialDecodeBuffers",
            InSequenceCall::OutputTimerResetTimeMapping => "OutputTimerResetTimeMapping",
            InSequenceCall::ManifestorQueueEventSignal(_) => "ManifestorQueueEventSignal",
            InSequenceCall::SignalEvent(_) => "SignalEvent",
            InSequenceCall::SetEventOnPostManifestation(_) => "SetEventOnPostManifestation",
            InSequenceCall::SwitchFrameParser => "SwitchFrameParser",
            InSequenceCall::SwitchCodec => "SwitchCodec",
            InSequenceCall::SwitchOutputTimer => "SwitchOutputTimer",
            InSequenceCall::SwitchComplete => "SwitchComplete",
        }
    }
}

/// Pooled control request
///
/// Holds a lease on a control-structure pool buffer for its whole life, so
/// the number of requests in flight per stream is bounded by that pool.
pub struct ControlStructure {
    pub sequence: SequenceType,
    pub call: InSequenceCall,
    _lease: Buffer,
}

impl ControlStructure {
    pub(crate) fn new(pool: &BufferPool, sequence: SequenceType, call: InSequenceCall) -> Result<Self> {
        let lease = pool.get_buffer(OwnerTag::InSequenceCall, 0).map_err(|_| {
            Error::InsufficientResources(format!(
                "No control structure available for {}",
                call.name()
            ))
        })?;
        Ok(Self {
            sequence,
            call,
            _lease: lease,
        })
    }
}

impl fmt::Debug for ControlStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlStructure")
            .field("sequence", &self.sequence)
            .field("call", &self.call.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;

    #[test]
    fn test_threshold_checks() {
        let before = SequenceType::BeforeSequenceNumber(5);
        assert!(!before.satisfied_by(Some(3), None));
        assert!(before.satisfied_by(Some(5), None));
        assert!(!before.satisfied_by(None, Some(100)));

        let after_time = SequenceType::AfterPlaybackTime(1000);
        assert!(!after_time.satisfied_by(Some(99), Some(999)));
        assert!(after_time.satisfied_by(None, Some(1000)));
        assert!(SequenceType::Immediate.satisfied_by(None, None));
    }

    #[test]
    fn test_oversized_parameter_block() {
        assert!(ParameterBlock::new(vec![0u8; 8], 8).is_ok());
        assert!(matches!(
            ParameterBlock::new(vec![0u8; 9], 8),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_destinations() {
        assert_eq!(InSequenceCall::SwitchCodec.destination(), Boundary::ParseToDecode);
        assert_eq!(InSequenceCall::SwitchComplete.destination(), Boundary::PostManifest);
        let params = InSequenceCall::SetModuleParameters {
            component: Component::FrameParser,
            parameters: ParameterBlock::new(vec![1], 4).unwrap(),
        };
        assert_eq!(params.destination(), Boundary::CollateToParse);

        let ordered = InSequenceCall::SetModuleParametersInInputOrder {
            component: Component::Codec,
            parameters: ParameterBlock::new(vec![1], 4).unwrap(),
        };
        assert_eq!(ordered.destination(), Boundary::CollateToParse);
        assert_eq!(Component::Codec.boundary(), Boundary::ParseToDecode);
    }

    #[test]
    fn test_pool_exhaustion_is_insufficient_resources() {
        let pool = BufferPool::new(BufferKind::ControlStructure, "controls", 1, 0, 0);
        let _held = ControlStructure::new(&pool, SequenceType::Immediate, InSequenceCall::SwitchComplete)
            .unwrap();
        let second = ControlStructure::new(&pool, SequenceType::Immediate, InSequenceCall::SwitchComplete);
        assert!(matches!(second, Err(Error::InsufficientResources(_))));
    }
}
