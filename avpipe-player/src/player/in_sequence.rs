//! Scheduling and execution of in-sequence calls

use super::stream::Stream;
use super::switch;
use crate::control::{Component, ControlStructure, InSequenceCall, SequenceType};
use crate::components::StreamComponents;
use crate::error::{Error, Result};
use crate::pipeline::Boundary;
use crate::ring::RingItem;
use crate::sync::lock;
use std::sync::Arc;
use tracing::{debug, trace};

/// Queue `call` into the ring of the stage that executes it
///
/// The call runs once that stage has seen the threshold named by
/// `sequence`; `Immediate` calls run as soon as the stage reaches them.
pub(crate) fn call_in_sequence(stream: &Arc<Stream>, sequence: SequenceType, call: InSequenceCall) -> Result<()> {
    let ring = stream.destination_ring(&call)?;
    let name = call.name();
    let control = ControlStructure::new(&stream.control_pool, sequence, call)?;

    trace!("{}: queueing {} {:?}", stream.id, name, sequence);
    ring.insert(RingItem::Control(control)).map_err(|full| {
        Error::TooMany(format!(
            "Ring of {} entries full while queueing {}",
            full.capacity, name
        ))
    })
}

/// Execute an in-sequence call on the stage task that reached it
pub(crate) async fn perform(stream: &Arc<Stream>, call: InSequenceCall) -> Result<()> {
    let components = stream.components();
    match call {
        InSequenceCall::SetModuleParameters {
            component,
            parameters,
        } => apply_module_parameters(&components, component, parameters.as_bytes()),
        InSequenceCall::SetModuleParametersInInputOrder {
            component,
            parameters,
        } => {
            // Everything injected ahead of this call has been numbered
            if component.boundary() == Boundary::CollateToParse {
                return apply_module_parameters(&components, component, parameters.as_bytes());
            }
            let next = lock(&stream.state).next_sequence_number;
            call_in_sequence(
                stream,
                SequenceType::BeforeSequenceNumber(next),
                InSequenceCall::SetModuleParameters {
                    component,
                    parameters,
                },
            )
        }
        InSequenceCall::CodecReleaseReferenceFrame(release) => components.codec.release_reference_frame(release),
        InSequenceCall::CodecOutputPartialDecodeBuffers => components.codec.output_partial_decode_buffers(),
        InSequenceCall::OutputTimerResetTimeMapping => components.output_timer.reset_time_mapping(),
        InSequenceCall::ManifestorQueueEventSignal(record) => match &components.manifestor {
            Some(manifestor) => manifestor.queue_event_signal(record),
            None => Err(Error::NotSupported("No manifestor".to_string())),
        },
        InSequenceCall::SignalEvent(record) => {
            stream.ctx.events.signal(record);
            Ok(())
        }
        InSequenceCall::SetEventOnPostManifestation(signal) => {
            debug!("{}: data ahead of post-manifest event has cleared", stream.id);
            signal.set();
            Ok(())
        }
        InSequenceCall::SwitchFrameParser => switch::switch_frame_parser(stream),
        InSequenceCall::SwitchCodec => switch::switch_codec(stream).await,
        InSequenceCall::SwitchOutputTimer => switch::switch_output_timer(stream),
        InSequenceCall::SwitchComplete => switch::switch_complete(stream),
    }
}

fn apply_module_parameters(components: &StreamComponents, component: Component, bytes: &[u8]) -> Result<()> {
    match component {
        Component::Collator => components.collator.set_module_parameters(bytes),
        Component::FrameParser => components.frame_parser.set_module_parameters(bytes),
        Component::Codec => components.codec.set_module_parameters(bytes),
        Component::OutputTimer => components.output_timer.set_module_parameters(bytes),
        Component::Manifestor => match &components.manifestor {
            Some(manifestor) => manifestor.set_module_parameters(bytes),
            None => Err(Error::NotSupported("No manifestor".to_string())),
        },
    }
}
