//! Collate→Parse: sequence numbering and hand-off to the frame parser

use super::{Boundary, StageCore, StageInput};
use crate::buffer::{Buffer, OwnerTag, SequenceNumber};
use crate::player::stream::Stream;
use crate::ring::RingItem;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) async fn run(stream: Arc<Stream>) {
    let input = Arc::clone(&stream.collated_ring);
    let mut core = StageCore::new(stream, Boundary::CollateToParse, input);

    loop {
        match core.next_item().await {
            StageInput::Terminate => break,
            StageInput::Idle | StageInput::Item(RingItem::Poke) => continue,
            StageInput::Item(RingItem::Control(control)) => core.handle_control(control).await,
            StageInput::Item(RingItem::Buffer(buffer)) => handle_buffer(&mut core, buffer).await,
        }
    }
    core.shutdown();
}

async fn handle_buffer(core: &mut StageCore, buffer: Buffer) {
    let stream = Arc::clone(&core.stream);
    let is_marker = buffer.is_marker();

    let sequence = if is_marker {
        let value = buffer.sequence_number().map_or(0, |s| s.value);
        if !stream.is_current_marker(&buffer) {
            warn!("{}: marker {} is not the one in flight", stream.id, value);
        }
        value
    } else {
        let value = stream.take_next_sequence_number();
        let assigned = buffer.update_sequence_number(|s| {
            s.value = value;
            s.marker_frame = false;
        });
        if !assigned {
            buffer.set_sequence_number(SequenceNumber {
                value,
                ..SequenceNumber::default()
            });
        }
        value
    };

    core.stamp_entry(&buffer);
    stream.with_statistics(|s| s.entered(Boundary::CollateToParse));
    core.observe(sequence);
    let time = buffer.coded_frame_parameters().and_then(|p| p.playback_time);
    core.observe_time(time);

    core.process_before(Some(sequence), time).await;

    if is_marker {
        debug!("{}: marker {} passed Collate->Parse", stream.id, sequence);
        stream.advance_sequence_past(sequence);
        stream.set_discard(Boundary::CollateToParse, false);
        core.forward(&stream.parsed_ring, buffer).await;
    } else if (stream.discard(Boundary::CollateToParse) || stream.is_unplayable()) && buffer.payload_len() > 0 {
        trace!("{}: discarding coded frame {}", stream.id, sequence);
        stream.with_statistics(|s| s.discarded(Boundary::CollateToParse));
        drop(buffer);
    } else {
        let mut buffer = buffer;
        buffer.transfer_ownership(OwnerTag::FrameParser);
        if let Err(e) = stream.components().frame_parser.input(buffer) {
            warn!("{}: frame parser rejected frame {}: {}", stream.id, sequence, e);
        }
    }

    core.process_after(Some(sequence), time).await;
}
