//! Post-Manifest: timing statistics, retiming and return to the codec

use super::{Boundary, StageCore, StageInput};
use crate::buffer::{Buffer, OwnerTag};
use crate::player::stream::Stream;
use crate::ring::RingItem;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) async fn run(stream: Arc<Stream>) {
    let Some(input) = stream.manifested_ring.clone() else {
        return;
    };
    let mut core = StageCore::new(stream, Boundary::PostManifest, input);

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
    core.stamp_entry(&buffer);
    stream.with_statistics(|s| s.entered(Boundary::PostManifest));

    let sequence_number = buffer.sequence_number();
    let sequence = sequence_number.map(|s| s.value);
    let time = buffer.parsed_frame_parameters().and_then(|p| p.native_playback_time);
    if let Some(sequence) = sequence {
        core.observe(sequence);
    }
    core.observe_time(time);

    core.process_before(sequence, time).await;

    if buffer.is_marker() {
        debug!("{}: marker {:?} reached Post-Manifest", stream.id, sequence);
        stream.set_discard(Boundary::PostManifest, false);
        stream.marker_completed(&buffer);
    } else {
        if let Some(latency) = sequence_number.and_then(|s| s.latency_to(Boundary::PostManifest)) {
            stream.with_statistics(|s| s.record_latency(latency));
        }
        let manifested = sequence_number.map_or(false, |s| s.manifested);
        if manifested {
            record_manifested(&stream, &buffer, time);
        }
        if let Some(buffer) = retime(&stream, buffer, manifested) {
            stream.release_to_codec(&stream.components().codec, buffer);
        }
    }

    core.process_after(sequence, time).await;
}

fn record_manifested(stream: &Arc<Stream>, buffer: &Buffer, time: Option<u64>) {
    stream.with_statistics(|s| s.frames_manifested += 1);
    if let Err(e) = stream.components().output_timer.record_actual_frame_timing(buffer) {
        warn!("{}: recording frame timing failed: {}", stream.id, e);
    }
    if let (Some(time), Some(playback)) = (time, stream.playback.upgrade()) {
        playback.record_native_time(time);
    }
    if stream.retime_started().is_some() {
        trace!("{}: retimed frame shown, retime window closed", stream.id);
        stream.end_retime();
    }
}

/// Re-queue a frame handed back unshown during a retime window
///
/// Returns the buffer if it should go back to the codec instead.
fn retime(stream: &Arc<Stream>, mut buffer: Buffer, manifested: bool) -> Option<Buffer> {
    let Some(started) = stream.retime_started() else {
        return Some(buffer);
    };
    if manifested || stream.discard(Boundary::PostManifest) || stream.is_unplayable() {
        return Some(buffer);
    }
    let limit = stream.ctx.config.timeouts.retime_max();
    if started.elapsed() >= limit {
        warn!("{}: retime exceeded {:?}, releasing frame", stream.id, limit);
        stream.end_retime();
        return Some(buffer);
    }

    let components = stream.components();
    let Some(manifestor) = components.manifestor else {
        return Some(buffer);
    };
    if let Err(e) = components.output_timer.generate_frame_timing(&buffer) {
        warn!("{}: retiming failed: {}", stream.id, e);
        return Some(buffer);
    }
    buffer.transfer_ownership(OwnerTag::Manifestor);
    match manifestor.queue_decode_buffer(buffer) {
        Ok(()) => stream.with_statistics(|s| s.frames_retimed += 1),
        Err(e) => warn!("{}: manifestor rejected retimed frame: {}", stream.id, e),
    }
    None
}
