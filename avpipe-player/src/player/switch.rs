//! Stream switch: replace collaborators behind a drain marker
//!
//! ```text
//! idle → draining old → parser switch → codec switch → timer switch → complete
//! ```
//!
//! Each step is an in-sequence call keyed after the marker, so it runs on
//! the stage that owns the collaborator once everything ahead of the marker
//! has left that stage.

use super::drain::drain_stream_with_policy;
use super::in_sequence::call_in_sequence;
use super::stream::Stream;
use crate::components::SwitchComponents;
use crate::control::{InSequenceCall, ReferenceFrameRelease, SequenceType};
use crate::error::{Error, Result};
use crate::sync::lock;
use avpipe_common::events::{EventCode, EventRecord};
use avpipe_common::policy::Policy;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) async fn switch_stream(
    stream: &Arc<Stream>,
    targets: SwitchComponents,
    non_blocking: bool,
    event_user_data: Option<u64>,
) -> Result<()> {
    if stream
        .switch_in_progress
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(Error::Busy(format!("Switch already in progress on {}", stream.id)));
    }

    match schedule_switch(stream, targets, event_user_data).await {
        Ok(()) => {}
        Err(e) => {
            lock(&stream.state).switch_targets = None;
            stream.switch_in_progress.store(false, Ordering::Release);
            return Err(e);
        }
    }

    if non_blocking {
        return Ok(());
    }
    let wait = stream.ctx.config.timeouts.marker_time_through_codec()
        + stream.ctx.config.timeouts.discard_drain_time();
    if !stream.switch_done.wait(wait).await {
        warn!("{}: switch did not complete within {:?}", stream.id, wait);
        return Err(Error::TimedOut(format!("Switch of {}", stream.id)));
    }
    Ok(())
}

async fn schedule_switch(
    stream: &Arc<Stream>,
    targets: SwitchComponents,
    event_user_data: Option<u64>,
) -> Result<()> {
    info!(
        "{}: switching (parser: {}, codec: {}, timer: {})",
        stream.id,
        targets.frame_parser.is_some(),
        targets.codec.is_some(),
        targets.output_timer.is_some()
    );
    lock(&stream.state).switch_targets = Some(targets);
    stream.last_out_of_codec.reset();
    stream.switch_done.reset();

    drain_stream_with_policy(stream, true, None, Policy::PlayoutOnSwitch, false).await?;
    let marker = stream
        .drain_sequence_number()
        .ok_or_else(|| Error::Implementation("Drain left no marker value".to_string()))?;
    let after = SequenceType::AfterSequenceNumber(marker);

    call_in_sequence(stream, after, InSequenceCall::SwitchFrameParser)?;
    call_in_sequence(stream, after, InSequenceCall::SwitchCodec)?;
    call_in_sequence(stream, after, InSequenceCall::SwitchOutputTimer)?;
    call_in_sequence(stream, after, InSequenceCall::SwitchComplete)?;
    if let Some(user_data) = event_user_data {
        let record = EventRecord::new(EventCode::StreamSwitched)
            .with_playback(stream.playback_id)
            .with_stream(stream.id)
            .with_user_data(user_data);
        call_in_sequence(stream, after, InSequenceCall::SignalEvent(record))?;
    }
    Ok(())
}

fn switch_target<T>(stream: &Stream, take: impl FnOnce(&mut SwitchComponents) -> Option<T>) -> Option<T> {
    lock(&stream.state).switch_targets.as_mut().and_then(take)
}

pub(crate) fn switch_frame_parser(stream: &Arc<Stream>) -> Result<()> {
    let Some(parser) = switch_target(stream, |t| t.frame_parser.take()) else {
        debug!("{}: frame parser unchanged", stream.id);
        return Ok(());
    };

    let old = stream.components().frame_parser;
    if let Err(e) = old.halt().and_then(|_| old.reset()) {
        warn!("{}: outgoing frame parser: {}", stream.id, e);
    }
    parser.register_player(stream.component_context())?;
    parser.register_output_ring(Arc::clone(&stream.parsed_ring))?;
    stream.update_components(|c| c.frame_parser = parser);
    debug!("{}: frame parser switched", stream.id);
    Ok(())
}

/// Replace the codec once every decode it holds has left it
pub(crate) async fn switch_codec(stream: &Arc<Stream>) -> Result<()> {
    let Some(codec) = switch_target(stream, |t| t.codec.take()) else {
        debug!("{}: codec unchanged", stream.id);
        return Ok(());
    };

    stream.set_codec_reset(true);
    let old = stream.components().codec;
    if let Err(e) = old
        .output_partial_decode_buffers()
        .and_then(|_| old.release_reference_frame(ReferenceFrameRelease::All))
    {
        warn!("{}: outgoing codec flush: {}", stream.id, e);
    }

    // The timer switch runs on Decode→Manifest; without it nothing signals
    if stream.has_manifestor() {
        let wait = stream.ctx.config.timeouts.marker_time_through_codec();
        let left = tokio::select! {
            _ = stream.terminating.cancelled() => return Ok(()),
            left = stream.last_out_of_codec.wait(wait) => left,
        };
        if !left {
            warn!("{}: last decode did not leave the codec within {:?}", stream.id, wait);
        }
    }

    if let Err(e) = old.halt().and_then(|_| old.reset()) {
        warn!("{}: outgoing codec: {}", stream.id, e);
    }
    codec.register_player(stream.component_context())?;
    if let Some(ring) = &stream.decoded_ring {
        codec.register_output_ring(Arc::clone(ring))?;
    }
    stream.update_components(|c| c.codec = codec);
    debug!("{}: codec switched", stream.id);
    Ok(())
}

pub(crate) fn switch_output_timer(stream: &Arc<Stream>) -> Result<()> {
    let coordinator = stream
        .playback
        .upgrade()
        .map(|p| Arc::clone(&p.output_coordinator))
        .ok_or(Error::UnknownPlayback)?;

    let result = match switch_target(stream, |t| t.output_timer.take()) {
        Some(timer) => {
            let old = stream.components().output_timer;
            if let Err(e) = old.halt().and_then(|_| old.reset()) {
                warn!("{}: outgoing output timer: {}", stream.id, e);
            }
            let registered = timer
                .register_player(stream.component_context())
                .and_then(|_| timer.register_output_coordinator(coordinator));
            if registered.is_ok() {
                stream.update_components(|c| c.output_timer = timer);
            }
            registered
        }
        None => stream
            .components()
            .output_timer
            .register_output_coordinator(coordinator),
    };

    stream.last_out_of_codec.set();
    debug!("{}: output timer switch done", stream.id);
    result
}

pub(crate) fn switch_complete(stream: &Arc<Stream>) -> Result<()> {
    lock(&stream.state).switch_targets = None;
    stream.set_codec_reset(false);
    stream.clear_unplayable();
    stream.switch_in_progress.store(false, Ordering::Release);
    stream.switch_done.set();
    info!("{}: switch complete", stream.id);
    Ok(())
}
