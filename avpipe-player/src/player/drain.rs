//! Drain: flush or play out everything queued ahead of a marker
//!
//! ```text
//! idle → marker inserted → awaiting tail → complete | timed out
//! ```
//!
//! The marker takes the sequence value `next + max_ring_size`, so every
//! buffer already inside the stream orders before it. Discarding drains set
//! the discard-until-marker flags so stages drop data until the marker
//! passes them.

use super::in_sequence::call_in_sequence;
use super::playback::Playback;
use super::stream::Stream;
use crate::buffer::{OwnerTag, SequenceNumber};
use crate::control::{InSequenceCall, SequenceType};
use crate::error::{Error, Result};
use crate::pipeline::Boundary;
use crate::ring::RingItem;
use crate::sync::lock;
use avpipe_common::events::{EventCode, EventRecord};
use avpipe_common::policy::{Policy, PlayoutMode};
use avpipe_common::time::scale_by_speed;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drain one stream using the playout policy named by `policy`
///
/// With `parse_all_frames` the Collate→Parse boundary keeps forwarding so
/// the frame parser sees everything up to the marker.
pub(crate) async fn drain_stream_with_policy(
    stream: &Arc<Stream>,
    non_blocking: bool,
    event_user_data: Option<u64>,
    policy: Policy,
    parse_all_frames: bool,
) -> Result<()> {
    if stream.terminating.is_cancelled() {
        return Err(Error::UnknownStream);
    }
    let mode = PlayoutMode::from_value(stream.policy(policy));
    let (speed, _) = stream.playback_speed();
    let timeouts = &stream.ctx.config.timeouts;

    if stream.marker_in_flight() {
        debug!("{}: waiting for previous drain before starting another", stream.id);
        if !stream.drained.wait(scale_by_speed(timeouts.discard_drain_time(), speed)).await {
            return Err(Error::Implementation(format!(
                "Previous drain on {} never completed",
                stream.id
            )));
        }
    }

    if mode == PlayoutMode::Discard {
        begin_discard(stream, parse_all_frames);
    }

    let marker_value = insert_marker(stream).await?;
    info!(
        "{}: drain started ({:?}, marker {})",
        stream.id, mode, marker_value
    );

    call_in_sequence(
        stream,
        SequenceType::BeforeSequenceNumber(marker_value),
        InSequenceCall::OutputTimerResetTimeMapping,
    )?;
    if let Some(user_data) = event_user_data {
        let record = EventRecord::new(EventCode::StreamDrained)
            .with_playback(stream.playback_id)
            .with_stream(stream.id)
            .with_user_data(user_data);
        let call = if stream.has_manifestor() {
            InSequenceCall::ManifestorQueueEventSignal(record)
        } else {
            InSequenceCall::SignalEvent(record)
        };
        call_in_sequence(stream, SequenceType::BeforeSequenceNumber(marker_value), call)?;
    }
    call_in_sequence(
        stream,
        SequenceType::AfterSequenceNumber(marker_value),
        InSequenceCall::SetEventOnPostManifestation(stream.drained.clone()),
    )?;

    if non_blocking {
        return Ok(());
    }
    await_drain(stream, mode).await
}

/// Set the discard flags and flush work already queued in collaborators
fn begin_discard(stream: &Arc<Stream>, parse_all_frames: bool) {
    for boundary in Boundary::ALL {
        if boundary == Boundary::CollateToParse && parse_all_frames {
            continue;
        }
        stream.set_discard(boundary, true);
    }
    stream.end_retime();
    stream.single_step.set();

    let components = stream.components();
    let log = |what: &str, result: Result<()>| {
        if let Err(e) = result {
            warn!("{}: {} failed while discarding: {}", stream.id, what, e);
        }
    };
    log("collator input jump", components.collator.input_jump(true, false));
    log("codec discard", components.codec.discard_queued_decodes());
    log("codec flush", components.codec.output_partial_decode_buffers());
    if let Some(manifestor) = &components.manifestor {
        log("manifestor release", manifestor.release_queued_decode_buffers());
    }
}

/// Reserve the marker value and push the marker into the head ring
async fn insert_marker(stream: &Arc<Stream>) -> Result<u64> {
    let wait = stream.ctx.config.timeouts.discard_drain_time();
    let marker = stream
        .coded_frame_pool
        .get_buffer_wait(OwnerTag::Drain, 0, wait)
        .await?;

    let value = {
        let mut state = lock(&stream.state);
        let value = state.next_sequence_number + stream.ctx.config.limits.max_ring_size;
        state.marker_index = Some(marker.index());
        state.drain_sequence_number = Some(value);
        value
    };
    marker.set_sequence_number(SequenceNumber::marker(value));
    stream.drained.reset();

    if let Err(full) = stream.collated_ring.insert(RingItem::Buffer(marker)) {
        lock(&stream.state).marker_index = None;
        return Err(Error::TooMany(format!(
            "Collated ring of {} entries full, cannot insert drain marker",
            full.capacity
        )));
    }
    Ok(value)
}

/// Block until the marker has cleared the last stage
async fn await_drain(stream: &Arc<Stream>, mode: PlayoutMode) -> Result<()> {
    let (speed, _) = stream.playback_speed();
    let timeouts = &stream.ctx.config.timeouts;
    let wait = match mode {
        PlayoutMode::Discard => scale_by_speed(timeouts.discard_drain_time(), speed),
        PlayoutMode::Playout => scale_by_speed(timeouts.playout_time(), speed),
    };

    if !stream.drained.wait(wait).await {
        warn!("{}: drain did not complete within {:?}", stream.id, wait);
        return Err(Error::TimedOut(format!("Drain of {}", stream.id)));
    }
    if mode == PlayoutMode::Playout {
        await_playout(stream, wait).await?;
    }
    debug!("{}: drain complete", stream.id);
    Ok(())
}

/// Wait for queued frames to finish being shown
async fn await_playout(stream: &Arc<Stream>, limit: Duration) -> Result<()> {
    let Some(manifestor) = stream.components().manifestor else {
        return Ok(());
    };
    let deadline = tokio::time::Instant::now().checked_add(limit);
    while let Some(shown_at) = manifestor.next_queued_manifestation_time() {
        let shown_at = tokio::time::Instant::from_std(shown_at);
        if shown_at <= tokio::time::Instant::now() {
            break;
        }
        if deadline.map_or(false, |deadline| shown_at > deadline) {
            return Err(Error::TimedOut(format!(
                "Playout of {} exceeds {:?}",
                stream.id, limit
            )));
        }
        tokio::select! {
            _ = stream.terminating.cancelled() => return Ok(()),
            _ = tokio::time::sleep_until(shown_at) => {}
        }
    }
    Ok(())
}

/// Drain every stream of a playback: start all, then wait for each
pub(crate) async fn drain_playback(playback: &Arc<Playback>, non_blocking: bool, policy: Policy) -> Result<()> {
    let streams = playback.streams();
    for stream in &streams {
        drain_stream_with_policy(stream, true, None, policy, false).await?;
    }
    if non_blocking {
        return Ok(());
    }

    let mut first_error = None;
    for stream in &streams {
        let mode = PlayoutMode::from_value(stream.policy(policy));
        if let Err(e) = await_drain(stream, mode).await {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
