//! Decode→Manifest: display-order reassembly and hand-off to the manifestor
//!
//! Each pass of the loop first releases whatever the reorder table allows,
//! then lets a waiting marker through once the table is empty, then steps
//! the expected display index over frames that were dropped before decode,
//! and only then takes the next item from the decoded ring. A marker is
//! therefore never overtaken by a frame that was decoded before it.

use super::reorder::{max_out_of_order, Release, ReleaseReason, ReorderEntry, ReorderTable};
use super::{Boundary, StageCore, StageInput};
use crate::buffer::{Buffer, OwnerTag};
use crate::components::{FrameDrop, FrameDropPoint};
use crate::player::stream::Stream;
use crate::ring::RingItem;
use crate::sync::lock;
use avpipe_common::policy::{Policy, POLICY_VALUE_APPLY};
use avpipe_common::time::{native_delta, NativeTime, MICROSECONDS_PER_SECOND};
use avpipe_common::{PlayDirection, StreamType};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Jump in native time treated as a discontinuity
const DISCONTINUITY_THRESHOLD: NativeTime = MICROSECONDS_PER_SECOND / 2;

struct DecodeToManifest {
    core: StageCore,
    table: ReorderTable<Buffer>,
    pending_marker: Option<Buffer>,
    max_actual_sequence: Option<u64>,
    last_released_time: Option<NativeTime>,
    /// Take the expected display index from the next frame to arrive
    resync_display_index: bool,
    first_frame: bool,
}

pub(crate) async fn run(stream: Arc<Stream>) {
    let Some(input) = stream.decoded_ring.clone() else {
        return;
    };
    let capacity = stream.number_of_decode_buffers;
    let mut stage = DecodeToManifest {
        core: StageCore::new(stream, Boundary::DecodeToManifest, input),
        table: ReorderTable::new(capacity),
        pending_marker: None,
        max_actual_sequence: None,
        last_released_time: None,
        resync_display_index: true,
        first_frame: true,
    };

    loop {
        if stage.core.is_terminating() {
            break;
        }
        let flushing = stage.pending_marker.is_some() || stage.discarding();
        if stage.release_ready(flushing).await {
            continue;
        }
        if stage.pending_marker.is_some() {
            stage.pass_marker().await;
            continue;
        }
        if stage.skip_non_decoded() {
            continue;
        }

        match stage.core.next_item().await {
            StageInput::Terminate => break,
            StageInput::Idle | StageInput::Item(RingItem::Poke) => continue,
            StageInput::Item(RingItem::Control(control)) => stage.core.handle_control(control).await,
            StageInput::Item(RingItem::Buffer(buffer)) => stage.accept(buffer).await,
        }
    }
    stage.shutdown();
}

impl DecodeToManifest {
    fn stream(&self) -> &Arc<Stream> {
        &self.core.stream
    }

    fn discarding(&self) -> bool {
        let stream = self.stream();
        stream.discard(Boundary::DecodeToManifest) || stream.is_unplayable()
    }

    /// Bound on frames held out of display order under current policy
    fn max_out_of_order(&self) -> usize {
        let stream = self.stream();
        if stream.policy(Policy::DisableReordering) == POLICY_VALUE_APPLY {
            return 0;
        }
        let limits = &stream.ctx.config.limits;
        let forward_limit = (stream.policy(Policy::LimitOutOfOrderDecodes) == POLICY_VALUE_APPLY)
            .then_some(limits.limit_on_out_of_order_decodes);
        let (_, direction) = stream.playback_speed();
        max_out_of_order(
            stream.number_of_decode_buffers,
            limits.minimum_working_decode_buffers,
            forward_limit,
            direction,
        )
    }

    /// Take a buffer from the decoded ring into the table
    async fn accept(&mut self, mut buffer: Buffer) {
        let stream = Arc::clone(self.stream());
        self.core.stamp_entry(&buffer);
        stream.with_statistics(|s| s.entered(Boundary::DecodeToManifest));

        if buffer.is_marker() {
            debug!("{}: marker reached Decode->Manifest, {} frames held", stream.id, self.table.len());
            self.pending_marker = Some(buffer);
            return;
        }

        let sequence = buffer.sequence_number().map_or(0, |s| s.value);
        self.max_actual_sequence = Some(self.max_actual_sequence.map_or(sequence, |max| max.max(sequence)));
        let parsed = buffer.parsed_frame_parameters().unwrap_or_default();

        if self.is_discontinuity(parsed.native_playback_time) && !self.table.is_empty() {
            debug!("{}: time discontinuity, flushing {} held frames", stream.id, self.table.len());
            self.release_ready(true).await;
        }
        if self.resync_display_index {
            if let Some(index) = parsed.display_frame_index {
                self.table.set_desired_index(index);
                self.resync_display_index = false;
            }
        }

        buffer.transfer_ownership(OwnerTag::ReorderTable);
        let entry = ReorderEntry {
            item: buffer,
            display_index: parsed.display_frame_index,
            collapse_holes: parsed.collapse_holes_in_display_indices,
            sequence,
        };
        if let Err(entry) = self.table.insert(entry) {
            error!(
                "{}: reorder table has no free slot ({} held), dropping frame {}",
                stream.id,
                self.table.len(),
                entry.sequence
            );
            stream.release_to_codec(&stream.components().codec, entry.item);
        }
    }

    fn is_discontinuity(&self, time: Option<NativeTime>) -> bool {
        let (Some(time), Some(last)) = (time, self.last_released_time) else {
            return false;
        };
        let stream = self.stream();
        let (speed, direction) = stream.playback_speed();
        stream.stream_type == StreamType::Video
            && speed == 1.0
            && direction == PlayDirection::Forward
            && native_delta(time, last) > DISCONTINUITY_THRESHOLD
    }

    /// Release every frame the table allows; true if any left
    async fn release_ready(&mut self, flushing: bool) -> bool {
        let mut released = false;
        while !self.core.is_terminating() {
            let max = self.max_out_of_order();
            let Some(release) = self.table.next_release(max, flushing) else {
                break;
            };
            self.release(release).await;
            released = true;
        }
        released
    }

    async fn release(&mut self, release: Release<Buffer>) {
        let Release {
            entry,
            reason,
            minimum_sequence,
        } = release;
        let stream = Arc::clone(self.stream());

        if let Some(index) = entry.display_index {
            if reason == ReleaseReason::Late {
                stream.with_statistics(|s| s.reordering_failures += 1);
                warn!(
                    "{}: display index {} released after {}",
                    stream.id,
                    index,
                    self.table.desired_index()
                );
            }
            self.table.advance_past(index);
        }

        let sequence = self
            .max_actual_sequence
            .map_or(minimum_sequence, |max| max.min(minimum_sequence));
        let buffer = entry.item;
        buffer.update_sequence_number(|s| s.value = sequence);
        let time = buffer.parsed_frame_parameters().and_then(|p| p.native_playback_time);
        trace!("{}: releasing {:?} as {} ({:?})", stream.id, entry.display_index, sequence, reason);

        self.core.observe(sequence);
        self.core.observe_time(time);
        self.core.process_before(Some(sequence), time).await;
        self.present(&stream, buffer).await;
        if time.is_some() {
            self.last_released_time = time;
        }
        self.core.process_after(Some(sequence), time).await;
    }

    /// Time a released frame and queue it to the manifestor
    async fn present(&mut self, stream: &Arc<Stream>, mut buffer: Buffer) {
        let components = stream.components();
        let Some(manifestor) = components.manifestor.clone() else {
            stream.release_to_codec(&components.codec, buffer);
            return;
        };
        let timer = &components.output_timer;

        let mut keep = !self.discarding()
            && timer.test_for_frame_drop(&buffer, FrameDropPoint::BeforeOutputTiming) == FrameDrop::Keep;
        if keep {
            if let Err(e) = timer.generate_frame_timing(&buffer) {
                warn!("{}: frame timing failed: {}", stream.id, e);
            }
            keep = timer.test_for_frame_drop(&buffer, FrameDropPoint::BeforeManifestation) == FrameDrop::Keep;
        }
        if keep {
            self.await_unpause().await;
            self.await_retime().await;
            keep = !self.discarding() && !self.core.is_terminating();
        }

        if !keep {
            stream.with_statistics(|s| s.discarded(Boundary::DecodeToManifest));
            stream.release_to_codec(&components.codec, buffer);
            return;
        }

        buffer.transfer_ownership(OwnerTag::Manifestor);
        if let Err(e) = manifestor.queue_decode_buffer(buffer) {
            warn!("{}: manifestor rejected frame: {}", stream.id, e);
        }
        self.first_frame = false;
    }

    /// Hold the frame while speed is zero, unless a step is requested
    async fn await_unpause(&self) {
        let stream = self.stream();
        if self.first_frame && stream.policy(Policy::ManifestFirstFrameEarly) == POLICY_VALUE_APPLY {
            return;
        }
        let wait = stream.ctx.config.timeouts.event_wait();
        loop {
            let (speed, _) = stream.playback_speed();
            if speed > 0.0 || self.core.is_terminating() || self.discarding() {
                return;
            }
            if stream.take_step() {
                debug!("{}: single step", stream.id);
                return;
            }
            stream.single_step.wait(wait).await;
            stream.single_step.reset();
        }
    }

    /// Let retimed frames go ahead of new ones, within the retime limit
    async fn await_retime(&self) {
        let stream = self.stream();
        let limit = stream.ctx.config.timeouts.retime_max();
        let poll = stream.ctx.config.timeouts.retiming_wait();
        while let Some(started) = stream.retime_started() {
            if started.elapsed() >= limit {
                warn!("{}: retime exceeded {:?}, abandoning it", stream.id, limit);
                stream.end_retime();
                return;
            }
            tokio::select! {
                _ = stream.terminating.cancelled() => return,
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Step the expected index over a frame dropped before decode
    fn skip_non_decoded(&mut self) -> bool {
        let desired = self.table.desired_index();
        if lock(&self.stream().non_decoded).check(desired) {
            self.table.advance_past(desired);
            return true;
        }
        false
    }

    async fn pass_marker(&mut self) {
        let Some(marker) = self.pending_marker.take() else {
            return;
        };
        let stream = Arc::clone(self.stream());
        let sequence = marker.sequence_number().map_or(0, |s| s.value);

        self.core.observe(sequence);
        self.core.process_before(Some(sequence), None).await;
        stream.set_discard(Boundary::DecodeToManifest, false);
        lock(&stream.non_decoded).flush();
        self.resync_display_index = true;
        debug!("{}: marker {} passed Decode->Manifest", stream.id, sequence);

        match &stream.manifested_ring {
            Some(ring) => self.core.forward(ring, marker).await,
            None => stream.marker_completed(&marker),
        }
        self.core.process_after(Some(sequence), None).await;
    }

    fn shutdown(&mut self) {
        let stream = Arc::clone(self.stream());
        let codec = stream.components().codec;
        for entry in self.table.drain() {
            stream.release_to_codec(&codec, entry.item);
        }
        self.pending_marker = None;
        self.core.shutdown();
    }
}
