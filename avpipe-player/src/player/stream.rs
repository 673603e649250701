//! Stream state and lifecycle
//!
//! A [`Stream`] owns its rings, pools, the discard-until-marker flags and
//! the signals its stages use to coordinate. It is created by
//! [`add_stream`], lives while its stage tasks run, and is torn down by
//! [`cleanup_after_stream`].

use super::in_sequence::call_in_sequence;
use super::playback::Playback;
use super::PlayerContext;
use crate::buffer::{Buffer, BufferKind, BufferPool, MetadataType};
use crate::components::{
    Codec, ComponentContext, Demultiplexor, PresentationInterval, StreamComponents, SwitchComponents,
};
use crate::control::{InSequenceCall, ReferenceFrameRelease, SequenceType};
use crate::error::{Error, Result};
use crate::pipeline::non_decoded::NonDecodedList;
use crate::pipeline::{spawn_stages, Boundary};
use crate::ring::BufferRing;
use crate::statistics::StreamStatistics;
use crate::sync::{lock, Signal};
use avpipe_common::config::CodedBufferSizing;
use avpipe_common::events::{EventCode, EventRecord};
use avpipe_common::policy::{Policy, POLICY_VALUE_APPLY};
use avpipe_common::{PlayDirection, PlaybackId, StreamId, StreamType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Mutable stream bookkeeping guarded by one lock
#[derive(Default)]
pub(crate) struct StreamState {
    pub(crate) next_sequence_number: u64,
    /// Pool index of the drain marker currently in flight
    pub(crate) marker_index: Option<usize>,
    /// Sequence value reserved by the most recent drain
    pub(crate) drain_sequence_number: Option<u64>,
    pub(crate) switch_targets: Option<SwitchComponents>,
    /// Start of the current retime window
    pub(crate) retime_started: Option<Instant>,
    pub(crate) demultiplexor: Option<(Arc<dyn Demultiplexor>, u32)>,
    pub(crate) presentation_interval: PresentationInterval,
}

pub struct Stream {
    pub(crate) id: StreamId,
    pub(crate) playback_id: PlaybackId,
    pub(crate) stream_type: StreamType,
    pub(crate) playback: Weak<Playback>,
    pub(crate) ctx: Arc<PlayerContext>,

    components: RwLock<StreamComponents>,

    pub(crate) collated_ring: Arc<BufferRing>,
    pub(crate) parsed_ring: Arc<BufferRing>,
    pub(crate) decoded_ring: Option<Arc<BufferRing>>,
    pub(crate) manifested_ring: Option<Arc<BufferRing>>,

    pub(crate) coded_frame_pool: BufferPool,
    pub(crate) decode_buffer_pool: Option<BufferPool>,
    pub(crate) control_pool: BufferPool,
    pub(crate) coded_sizing: CodedBufferSizing,
    pub(crate) number_of_decode_buffers: usize,

    pub(crate) state: Mutex<StreamState>,
    discard: [AtomicBool; Boundary::COUNT],

    pub(crate) terminating: CancellationToken,
    unplayable: AtomicBool,
    codec_reset: AtomicBool,
    pub(crate) switch_in_progress: AtomicBool,
    step: AtomicBool,
    cleaned_up: AtomicBool,

    pub(crate) drained: Signal,
    pub(crate) switch_done: Signal,
    pub(crate) last_out_of_codec: Signal,
    pub(crate) single_step: Signal,

    running: watch::Sender<usize>,
    pub(crate) expected_processes: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,

    pub(crate) non_decoded: Mutex<NonDecodedList>,
    statistics: Mutex<StreamStatistics>,
}

impl Stream {
    fn new(
        ctx: Arc<PlayerContext>,
        playback: &Arc<Playback>,
        stream_type: StreamType,
        components: StreamComponents,
        sizing: CodedBufferSizing,
    ) -> Result<Arc<Self>> {
        let limits = &ctx.config.limits;

        let coded_frame_pool = BufferPool::new(
            BufferKind::CodedFrame,
            format!("{}-coded", stream_type),
            sizing.frame_count,
            sizing.memory_size,
            sizing.maximum_frame_size,
        );
        coded_frame_pool.attach_metadata(MetadataType::SequenceNumber);
        coded_frame_pool.attach_metadata(MetadataType::CodedFrameParameters);

        let decode_buffer_pool = match &components.manifestor {
            Some(manifestor) => Some(manifestor.decode_buffer_pool()?),
            None => None,
        };
        let number_of_decode_buffers = match &decode_buffer_pool {
            Some(pool) if pool.capacity() > 0 => pool.capacity(),
            _ => limits.default_decode_buffers,
        };
        if number_of_decode_buffers > limits.max_decode_buffers {
            return Err(Error::Implementation(format!(
                "Manifestor offers {} decode buffers, at most {} supported",
                number_of_decode_buffers, limits.max_decode_buffers
            )));
        }

        let control_pool = BufferPool::new(
            BufferKind::ControlStructure,
            format!("{}-control", stream_type),
            limits.control_structure_buffers,
            0,
            0,
        );

        let coded_ring_size = limits.coded_ring_size(sizing.frame_count);
        let decode_ring_size = number_of_decode_buffers + limits.control_structure_buffers;
        let has_manifestor = components.manifestor.is_some();
        let (running, _) = watch::channel(0usize);

        Ok(Arc::new(Self {
            id: StreamId::new(),
            playback_id: playback.id,
            stream_type,
            playback: Arc::downgrade(playback),
            collated_ring: Arc::new(BufferRing::new(coded_ring_size)),
            parsed_ring: Arc::new(BufferRing::new(coded_ring_size)),
            decoded_ring: has_manifestor.then(|| Arc::new(BufferRing::new(decode_ring_size))),
            manifested_ring: has_manifestor.then(|| Arc::new(BufferRing::new(decode_ring_size))),
            coded_frame_pool,
            decode_buffer_pool,
            control_pool,
            coded_sizing: sizing,
            number_of_decode_buffers,
            state: Mutex::new(StreamState::default()),
            discard: Default::default(),
            terminating: CancellationToken::new(),
            unplayable: AtomicBool::new(false),
            codec_reset: AtomicBool::new(false),
            switch_in_progress: AtomicBool::new(false),
            step: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
            drained: Signal::new(),
            switch_done: Signal::new(),
            last_out_of_codec: Signal::new(),
            single_step: Signal::new(),
            running,
            expected_processes: if has_manifestor { 4 } else { 2 },
            tasks: Mutex::new(Vec::new()),
            non_decoded: Mutex::new(NonDecodedList::new(limits.max_discarded_frames)),
            statistics: Mutex::new(StreamStatistics::default()),
            components: RwLock::new(components),
            ctx,
        }))
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn component_context(self: &Arc<Self>) -> ComponentContext {
        ComponentContext {
            playback: self.playback_id,
            stream: self.id,
            stream_type: self.stream_type,
            coded_frame_pool: self.coded_frame_pool.clone(),
            owner: Arc::downgrade(self),
        }
    }

    /// Snapshot of the current collaborators
    pub(crate) fn components(&self) -> StreamComponents {
        self.components
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update_components(&self, update: impl FnOnce(&mut StreamComponents)) {
        let mut components = self
            .components
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        update(&mut components);
    }

    pub(crate) fn has_manifestor(&self) -> bool {
        self.manifested_ring.is_some()
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    pub(crate) fn discard(&self, boundary: Boundary) -> bool {
        self.discard[boundary.index()].load(Ordering::Acquire)
    }

    pub(crate) fn set_discard(&self, boundary: Boundary, value: bool) {
        if value {
            debug!("{}: {} discarding until marker", self.id, boundary.name());
        }
        self.discard[boundary.index()].store(value, Ordering::Release);
    }

    pub(crate) fn is_unplayable(&self) -> bool {
        self.unplayable.load(Ordering::Acquire)
    }

    pub(crate) fn clear_unplayable(&self) {
        self.unplayable.store(false, Ordering::Release);
    }

    pub(crate) fn codec_reset(&self) -> bool {
        self.codec_reset.load(Ordering::Acquire)
    }

    pub(crate) fn set_codec_reset(&self, value: bool) {
        self.codec_reset.store(value, Ordering::Release);
    }

    pub(crate) fn request_step(&self) {
        self.step.store(true, Ordering::Release);
        self.single_step.set();
    }

    pub(crate) fn take_step(&self) -> bool {
        self.step.swap(false, Ordering::AcqRel)
    }

    // ------------------------------------------------------------------
    // Sequence numbers and markers
    // ------------------------------------------------------------------

    pub(crate) fn take_next_sequence_number(&self) -> u64 {
        let mut state = lock(&self.state);
        let value = state.next_sequence_number;
        state.next_sequence_number += 1;
        value
    }

    /// Keep sequence numbers after a marker above the marker's value
    pub(crate) fn advance_sequence_past(&self, value: u64) {
        let mut state = lock(&self.state);
        state.next_sequence_number = state.next_sequence_number.max(value + 1);
    }

    pub(crate) fn is_current_marker(&self, buffer: &Buffer) -> bool {
        buffer.is_marker() && lock(&self.state).marker_index == Some(buffer.index())
    }

    pub(crate) fn marker_in_flight(&self) -> bool {
        lock(&self.state).marker_index.is_some()
    }

    /// The marker has reached the last stage of the stream
    pub(crate) fn marker_completed(&self, buffer: &Buffer) {
        let mut state = lock(&self.state);
        if state.marker_index == Some(buffer.index()) {
            state.marker_index = None;
        }
        drop(state);
        self.with_statistics(|s| s.markers_completed += 1);
    }

    pub(crate) fn drain_sequence_number(&self) -> Option<u64> {
        lock(&self.state).drain_sequence_number
    }

    // ------------------------------------------------------------------
    // Playback-derived state
    // ------------------------------------------------------------------

    pub(crate) fn playback_speed(&self) -> (f64, PlayDirection) {
        self.playback
            .upgrade()
            .map(|p| p.speed())
            .unwrap_or((1.0, PlayDirection::Forward))
    }

    pub(crate) fn presentation_interval(&self) -> PresentationInterval {
        let interval = lock(&self.state).presentation_interval;
        if interval != PresentationInterval::default() {
            return interval;
        }
        self.playback
            .upgrade()
            .map(|p| p.presentation_interval())
            .unwrap_or_default()
    }

    pub(crate) fn set_presentation_interval(&self, interval: PresentationInterval) {
        lock(&self.state).presentation_interval = interval;
    }

    pub(crate) fn policy(&self, policy: Policy) -> u8 {
        self.ctx
            .policies
            .value(Some(self.playback_id), Some(self.id), policy)
    }

    // ------------------------------------------------------------------
    // Retime window
    // ------------------------------------------------------------------

    pub(crate) fn begin_retime(&self) {
        lock(&self.state).retime_started = Some(Instant::now());
    }

    pub(crate) fn end_retime(&self) {
        lock(&self.state).retime_started = None;
    }

    pub(crate) fn retime_started(&self) -> Option<Instant> {
        lock(&self.state).retime_started
    }

    // ------------------------------------------------------------------
    // Process accounting
    // ------------------------------------------------------------------

    pub(crate) fn process_started(&self, boundary: Boundary) {
        debug!("{}: {} stage running", self.id, boundary.name());
        self.running.send_modify(|count| *count += 1);
    }

    pub(crate) fn process_exited(&self, boundary: Boundary) {
        debug!("{}: {} stage exited", self.id, boundary.name());
        self.running.send_modify(|count| *count = count.saturating_sub(1));
    }

    pub(crate) fn running_processes(&self) -> usize {
        *self.running.borrow()
    }

    async fn wait_for_running(&self, target: usize, wait: std::time::Duration) -> bool {
        let mut rx = self.running.subscribe();
        tokio::time::timeout(wait, rx.wait_for(|count| *count == target))
            .await
            .map_or(false, |r| r.is_ok())
    }

    // ------------------------------------------------------------------
    // Support for collaborators and stages
    // ------------------------------------------------------------------

    pub(crate) fn with_statistics<R>(&self, f: impl FnOnce(&mut StreamStatistics) -> R) -> R {
        f(&mut lock(&self.statistics))
    }

    pub(crate) fn statistics(&self) -> StreamStatistics {
        lock(&self.statistics).clone()
    }

    /// Hand a decode buffer back to the codec, or just drop it while the
    /// codec is being replaced
    pub(crate) fn release_to_codec(&self, codec: &Arc<dyn Codec>, buffer: Buffer) {
        if self.codec_reset() {
            drop(buffer);
            return;
        }
        if let Err(e) = codec.release_decode_buffer(buffer) {
            warn!("{}: codec refused decode buffer release: {}", self.id, e);
        }
    }

    pub(crate) fn record_non_decoded_frame(&self, buffer: Buffer) -> Result<()> {
        let is_first_partition = buffer
            .parsed_frame_parameters()
            .map_or(false, |p| p.first_parsed_partition_of_decode_frame);
        if !is_first_partition {
            return Ok(());
        }
        lock(&self.non_decoded).record(buffer)?;
        self.with_statistics(|s| s.non_decoded_frames += 1);
        Ok(())
    }

    /// Stop processing this stream's data for the rest of its life
    pub(crate) fn mark_unplayable(&self) -> Result<()> {
        if self.policy(Policy::IgnoreStreamUnPlayableCalls) == POLICY_VALUE_APPLY {
            warn!("{}: ignoring request to mark stream unplayable", self.id);
            return Ok(());
        }
        if self.unplayable.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        warn!("{}: stream marked unplayable", self.id);
        if let Some(manifestor) = &self.components().manifestor {
            if let Err(e) = manifestor.release_queued_decode_buffers() {
                warn!("{}: manifestor release failed: {}", self.id, e);
            }
        }
        self.single_step.set();
        self.collated_ring.poke();
        self.parsed_ring.poke();
        if let Some(ring) = &self.decoded_ring {
            ring.poke();
        }

        self.ctx.events.signal(
            EventRecord::new(EventCode::StreamUnPlayable)
                .with_playback(self.playback_id)
                .with_stream(self.id),
        );
        Ok(())
    }

    /// Ring that executes `call`
    ///
    /// Streams without a manifestor fold the last two stages onto
    /// Parse→Decode; calls that need a manifestor are refused there.
    pub(crate) fn destination_ring(&self, call: &InSequenceCall) -> Result<&Arc<BufferRing>> {
        if call.requires_manifestor() && !self.has_manifestor() {
            return Err(Error::NotSupported(format!(
                "{} on a stream without a manifestor",
                call.name()
            )));
        }
        let ring = match call.destination() {
            Boundary::CollateToParse => &self.collated_ring,
            Boundary::ParseToDecode => &self.parsed_ring,
            Boundary::DecodeToManifest => self.decoded_ring.as_ref().unwrap_or(&self.parsed_ring),
            Boundary::PostManifest => self.manifested_ring.as_ref().unwrap_or(&self.parsed_ring),
        };
        Ok(ring)
    }

    pub(crate) fn demultiplexor_attached(&self) -> bool {
        lock(&self.state).demultiplexor.is_some()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("playback", &self.playback_id)
            .field("stream_type", &self.stream_type)
            .finish()
    }
}

/// Create a stream, register its collaborators and start its stages
pub(crate) async fn add_stream(
    ctx: &Arc<PlayerContext>,
    playback: &Arc<Playback>,
    stream_type: StreamType,
    components: StreamComponents,
    event_user_data: Option<u64>,
) -> Result<Arc<Stream>> {
    if stream_type == StreamType::None {
        return Err(Error::InvalidParameter("Stream type none".to_string()));
    }
    if event_user_data.is_some() && components.manifestor.is_none() {
        return Err(Error::InvalidParameter(
            "First frame event requested on a stream without a manifestor".to_string(),
        ));
    }
    if playback.is_terminating() {
        return Err(Error::UnknownPlayback);
    }

    let sizing = playback
        .coded_buffer_sizing(stream_type)
        .ok_or_else(|| Error::InvalidParameter(format!("No buffer sizing for {}", stream_type)))?;
    let stream = Stream::new(Arc::clone(ctx), playback, stream_type, components.clone(), sizing)?;
    info!(
        "Adding {} stream {} to {} ({} coded buffers, {} decode buffers)",
        stream_type, stream.id, playback.id, sizing.frame_count, stream.number_of_decode_buffers
    );

    if let Err(e) = register_components(&stream, playback, &components) {
        error!("{}: collaborator registration failed: {}", stream.id, e);
        return Err(e);
    }

    let tasks = spawn_stages(&stream);
    lock(&stream.tasks).extend(tasks);

    let start_wait = ctx.config.timeouts.event_wait() * 2;
    if !stream.wait_for_running(stream.expected_processes, start_wait).await {
        error!(
            "{}: only {} of {} stages started",
            stream.id,
            stream.running_processes(),
            stream.expected_processes
        );
        cleanup_after_stream(&stream).await;
        return Err(Error::Implementation("Stream stages failed to start".to_string()));
    }

    playback.add_stream(Arc::clone(&stream));

    if let Some(user_data) = event_user_data {
        let record = EventRecord::new(EventCode::FirstFrameManifested)
            .with_playback(playback.id)
            .with_stream(stream.id)
            .with_user_data(user_data);
        call_in_sequence(
            &stream,
            SequenceType::Immediate,
            InSequenceCall::ManifestorQueueEventSignal(record),
        )?;

        ctx.events.signal(
            EventRecord::new(EventCode::StreamCreated)
                .with_playback(playback.id)
                .with_stream(stream.id)
                .with_user_data(user_data),
        );
    }

    Ok(stream)
}

fn register_components(
    stream: &Arc<Stream>,
    playback: &Arc<Playback>,
    components: &StreamComponents,
) -> Result<()> {
    let context = stream.component_context();

    components.collator.register_player(context.clone())?;
    components.frame_parser.register_player(context.clone())?;
    components.codec.register_player(context.clone())?;
    components.output_timer.register_player(context.clone())?;
    if let Some(manifestor) = &components.manifestor {
        manifestor.register_player(context)?;
    }

    components
        .output_timer
        .register_output_coordinator(Arc::clone(&playback.output_coordinator))?;
    playback
        .output_coordinator
        .register_stream(stream.id, stream.stream_type)?;

    components
        .collator
        .register_output_ring(Arc::clone(&stream.collated_ring))?;
    components
        .frame_parser
        .register_output_ring(Arc::clone(&stream.parsed_ring))?;
    if let Some(ring) = &stream.decoded_ring {
        components.codec.register_output_ring(Arc::clone(ring))?;
    }
    if let (Some(manifestor), Some(ring)) = (&components.manifestor, &stream.manifested_ring) {
        manifestor.register_output_ring(Arc::clone(ring))?;
    }
    Ok(())
}

/// Drain and tear down one stream
pub(crate) async fn remove_stream(stream: &Arc<Stream>, event_user_data: Option<u64>) -> Result<()> {
    if stream.terminating.is_cancelled() {
        return Err(Error::UnknownStream);
    }
    if stream.demultiplexor_attached() {
        return Err(Error::InvalidParameter(
            "Stream is still attached to a demultiplexor".to_string(),
        ));
    }

    info!("Removing stream {}", stream.id);
    if let Err(e) = super::drain::drain_stream_with_policy(stream, false, None, Policy::PlayoutOnTerminate, false).await
    {
        warn!("{}: drain before removal did not complete: {}", stream.id, e);
    }

    if !cleanup_after_stream(stream).await {
        return Err(Error::UnknownStream);
    }

    if let Some(user_data) = event_user_data {
        stream.ctx.events.signal(
            EventRecord::new(EventCode::StreamTerminated)
                .with_playback(stream.playback_id)
                .with_stream(stream.id)
                .with_user_data(user_data),
        );
    }
    Ok(())
}

/// Halt collaborators, stop the stages and release everything the stream
/// holds
///
/// Only the first call does anything; it returns true.
pub(crate) async fn cleanup_after_stream(stream: &Arc<Stream>) -> bool {
    if stream.cleaned_up.swap(true, Ordering::AcqRel) {
        debug!("{}: already cleaned up", stream.id);
        return false;
    }

    for boundary in Boundary::ALL {
        stream.set_discard(boundary, true);
    }

    let components = stream.components();
    halt_components(stream, &components);

    stream.terminating.cancel();
    stream.single_step.set();
    stream.last_out_of_codec.set();

    let stop_wait = stream.ctx.config.timeouts.event_wait() * 2;
    if !stream.wait_for_running(0, stop_wait).await {
        error!(
            "{}: {} stage(s) failed to exit, aborting them",
            stream.id,
            stream.running_processes()
        );
    }
    let tasks: Vec<JoinHandle<()>> = lock(&stream.tasks).drain(..).collect();
    for task in tasks {
        if !task.is_finished() {
            task.abort();
        }
        let _ = task.await;
    }

    let mut stripped = stream.collated_ring.drain().len() + stream.parsed_ring.drain().len();
    if let Some(ring) = &stream.decoded_ring {
        stripped += ring.drain().len();
    }
    if let Some(ring) = &stream.manifested_ring {
        stripped += ring.drain().len();
    }
    if stripped > 0 {
        debug!("{}: released {} queued ring entries", stream.id, stripped);
    }
    lock(&stream.non_decoded).flush();

    if let Some(playback) = stream.playback.upgrade() {
        let remaining = playback.remove_stream(stream.id);
        if let Err(e) = playback.output_coordinator.deregister_stream(stream.id) {
            warn!("{}: output coordinator deregistration failed: {}", stream.id, e);
        }
        if remaining == 0 {
            if let Err(e) = playback.output_coordinator.reset() {
                warn!("{}: output coordinator reset failed: {}", playback.id, e);
            }
        }
    }

    reset_components(stream, &components);

    stream.ctx.policies.remove_scope(crate::policy::PolicyScope::Stream(stream.id));
    stream.ctx.events.clear_signals_for(None, Some(stream.id));
    info!("Stream {} cleaned up", stream.id);
    true
}

fn halt_components(stream: &Stream, components: &StreamComponents) {
    let log = |what: &str, result: Result<()>| {
        if let Err(e) = result {
            warn!("{}: {} failed during teardown: {}", stream.id, what, e);
        }
    };

    log("collator discard", components.collator.discard_accumulated_data());
    log("collator halt", components.collator.halt());
    log("frame parser halt", components.frame_parser.halt());
    log(
        "codec output partial decodes",
        components.codec.output_partial_decode_buffers(),
    );
    log(
        "codec release reference frames",
        components.codec.release_reference_frame(ReferenceFrameRelease::All),
    );
    log("codec halt", components.codec.halt());
    log("output timer halt", components.output_timer.halt());
    if let Some(manifestor) = &components.manifestor {
        log("manifestor null manifestation", manifestor.queue_null_manifestation());
        log("manifestor halt", manifestor.halt());
    }
}

fn reset_components(stream: &Stream, components: &StreamComponents) {
    let log = |what: &str, result: Result<()>| {
        if let Err(e) = result {
            warn!("{}: {} reset failed: {}", stream.id, what, e);
        }
    };

    log("collator", components.collator.reset());
    log("frame parser", components.frame_parser.reset());
    log("codec", components.codec.reset());
    log("output timer", components.output_timer.reset());
    if let Some(manifestor) = &components.manifestor {
        log("manifestor", manifestor.reset());
    }
}

/// Insert data into a stream's collator once a coded buffer is free
pub(crate) async fn inject_data(stream: &Arc<Stream>, data: &[u8]) -> Result<()> {
    if stream.terminating.is_cancelled() {
        return Err(Error::UnknownStream);
    }
    let wait = stream.ctx.config.timeouts.playout_time();
    if !stream.coded_frame_pool.wait_for_free(wait).await {
        return Err(Error::TimedOut(format!(
            "No coded frame buffer became free on {}",
            stream.id
        )));
    }
    stream.components().collator.input(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackOutputCoordinator, LoopbackStream};
    use crate::Player;
    use avpipe_common::config::PipelineConfig;

    fn quick_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.timeouts.event_wait_ms = 10;
        config.timeouts.next_frame_event_wait_ms = 5;
        config
    }

    async fn count_terminated(player: &Player) -> usize {
        let mut count = 0;
        while player
            .get_event_record(None, None, EventCode::StreamTerminated.mask(), true)
            .await
            .is_ok()
        {
            count += 1;
        }
        count
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_teardown_is_a_no_op() {
        let player = Player::new(quick_config()).unwrap();
        let coordinator = Arc::new(LoopbackOutputCoordinator::new());
        let playback = player.create_playback(coordinator.clone(), None).unwrap();
        let loopback = LoopbackStream::new(8, 0);
        let id = player
            .add_stream(playback, StreamType::Video, loopback.components(), None)
            .await
            .unwrap();
        let stream = player.ctx.find_stream(id).unwrap();

        remove_stream(&stream, Some(1)).await.unwrap();
        let coded = stream.coded_frame_pool.usage();
        let decode = loopback.manifestor.pool().usage();
        let null_manifestations = loopback.manifestor.null_manifestations();
        let resets = coordinator.resets();
        let released = loopback.codec.buffers_released();

        assert!(!cleanup_after_stream(&stream).await);
        assert!(matches!(remove_stream(&stream, Some(2)).await, Err(Error::UnknownStream)));
        player.terminate_playback(playback, None).await.unwrap();

        assert_eq!(stream.coded_frame_pool.usage(), coded);
        assert_eq!(loopback.manifestor.pool().usage(), decode);
        assert_eq!(loopback.manifestor.null_manifestations(), null_manifestations);
        assert_eq!(loopback.codec.buffers_released(), released);
        // Terminating the now-empty playback resets the coordinator once more
        assert_eq!(coordinator.resets(), resets + 1);
        assert_eq!(count_terminated(&player).await, 1);
    }
}
