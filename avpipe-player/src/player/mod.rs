//! Player: the caller-facing control surface
//!
//! [`Player`] owns the playback registry and the shared state every stage
//! task consults ([`PlayerContext`]): configuration, the event queue and the
//! policy store. Every operation returns a [`Result`] from the closed
//! [`Error`] taxonomy.

pub(crate) mod drain;
pub(crate) mod in_sequence;
pub mod playback;
pub(crate) mod stream;
pub(crate) mod switch;

use crate::buffer::PoolUsage;
use crate::components::{
    Demultiplexor, OutputCoordinator, PresentationInterval, StreamComponents, SwitchComponents,
};
use crate::control::{Component, InSequenceCall, ParameterBlock, SequenceType};
use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::policy::{PolicyScope, PolicyStore};
use crate::statistics::StreamStatistics;
use crate::sync::{lock, Signal};
use avpipe_common::config::{CodedBufferSizing, PipelineConfig};
use avpipe_common::events::{EventCode, EventMask, EventRecord};
use avpipe_common::policy::{Policy, PolicyValue};
use avpipe_common::time::NativeTime;
use avpipe_common::{PlayDirection, PlaybackId, StreamId, StreamType};
use playback::Playback;
use std::sync::{Arc, Mutex};
use stream::Stream;
use tracing::{debug, info, warn};

/// State shared by the player and every stage task
pub(crate) struct PlayerContext {
    pub(crate) config: PipelineConfig,
    pub(crate) events: EventQueue,
    pub(crate) policies: PolicyStore,
    playbacks: Mutex<Vec<Arc<Playback>>>,
}

impl PlayerContext {
    fn find_playback(&self, id: PlaybackId) -> Result<Arc<Playback>> {
        lock(&self.playbacks)
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(Error::UnknownPlayback)
    }

    fn find_stream(&self, id: StreamId) -> Result<Arc<Stream>> {
        lock(&self.playbacks)
            .iter()
            .find_map(|p| p.find_stream(id))
            .ok_or(Error::UnknownStream)
    }
}

pub struct Player {
    ctx: Arc<PlayerContext>,
}

impl Player {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let events = EventQueue::new(config.limits.max_event_records, config.limits.max_event_signals);
        info!(
            "Player created (ring size {}, {} event records)",
            config.limits.max_ring_size, config.limits.max_event_records
        );
        Ok(Self {
            ctx: Arc::new(PlayerContext {
                config,
                events,
                policies: PolicyStore::new(),
                playbacks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    // ========================================================================
    // Playback lifecycle
    // ========================================================================

    pub fn create_playback(
        &self,
        output_coordinator: Arc<dyn OutputCoordinator>,
        event_user_data: Option<u64>,
    ) -> Result<PlaybackId> {
        let playback = Arc::new(Playback::new(output_coordinator, self.ctx.config.coded_buffers));
        let id = playback.id;
        lock(&self.ctx.playbacks).push(playback);
        info!("Playback {} created", id);

        if let Some(user_data) = event_user_data {
            self.ctx.events.signal(
                EventRecord::new(EventCode::PlaybackCreated)
                    .with_playback(id)
                    .with_user_data(user_data),
            );
        }
        Ok(id)
    }

    /// Remove every stream of a playback, then the playback itself
    pub async fn terminate_playback(&self, playback: PlaybackId, event_user_data: Option<u64>) -> Result<()> {
        let playback = self.ctx.find_playback(playback)?;
        if !playback.begin_termination() {
            return Err(Error::UnknownPlayback);
        }
        info!("Terminating playback {}", playback.id);

        for stream in playback.streams() {
            lock(&stream.state).demultiplexor = None;
            if let Err(e) = stream::remove_stream(&stream, None).await {
                warn!("{}: removal during playback termination failed: {}", stream.id, e);
                stream::cleanup_after_stream(&stream).await;
            }
        }

        if let Err(e) = playback
            .output_coordinator
            .halt()
            .and_then(|_| playback.output_coordinator.reset())
        {
            warn!("{}: output coordinator shutdown failed: {}", playback.id, e);
        }
        lock(&self.ctx.playbacks).retain(|p| p.id != playback.id);
        self.ctx.policies.remove_scope(PolicyScope::Playback(playback.id));
        self.ctx.events.clear_signals_for(Some(playback.id), None);

        if let Some(user_data) = event_user_data {
            self.ctx.events.signal(
                EventRecord::new(EventCode::PlaybackTerminated)
                    .with_playback(playback.id)
                    .with_user_data(user_data),
            );
        }
        Ok(())
    }

    pub fn set_coded_buffer_sizing(
        &self,
        playback: PlaybackId,
        stream_type: StreamType,
        sizing: CodedBufferSizing,
    ) -> Result<()> {
        let playback = self.ctx.find_playback(playback)?;
        self.ctx
            .config
            .limits
            .check_coded_sizing(&stream_type.to_string(), &sizing)?;
        playback.set_coded_buffer_sizing(stream_type, sizing)
    }

    pub fn playback_streams(&self, playback: PlaybackId) -> Result<Vec<StreamId>> {
        Ok(self
            .ctx
            .find_playback(playback)?
            .streams()
            .iter()
            .map(|s| s.id)
            .collect())
    }

    // ========================================================================
    // Stream lifecycle
    // ========================================================================

    /// Add a stream; `event_user_data` requests a FirstFrameManifested
    /// event (and StreamCreated) carrying that value
    pub async fn add_stream(
        &self,
        playback: PlaybackId,
        stream_type: StreamType,
        components: StreamComponents,
        event_user_data: Option<u64>,
    ) -> Result<StreamId> {
        let playback = self.ctx.find_playback(playback)?;
        let stream = stream::add_stream(&self.ctx, &playback, stream_type, components, event_user_data).await?;
        Ok(stream.id)
    }

    pub async fn remove_stream(&self, stream: StreamId, event_user_data: Option<u64>) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        stream::remove_stream(&stream, event_user_data).await
    }

    pub async fn switch_stream(
        &self,
        stream: StreamId,
        targets: SwitchComponents,
        non_blocking: bool,
        event_user_data: Option<u64>,
    ) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        switch::switch_stream(&stream, targets, non_blocking, event_user_data).await
    }

    pub async fn drain_stream(
        &self,
        stream: StreamId,
        non_blocking: bool,
        event_user_data: Option<u64>,
    ) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        drain::drain_stream_with_policy(&stream, non_blocking, event_user_data, Policy::PlayoutOnDrain, false)
            .await
    }

    /// Drain with an explicit playout policy, e.g. `PlayoutAlwaysDiscard`
    pub async fn drain_stream_with_policy(
        &self,
        stream: StreamId,
        non_blocking: bool,
        policy: Policy,
        parse_all_frames: bool,
    ) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        drain::drain_stream_with_policy(&stream, non_blocking, None, policy, parse_all_frames).await
    }

    pub async fn drain_playback(&self, playback: PlaybackId, non_blocking: bool) -> Result<()> {
        let playback = self.ctx.find_playback(playback)?;
        drain::drain_playback(&playback, non_blocking, Policy::PlayoutOnDrain).await
    }

    /// Reserved sequence value of the stream's most recent drain marker
    pub fn drain_sequence_number(&self, stream: StreamId) -> Result<Option<u64>> {
        Ok(self.ctx.find_stream(stream)?.drain_sequence_number())
    }

    pub fn mark_stream_unplayable(&self, stream: StreamId) -> Result<()> {
        self.ctx.find_stream(stream)?.mark_unplayable()
    }

    // ========================================================================
    // Policies
    // ========================================================================

    /// Set a policy globally, for a playback, or for one of its streams
    pub fn set_policy(
        &self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        policy: Policy,
        value: PolicyValue,
    ) -> Result<()> {
        let scope = self.policy_scope(playback, stream)?;
        debug!("Policy {:?} = {} at {:?}", policy, value, scope);
        self.ctx.policies.set(scope, policy, value)
    }

    pub fn policy_value(
        &self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        policy: Policy,
    ) -> PolicyValue {
        self.ctx.policies.value(playback, stream, policy)
    }

    fn policy_scope(&self, playback: Option<PlaybackId>, stream: Option<StreamId>) -> Result<PolicyScope> {
        match (playback, stream) {
            (None, None) => Ok(PolicyScope::Global),
            (Some(playback), None) => {
                self.ctx.find_playback(playback)?;
                Ok(PolicyScope::Playback(playback))
            }
            (Some(playback), Some(stream)) => {
                let found = self.ctx.find_stream(stream)?;
                if found.playback_id != playback {
                    return Err(Error::InvalidParameter(format!(
                        "Stream {} does not belong to playback {}",
                        stream, playback
                    )));
                }
                Ok(PolicyScope::Stream(stream))
            }
            (None, Some(_)) => Err(Error::InvalidParameter(
                "Stream policy requires its playback".to_string(),
            )),
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn set_event_signal(
        &self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        mask: EventMask,
        signal: Signal,
    ) -> Result<()> {
        self.ctx.events.set_signal(playback, stream, mask, signal)
    }

    pub fn clear_event_signal(&self, playback: Option<PlaybackId>, stream: Option<StreamId>) -> Result<()> {
        self.ctx.events.clear_signal(playback, stream)
    }

    /// Collect the first queued event matching the filter
    ///
    /// Blocking callers wait in bounded slices, re-checking after each one
    /// that the playback and stream they filter on still exist.
    pub async fn get_event_record(
        &self,
        playback: Option<PlaybackId>,
        stream: Option<StreamId>,
        mask: EventMask,
        non_blocking: bool,
    ) -> Result<EventRecord> {
        let wait = self.ctx.config.timeouts.event_wait();
        loop {
            if let Some(record) = self.ctx.events.take(playback, stream, mask) {
                return Ok(record);
            }
            if non_blocking {
                return Err(Error::NoEventRecords);
            }

            if let Some(playback) = playback {
                if self.ctx.find_playback(playback)?.is_terminating() {
                    return Err(Error::NoEventRecords);
                }
            }
            if let Some(stream) = stream {
                if self.ctx.find_stream(stream)?.terminating.is_cancelled() {
                    return Err(Error::NoEventRecords);
                }
            }

            if let Some(record) = self.ctx.events.take_or_wait(playback, stream, mask, wait).await {
                return Ok(record);
            }
        }
    }

    pub fn flush_event_records(&self, playback: Option<PlaybackId>, stream: Option<StreamId>) -> usize {
        self.ctx.events.flush(playback, stream)
    }

    /// Queue a TimeNotification event to be raised when the manifestor
    /// reaches `time`
    pub fn request_time_notification(&self, stream: StreamId, time: NativeTime, user_data: u64) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        let record = EventRecord::new(EventCode::TimeNotification)
            .with_playback(stream.playback_id)
            .with_stream(stream.id)
            .with_playback_time(time)
            .with_user_data(user_data);
        in_sequence::call_in_sequence(
            &stream,
            SequenceType::BeforePlaybackTime(time),
            InSequenceCall::ManifestorQueueEventSignal(record),
        )
    }

    // ========================================================================
    // Trick modes and timing
    // ========================================================================

    /// Change speed and direction; queued frames are handed back for retiming
    pub fn set_playback_speed(&self, playback: PlaybackId, speed: f64, direction: PlayDirection) -> Result<()> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(Error::InvalidParameter(format!("Playback speed {}", speed)));
        }
        let playback = self.ctx.find_playback(playback)?;
        playback.output_coordinator.set_playback_speed(speed, direction)?;
        playback.set_speed(speed, direction);
        info!("{}: speed {} {:?}", playback.id, speed, direction);

        for stream in playback.streams() {
            if let Some(manifestor) = stream.components().manifestor {
                if manifestor.next_queued_manifestation_time().is_some() {
                    stream.begin_retime();
                    if let Err(e) = manifestor.release_queued_decode_buffers() {
                        warn!("{}: retime release failed: {}", stream.id, e);
                        stream.end_retime();
                    }
                }
            }
            stream.single_step.set();
        }
        Ok(())
    }

    pub fn playback_speed(&self, playback: PlaybackId) -> Result<(f64, PlayDirection)> {
        Ok(self.ctx.find_playback(playback)?.speed())
    }

    /// Release one frame from a paused stream
    pub fn stream_step(&self, stream: StreamId) -> Result<()> {
        self.ctx.find_stream(stream)?.request_step();
        Ok(())
    }

    /// Set the presentation window for a playback, or one of its streams
    pub fn set_presentation_interval(
        &self,
        playback: PlaybackId,
        stream: Option<StreamId>,
        interval: PresentationInterval,
    ) -> Result<()> {
        let playback = self.ctx.find_playback(playback)?;
        match stream {
            None => playback.set_presentation_interval(interval),
            Some(id) => playback
                .find_stream(id)
                .ok_or(Error::UnknownStream)?
                .set_presentation_interval(interval),
        }
        Ok(())
    }

    pub fn last_native_time(&self, playback: PlaybackId) -> Result<Option<NativeTime>> {
        Ok(self.ctx.find_playback(playback)?.last_native_time())
    }

    // ========================================================================
    // Data input
    // ========================================================================

    /// Feed data to a stream's collator, waiting for coded buffer space
    pub async fn inject_data(&self, stream: StreamId, data: &[u8]) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        stream::inject_data(&stream, data).await
    }

    /// Signal an input discontinuity to one stream or every stream of a
    /// playback
    pub fn input_jump(
        &self,
        playback: PlaybackId,
        stream: Option<StreamId>,
        surplus_data: bool,
        continuous_reverse_jump: bool,
    ) -> Result<()> {
        let playback = self.ctx.find_playback(playback)?;
        let streams = match stream {
            Some(id) => vec![playback.find_stream(id).ok_or(Error::UnknownStream)?],
            None => playback.streams(),
        };
        for stream in streams {
            stream
                .components()
                .collator
                .input_jump(surplus_data, continuous_reverse_jump)?;
        }
        Ok(())
    }

    pub fn attach_demultiplexor(
        &self,
        stream: StreamId,
        demultiplexor: Arc<dyn Demultiplexor>,
        identifier: u32,
    ) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        let mut state = lock(&stream.state);
        if state.demultiplexor.is_some() {
            return Err(Error::InvalidParameter(format!(
                "{} already has a demultiplexor",
                stream.id
            )));
        }
        state.demultiplexor = Some((demultiplexor, identifier));
        Ok(())
    }

    pub fn detach_demultiplexor(&self, stream: StreamId) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        let detached = lock(&stream.state).demultiplexor.take();
        detached
            .map(|_| ())
            .ok_or_else(|| Error::InvalidParameter(format!("{} has no demultiplexor", stream.id)))
    }

    /// Split multiplexed data and feed each packet to the stream attached
    /// to `demultiplexor` under the packet's identifier
    pub async fn inject_multiplexed_data(
        &self,
        playback: PlaybackId,
        demultiplexor: &Arc<dyn Demultiplexor>,
        data: &[u8],
    ) -> Result<usize> {
        let playback = self.ctx.find_playback(playback)?;
        let routes: Vec<(u32, Arc<Stream>)> = playback
            .streams()
            .into_iter()
            .filter_map(|stream| {
                let id = lock(&stream.state).demultiplexor.as_ref().and_then(|(demux, id)| {
                    std::ptr::addr_eq(Arc::as_ptr(demux), Arc::as_ptr(demultiplexor)).then_some(*id)
                });
                id.map(|id| (id, stream))
            })
            .collect();

        let mut delivered = 0;
        for packet in demultiplexor.demux(data)? {
            match routes.iter().find(|(id, _)| *id == packet.identifier) {
                Some((_, stream)) => {
                    stream::inject_data(stream, &packet.data).await?;
                    delivered += 1;
                }
                None => debug!("No stream for demultiplexed identifier {}", packet.identifier),
            }
        }
        Ok(delivered)
    }

    // ========================================================================
    // In-sequence control
    // ========================================================================

    pub fn call_in_sequence(&self, stream: StreamId, sequence: SequenceType, call: InSequenceCall) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        in_sequence::call_in_sequence(&stream, sequence, call)
    }

    /// Pass a parameter block to one collaborator, now or in sequence with
    /// the data already queued
    pub async fn set_module_parameters(
        &self,
        stream: StreamId,
        component: Component,
        immediately: bool,
        parameters: &[u8],
    ) -> Result<()> {
        let stream = self.ctx.find_stream(stream)?;
        let parameters = ParameterBlock::new(parameters, self.ctx.config.limits.max_parameter_block_size)?;
        if immediately {
            let call = InSequenceCall::SetModuleParameters {
                component,
                parameters,
            };
            return in_sequence::perform(&stream, call).await;
        }
        let call = InSequenceCall::SetModuleParametersInInputOrder {
            component,
            parameters,
        };
        in_sequence::call_in_sequence(&stream, SequenceType::Immediate, call)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn stream_statistics(&self, stream: StreamId) -> Result<StreamStatistics> {
        Ok(self.ctx.find_stream(stream)?.statistics())
    }

    pub fn coded_frame_pool_usage(&self, stream: StreamId) -> Result<PoolUsage> {
        Ok(self.ctx.find_stream(stream)?.coded_frame_pool.usage())
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("playbacks", &lock(&self.ctx.playbacks).len())
            .field("events", &self.ctx.events.len())
            .finish()
    }
}
