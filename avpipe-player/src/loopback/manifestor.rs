use crate::buffer::{Buffer, BufferKind, BufferPool, OwnerTag};
use crate::components::{BaseComponent, ComponentContext, Manifestor};
use crate::error::{Error, Result};
use crate::pipeline::Boundary;
use crate::ring::{BufferRing, RingItem};
use crate::sync::lock;
use avpipe_common::events::{EventCode, EventRecord};
use avpipe_common::time::NativeTime;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Interval between queued frames when holding
const FRAME_PERIOD: Duration = Duration::from_millis(40);

/// One frame the manifestor has shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManifestedFrame {
    pub display_index: Option<u32>,
    pub sequence: u64,
    pub playback_time: Option<NativeTime>,
}

#[derive(Default)]
struct ManifestorState {
    context: Option<ComponentContext>,
    ring: Option<Arc<BufferRing>>,
    /// Frames queued but not yet shown (hold mode only)
    queue: VecDeque<Buffer>,
    hold: bool,
    shown: Vec<ManifestedFrame>,
    /// Events raised when the next frame is shown
    waiting_events: Vec<EventRecord>,
    null_manifestations: u64,
    halted: bool,
}

/// Shows frames as soon as they are queued, or holds them until
/// [`present_all`](LoopbackManifestor::present_all) when in hold mode
pub struct LoopbackManifestor {
    pool: BufferPool,
    state: Mutex<ManifestorState>,
}

impl LoopbackManifestor {
    pub fn new(decode_buffers: usize) -> Self {
        Self {
            pool: BufferPool::new(BufferKind::DecodeFrame, "loopback-decode", decode_buffers, 0, 0),
            state: Mutex::new(ManifestorState::default()),
        }
    }

    pub fn pool(&self) -> BufferPool {
        self.pool.clone()
    }

    /// Keep queued frames unshown until `present_all`
    pub fn set_hold(&self, hold: bool) {
        lock(&self.state).hold = hold;
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Show every held frame
    pub fn present_all(&self) -> Result<usize> {
        let mut state = lock(&self.state);
        let mut shown = 0;
        while let Some(buffer) = state.queue.pop_front() {
            Self::show(&mut state, buffer)?;
            shown += 1;
        }
        Ok(shown)
    }

    pub fn manifested(&self) -> Vec<ManifestedFrame> {
        lock(&self.state).shown.clone()
    }

    pub fn manifested_display_indices(&self) -> Vec<u32> {
        lock(&self.state)
            .shown
            .iter()
            .filter_map(|f| f.display_index)
            .collect()
    }

    pub fn null_manifestations(&self) -> u64 {
        lock(&self.state).null_manifestations
    }

    pub fn is_halted(&self) -> bool {
        lock(&self.state).halted
    }

    fn show(state: &mut ManifestorState, buffer: Buffer) -> Result<()> {
        buffer.update_sequence_number(|s| s.manifested = true);
        let parsed = buffer.parsed_frame_parameters().unwrap_or_default();
        state.shown.push(ManifestedFrame {
            display_index: parsed.display_frame_index,
            sequence: buffer.sequence_number().map_or(0, |s| s.value),
            playback_time: parsed.native_playback_time,
        });

        if let Some(context) = &state.context {
            for record in state.waiting_events.drain(..) {
                context.signal_event(record);
            }
        }
        Self::release(state, buffer)
    }

    fn release(state: &mut ManifestorState, mut buffer: Buffer) -> Result<()> {
        let ring = state
            .ring
            .clone()
            .ok_or_else(|| Error::Component("Manifestor not registered".to_string()))?;
        buffer.transfer_ownership(OwnerTag::Stage(Boundary::PostManifest));
        ring.insert(RingItem::Buffer(buffer))
            .map_err(|full| Error::TooMany(format!("Manifested ring of {} entries full", full.capacity)))
    }
}

impl BaseComponent for LoopbackManifestor {
    fn register_player(&self, context: ComponentContext) -> Result<()> {
        let mut state = lock(&self.state);
        state.context = Some(context);
        state.halted = false;
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.queue.clear();
        state.waiting_events.clear();
        state.halted = true;
        Ok(())
    }
}

impl Manifestor for LoopbackManifestor {
    fn register_output_ring(&self, ring: Arc<BufferRing>) -> Result<()> {
        lock(&self.state).ring = Some(ring);
        Ok(())
    }

    fn decode_buffer_pool(&self) -> Result<BufferPool> {
        Ok(self.pool.clone())
    }

    fn queue_decode_buffer(&self, buffer: Buffer) -> Result<()> {
        let mut state = lock(&self.state);
        if state.halted {
            return Err(Error::Component("Manifestor halted".to_string()));
        }
        if state.hold {
            state.queue.push_back(buffer);
            return Ok(());
        }
        Self::show(&mut state, buffer)
    }

    fn release_queued_decode_buffers(&self) -> Result<()> {
        let mut state = lock(&self.state);
        let queued: Vec<Buffer> = state.queue.drain(..).collect();
        if !queued.is_empty() {
            debug!("Manifestor returning {} unshown frames", queued.len());
        }
        for buffer in queued {
            Self::release(&mut state, buffer)?;
        }
        Ok(())
    }

    fn queue_null_manifestation(&self) -> Result<()> {
        lock(&self.state).null_manifestations += 1;
        Ok(())
    }

    /// First-frame events wait for the next frame; anything else is raised
    /// at once since frames are shown as soon as they are queued
    fn queue_event_signal(&self, event: EventRecord) -> Result<()> {
        let mut state = lock(&self.state);
        if event.code == EventCode::FirstFrameManifested || state.hold {
            state.waiting_events.push(event);
            return Ok(());
        }
        match &state.context {
            Some(context) => {
                context.signal_event(event);
                Ok(())
            }
            None => Err(Error::Component("Manifestor not registered".to_string())),
        }
    }

    fn next_queued_manifestation_time(&self) -> Option<Instant> {
        let queued = lock(&self.state).queue.len();
        (queued > 0).then(|| Instant::now() + FRAME_PERIOD * queued as u32)
    }
}
