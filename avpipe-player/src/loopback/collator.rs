use crate::buffer::{CodedFrameParameters, OwnerTag};
use crate::components::{BaseComponent, Collator, ComponentContext};
use crate::error::{Error, Result};
use crate::loopback::LoopbackFrame;
use crate::ring::{BufferRing, RingItem};
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use tracing::trace;

#[derive(Default)]
struct CollatorState {
    context: Option<ComponentContext>,
    ring: Option<Arc<BufferRing>>,
    /// Bytes of an incomplete frame line
    pending: Vec<u8>,
    frames: u64,
    jumps: u64,
    parameters: Vec<Vec<u8>>,
}

/// Splits input into newline-terminated frames
#[derive(Default)]
pub struct LoopbackCollator {
    state: Mutex<CollatorState>,
}

impl LoopbackCollator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_collated(&self) -> u64 {
        lock(&self.state).frames
    }

    pub fn jumps(&self) -> u64 {
        lock(&self.state).jumps
    }

    /// Parameter blocks received through `set_module_parameters`
    pub fn parameters(&self) -> Vec<Vec<u8>> {
        lock(&self.state).parameters.clone()
    }

    fn emit(state: &mut CollatorState, frame: &[u8]) -> Result<()> {
        let (Some(context), Some(ring)) = (&state.context, &state.ring) else {
            return Err(Error::Component("Collator not registered".to_string()));
        };
        let buffer = context.coded_frame_pool.get_buffer(OwnerTag::Collator, frame.len())?;
        buffer.set_payload(frame)?;
        if !frame.is_empty() {
            let header = LoopbackFrame::decode(frame)?;
            buffer.set_coded_frame_parameters(CodedFrameParameters {
                playback_time: header.playback_time,
                decode_time: None,
            });
        }
        ring.insert(RingItem::Buffer(buffer))
            .map_err(|full| Error::TooMany(format!("Collated ring of {} entries full", full.capacity)))
    }
}

impl BaseComponent for LoopbackCollator {
    fn register_player(&self, context: ComponentContext) -> Result<()> {
        lock(&self.state).context = Some(context);
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        lock(&self.state).pending.clear();
        Ok(())
    }

    fn set_module_parameters(&self, parameters: &[u8]) -> Result<()> {
        lock(&self.state).parameters.push(parameters.to_vec());
        Ok(())
    }
}

impl Collator for LoopbackCollator {
    fn register_output_ring(&self, ring: Arc<BufferRing>) -> Result<()> {
        lock(&self.state).ring = Some(ring);
        Ok(())
    }

    fn input(&self, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        state.pending.extend_from_slice(data);
        while let Some(end) = state.pending.iter().position(|b| *b == b'\n') {
            let frame: Vec<u8> = state.pending.drain(..=end).collect();
            Self::emit(&mut state, &frame)?;
            state.frames += 1;
        }
        trace!("Collator holding {} bytes", state.pending.len());
        Ok(())
    }

    fn input_jump(&self, surplus_data: bool, _continuous_reverse_jump: bool) -> Result<()> {
        let mut state = lock(&self.state);
        if surplus_data {
            state.pending.clear();
        }
        state.jumps += 1;
        Self::emit(&mut state, &[])
    }

    fn discard_accumulated_data(&self) -> Result<()> {
        lock(&self.state).pending.clear();
        Ok(())
    }
}
