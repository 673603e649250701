use crate::buffer::{Buffer, BufferPool, OwnerTag};
use crate::components::{BaseComponent, Codec, ComponentContext};
use crate::control::ReferenceFrameRelease;
use crate::error::{Error, Result};
use crate::ring::{BufferRing, RingItem};
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct CodecState {
    context: Option<ComponentContext>,
    ring: Option<Arc<BufferRing>>,
    /// Decoded frames not yet output
    held: VecDeque<Buffer>,
    decoded: u64,
    discarded: u64,
    released: u64,
    reference_releases: u64,
    /// Parameter blocks, each with the decode count when it arrived
    parameters: Vec<(u64, Vec<u8>)>,
    halted: bool,
}

/// "Decodes" by attaching the coded buffer to a fresh decode buffer
///
/// Up to `delay` decoded frames are held back until more input arrives
/// or output of partial decodes is requested.
pub struct LoopbackCodec {
    pool: BufferPool,
    delay: usize,
    state: Mutex<CodecState>,
}

impl LoopbackCodec {
    pub fn new(pool: BufferPool, delay: usize) -> Self {
        Self {
            pool,
            delay,
            state: Mutex::new(CodecState::default()),
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        lock(&self.state).decoded
    }

    pub fn frames_discarded(&self) -> u64 {
        lock(&self.state).discarded
    }

    pub fn buffers_released(&self) -> u64 {
        lock(&self.state).released
    }

    pub fn reference_releases(&self) -> u64 {
        lock(&self.state).reference_releases
    }

    pub fn is_halted(&self) -> bool {
        lock(&self.state).halted
    }

    /// Parameter blocks received, each paired with the number of frames
    /// decoded before it arrived
    pub fn parameters(&self) -> Vec<(u64, Vec<u8>)> {
        lock(&self.state).parameters.clone()
    }

    fn output(state: &mut CodecState, keep: usize) -> Result<()> {
        let Some(ring) = state.ring.clone() else {
            // Two-stage stream: decoded output has nowhere to go
            state.held.clear();
            return Ok(());
        };
        while state.held.len() > keep {
            let Some(buffer) = state.held.pop_front() else {
                break;
            };
            ring.insert(RingItem::Buffer(buffer))
                .map_err(|full| Error::TooMany(format!("Decoded ring of {} entries full", full.capacity)))?;
        }
        Ok(())
    }
}

impl BaseComponent for LoopbackCodec {
    fn register_player(&self, context: ComponentContext) -> Result<()> {
        let mut state = lock(&self.state);
        state.context = Some(context);
        state.halted = false;
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.held.clear();
        state.halted = true;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.held.clear();
        state.ring = None;
        Ok(())
    }

    fn set_module_parameters(&self, parameters: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        let decoded = state.decoded;
        state.parameters.push((decoded, parameters.to_vec()));
        Ok(())
    }
}

impl Codec for LoopbackCodec {
    fn register_output_ring(&self, ring: Arc<BufferRing>) -> Result<()> {
        lock(&self.state).ring = Some(ring);
        Ok(())
    }

    fn input(&self, coded: Buffer) -> Result<()> {
        let mut state = lock(&self.state);
        if state.halted {
            return Err(Error::Component("Codec halted".to_string()));
        }
        let decoded = self.pool.get_buffer(OwnerTag::Codec, 0)?;
        decoded.attach_buffer(coded)?;
        state.decoded += 1;
        state.held.push_back(decoded);
        Self::output(&mut state, self.delay)
    }

    fn output_partial_decode_buffers(&self) -> Result<()> {
        Self::output(&mut lock(&self.state), 0)
    }

    fn discard_queued_decodes(&self) -> Result<()> {
        let mut state = lock(&self.state);
        let count = state.held.len() as u64;
        state.held.clear();
        state.discarded += count;
        if count > 0 {
            debug!("Codec discarded {} queued decodes", count);
        }
        Ok(())
    }

    fn release_reference_frame(&self, _release: ReferenceFrameRelease) -> Result<()> {
        lock(&self.state).reference_releases += 1;
        Ok(())
    }

    fn release_decode_buffer(&self, buffer: Buffer) -> Result<()> {
        let mut state = lock(&self.state);
        if state.halted {
            warn!("Decode buffer {} returned to a halted codec", buffer.index());
        }
        state.released += 1;
        drop(buffer);
        Ok(())
    }
}
