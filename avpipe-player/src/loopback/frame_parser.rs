use crate::buffer::{Buffer, OwnerTag};
use crate::components::{BaseComponent, ComponentContext, FrameParser};
use crate::error::{Error, Result};
use crate::loopback::LoopbackFrame;
use crate::ring::{BufferRing, RingItem};
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Default)]
struct ParserState {
    context: Option<ComponentContext>,
    ring: Option<Arc<BufferRing>>,
    parsed: u64,
    halted: bool,
}

/// Reads the loopback header into parsed frame parameters
#[derive(Default)]
pub struct LoopbackFrameParser {
    state: Mutex<ParserState>,
}

impl LoopbackFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_parsed(&self) -> u64 {
        lock(&self.state).parsed
    }

    pub fn is_halted(&self) -> bool {
        lock(&self.state).halted
    }
}

impl BaseComponent for LoopbackFrameParser {
    fn register_player(&self, context: ComponentContext) -> Result<()> {
        let mut state = lock(&self.state);
        state.context = Some(context);
        state.halted = false;
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        lock(&self.state).halted = true;
        Ok(())
    }
}

impl FrameParser for LoopbackFrameParser {
    fn register_output_ring(&self, ring: Arc<BufferRing>) -> Result<()> {
        lock(&self.state).ring = Some(ring);
        Ok(())
    }

    fn input(&self, mut buffer: Buffer) -> Result<()> {
        let mut state = lock(&self.state);
        let ring = state
            .ring
            .clone()
            .ok_or_else(|| Error::Component("Frame parser not registered".to_string()))?;

        if buffer.payload_len() > 0 {
            match LoopbackFrame::decode(&buffer.payload()) {
                Ok(header) => buffer.set_parsed_frame_parameters(header.parsed_parameters()),
                Err(e) => {
                    warn!("Unparseable frame: {}", e);
                    if let Some(context) = &state.context {
                        context.mark_stream_unplayable()?;
                    }
                    return Err(e);
                }
            }
            state.parsed += 1;
        }
        drop(state);

        buffer.transfer_ownership(OwnerTag::Stage(crate::pipeline::Boundary::ParseToDecode));
        ring.insert(RingItem::Buffer(buffer))
            .map_err(|full| Error::TooMany(format!("Parsed ring of {} entries full", full.capacity)))
    }
}
