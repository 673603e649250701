use crate::buffer::Buffer;
use crate::components::{
    BaseComponent, ComponentContext, DecodeWindow, FrameDrop, FrameDropPoint, OutputCoordinator, OutputTimer,
};
use crate::error::Result;
use crate::sync::lock;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct TimerState {
    context: Option<ComponentContext>,
    coordinator: Option<Arc<dyn OutputCoordinator>>,
    /// Display indices to drop before decode
    drop_before_decode: HashSet<u32>,
    timings_generated: u64,
    timings_recorded: u64,
    mapping_resets: u64,
    halted: bool,
}

/// Admits every frame at once; drops chosen frames and anything outside the
/// presentation interval
#[derive(Default)]
pub struct LoopbackOutputTimer {
    state: Mutex<TimerState>,
}

impl LoopbackOutputTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the frame shown at `display_index` before it is decoded
    pub fn drop_before_decode(&self, display_index: u32) {
        lock(&self.state).drop_before_decode.insert(display_index);
    }

    pub fn timings_generated(&self) -> u64 {
        lock(&self.state).timings_generated
    }

    pub fn timings_recorded(&self) -> u64 {
        lock(&self.state).timings_recorded
    }

    pub fn mapping_resets(&self) -> u64 {
        lock(&self.state).mapping_resets
    }

    pub fn has_coordinator(&self) -> bool {
        lock(&self.state).coordinator.is_some()
    }

    pub fn is_halted(&self) -> bool {
        lock(&self.state).halted
    }
}

impl BaseComponent for LoopbackOutputTimer {
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

impl OutputTimer for LoopbackOutputTimer {
    fn register_output_coordinator(&self, coordinator: Arc<dyn OutputCoordinator>) -> Result<()> {
        lock(&self.state).coordinator = Some(coordinator);
        Ok(())
    }

    fn await_entry_into_decode_window(&self, _buffer: &Buffer) -> Result<DecodeWindow> {
        Ok(DecodeWindow::Enter)
    }

    fn test_for_frame_drop(&self, buffer: &Buffer, point: FrameDropPoint) -> FrameDrop {
        let parsed = buffer.parsed_frame_parameters().unwrap_or_default();
        let state = lock(&self.state);
        let drop = match point {
            FrameDropPoint::BeforeDecode => parsed
                .display_frame_index
                .map_or(false, |index| state.drop_before_decode.contains(&index)),
            FrameDropPoint::BeforeManifestation => match (&state.context, parsed.native_playback_time) {
                (Some(context), Some(time)) => !context.presentation_interval().contains(time),
                _ => false,
            },
            FrameDropPoint::BeforeDecodeWindow | FrameDropPoint::BeforeOutputTiming => false,
        };
        if drop {
            FrameDrop::Drop
        } else {
            FrameDrop::Keep
        }
    }

    fn generate_frame_timing(&self, _buffer: &Buffer) -> Result<()> {
        lock(&self.state).timings_generated += 1;
        Ok(())
    }

    fn record_actual_frame_timing(&self, _buffer: &Buffer) -> Result<()> {
        lock(&self.state).timings_recorded += 1;
        Ok(())
    }

    fn reset_time_mapping(&self) -> Result<()> {
        lock(&self.state).mapping_resets += 1;
        Ok(())
    }
}
