use crate::components::OutputCoordinator;
use crate::error::{Error, Result};
use crate::sync::lock;
use avpipe_common::{PlayDirection, StreamId, StreamType};
use std::sync::Mutex;

struct CoordinatorState {
    streams: Vec<(StreamId, StreamType)>,
    speed: (f64, PlayDirection),
    resets: u64,
}

/// Tracks registered streams and the requested speed
pub struct LoopbackOutputCoordinator {
    state: Mutex<CoordinatorState>,
}

impl LoopbackOutputCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                streams: Vec::new(),
                speed: (1.0, PlayDirection::Forward),
                resets: 0,
            }),
        }
    }

    pub fn registered_streams(&self) -> Vec<StreamId> {
        lock(&self.state).streams.iter().map(|(id, _)| *id).collect()
    }

    pub fn speed(&self) -> (f64, PlayDirection) {
        lock(&self.state).speed
    }

    pub fn resets(&self) -> u64 {
        lock(&self.state).resets
    }
}

impl Default for LoopbackOutputCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputCoordinator for LoopbackOutputCoordinator {
    fn register_stream(&self, stream: StreamId, stream_type: StreamType) -> Result<()> {
        let mut state = lock(&self.state);
        if state.streams.iter().any(|(id, _)| *id == stream) {
            return Err(Error::InvalidParameter(format!("{} already registered", stream)));
        }
        state.streams.push((stream, stream_type));
        Ok(())
    }

    fn deregister_stream(&self, stream: StreamId) -> Result<()> {
        let mut state = lock(&self.state);
        let before = state.streams.len();
        state.streams.retain(|(id, _)| *id != stream);
        if state.streams.len() == before {
            return Err(Error::UnknownStream);
        }
        Ok(())
    }

    fn set_playback_speed(&self, speed: f64, direction: PlayDirection) -> Result<()> {
        lock(&self.state).speed = (speed, direction);
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.streams.clear();
        state.resets += 1;
        Ok(())
    }
}
