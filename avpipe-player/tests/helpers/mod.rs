//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use avpipe_common::config::PipelineConfig;
use avpipe_common::{PlaybackId, StreamId, StreamType};
use avpipe_player::loopback::{encode_frames, LoopbackFrame, LoopbackOutputCoordinator, LoopbackStream};
use avpipe_player::Player;
use std::sync::Arc;
use std::time::Duration;

/// Decode buffers given to every loopback manifestor
pub const DECODE_BUFFERS: usize = 16;

/// Configuration with short waits so failures surface quickly
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.timeouts.event_wait_ms = 10;
    config.timeouts.next_frame_event_wait_ms = 5;
    config.timeouts.discard_drain_time_ms = 1000;
    config.timeouts.marker_time_through_codec_ms = 1000;
    config.timeouts.playout_time_ms = 2000;
    config.timeouts.retime_max_ms = 200;
    config.timeouts.retiming_wait_ms = 2;
    config
}

/// A player with one playback driven by a loopback coordinator
pub struct TestPlayback {
    pub player: Player,
    pub playback: PlaybackId,
    pub coordinator: Arc<LoopbackOutputCoordinator>,
}

impl TestPlayback {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let player = Player::new(config).expect("player");
        let coordinator = Arc::new(LoopbackOutputCoordinator::new());
        let playback = player
            .create_playback(coordinator.clone(), None)
            .expect("playback");
        Self {
            player,
            playback,
            coordinator,
        }
    }

    /// Add a video stream with a full set of loopback collaborators
    pub async fn add_stream(&self) -> (StreamId, LoopbackStream) {
        self.add_stream_with_delay(0).await
    }

    pub async fn add_stream_with_delay(&self, codec_delay: usize) -> (StreamId, LoopbackStream) {
        let loopback = LoopbackStream::new(DECODE_BUFFERS, codec_delay);
        let stream = self
            .player
            .add_stream(self.playback, StreamType::Video, loopback.components(), None)
            .await
            .expect("add stream");
        (stream, loopback)
    }

    /// Add a stream that stops after Parse→Decode
    pub async fn add_stream_without_manifestor(&self) -> (StreamId, LoopbackStream) {
        let loopback = LoopbackStream::new(DECODE_BUFFERS, 0);
        let stream = self
            .player
            .add_stream(
                self.playback,
                StreamType::Video,
                loopback.components_without_manifestor(),
                None,
            )
            .await
            .expect("add stream");
        (stream, loopback)
    }

    /// Inject frames given as (decode index, display index) pairs
    pub async fn inject(&self, stream: StreamId, frames: &[(u32, u32)]) {
        let frames: Vec<LoopbackFrame> = frames
            .iter()
            .map(|(decode, display)| LoopbackFrame::new(*decode, *display))
            .collect();
        self.inject_frames(stream, &frames).await;
    }

    pub async fn inject_frames(&self, stream: StreamId, frames: &[LoopbackFrame]) {
        let data = encode_frames(frames).expect("encode");
        self.player.inject_data(stream, &data).await.expect("inject");
    }
}

/// Frames 0..count in display order
pub fn in_order(count: u32) -> Vec<(u32, u32)> {
    (0..count).map(|i| (i, i)).collect()
}

/// Poll `condition` until it holds or `timeout` expires
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Wait for the manifestor to have shown `count` frames
pub async fn wait_for_manifested(loopback: &LoopbackStream, count: usize) -> bool {
    wait_until(Duration::from_secs(2), || loopback.manifestor.manifested().len() >= count).await
}
