//! avpipe simulator (avpipe-sim) - Main entry point
//!
//! Runs one playback with a single loopback stream, injects a run of
//! frames, drains the stream and prints what was manifested together with
//! the events and statistics the pipeline produced.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use avpipe_common::config::PipelineConfig;
use avpipe_common::events::EventMask;
use avpipe_common::policy::{Policy, POLICY_VALUE_DISCARD, POLICY_VALUE_PLAYOUT};
use avpipe_common::{PlayDirection, StreamType};
use avpipe_player::loopback::{encode_frames, LoopbackFrame, LoopbackOutputCoordinator, LoopbackStream};
use avpipe_player::Player;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Decode buffers offered by the loopback manifestor
const DECODE_BUFFERS: usize = 16;

/// Frames handed to the collator per inject call
const FRAMES_PER_CHUNK: usize = 4;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DrainPolicy {
    Playout,
    Discard,
}

/// Command-line arguments for avpipe-sim
#[derive(Parser, Debug)]
#[command(name = "avpipe-sim")]
#[command(about = "Run a loopback stream through the avpipe pipeline")]
#[command(version)]
struct Args {
    /// Configuration file (overrides AVPIPE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to inject
    #[arg(short, long, default_value = "24")]
    frames: u32,

    /// Stream type: audio, video or other
    #[arg(long, default_value = "video")]
    stream_type: StreamType,

    /// Inject frames in B-frame decode order instead of display order
    #[arg(long)]
    reorder: bool,

    /// What the final drain does with queued frames
    #[arg(long, value_enum, default_value = "playout")]
    drain_policy: DrainPolicy,

    /// Playback speed
    #[arg(long, default_value = "1.0")]
    speed: f64,
}

/// Decode order for `count` frames: display order, or pairs swapped after
/// the first key frame so each later frame decodes before the one shown
/// ahead of it
fn decode_order(count: u32, reorder: bool) -> Vec<LoopbackFrame> {
    let mut display: Vec<u32> = (0..count).collect();
    if reorder {
        let start = display.len().min(1);
        for pair in display[start..].chunks_mut(2) {
            pair.reverse();
        }
    }
    display
        .into_iter()
        .enumerate()
        .map(|(decode, shown)| LoopbackFrame::new(decode as u32, shown))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = PipelineConfig::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    let default_filter = format!("avpipe_player={},avpipe_sim={}", config.logging.level, config.logging.level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting avpipe simulator: {} {} frames, speed {}",
        args.frames, args.stream_type, args.speed
    );

    let player = Player::new(config).context("Failed to create player")?;
    let coordinator = Arc::new(LoopbackOutputCoordinator::new());
    let playback = player.create_playback(coordinator, Some(1))?;

    let loopback = LoopbackStream::new(DECODE_BUFFERS, 0);
    let stream = player
        .add_stream(playback, args.stream_type, loopback.components(), Some(2))
        .await
        .context("Failed to add stream")?;

    let policy_value = match args.drain_policy {
        DrainPolicy::Playout => POLICY_VALUE_PLAYOUT,
        DrainPolicy::Discard => POLICY_VALUE_DISCARD,
    };
    player.set_policy(Some(playback), Some(stream), Policy::PlayoutOnDrain, policy_value)?;
    player.set_playback_speed(playback, args.speed, PlayDirection::Forward)?;

    let frames = decode_order(args.frames, args.reorder);
    for chunk in frames.chunks(FRAMES_PER_CHUNK) {
        let data = encode_frames(chunk)?;
        player.inject_data(stream, &data).await.context("Failed to inject data")?;
    }

    player
        .drain_stream(stream, false, Some(3))
        .await
        .context("Drain did not complete")?;

    println!("manifested: {:?}", loopback.manifestor.manifested_display_indices());
    while let Ok(record) = player.get_event_record(Some(playback), None, EventMask::ALL, true).await {
        println!("event: {}", record.to_json()?);
    }
    let statistics = player.stream_statistics(stream)?;
    println!("statistics: {}", serde_json::to_string_pretty(&statistics)?);

    player.remove_stream(stream, None).await?;
    player.terminate_playback(playback, None).await?;
    info!("Simulation complete");
    Ok(())
}
