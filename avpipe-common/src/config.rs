//! Pipeline configuration and config file resolution
//!
//! The configuration is a single TOML document. Every field has a built-in
//! default, so an empty file (or no file at all) yields a working setup:
//!
//! ```toml
//! [limits]
//! max_ring_size = 1024
//!
//! [timeouts]
//! discard_drain_time_ms = 2500
//!
//! [coded_buffers.video]
//! frame_count = 64
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! File resolution priority order:
//! 1. Explicit path (command-line argument)
//! 2. `AVPIPE_CONFIG` environment variable
//! 3. `<user config dir>/avpipe/config.toml`, then `/etc/avpipe/config.toml`
//! 4. Compiled defaults

use crate::ids::StreamType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming a configuration file
pub const CONFIG_ENV_VAR: &str = "AVPIPE_CONFIG";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub limits: Limits,
    pub timeouts: Timeouts,
    pub coded_buffers: CodedBufferTable,
    pub logging: LoggingConfig,
}

/// Fixed capacities used throughout the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Sequence-number headroom reserved for a drain marker
    pub max_ring_size: u64,
    /// Control structures available to one stream
    pub control_structure_buffers: usize,
    /// Capacity of each per-stage accumulation table
    pub accumulated_control_messages: usize,
    /// Event records held before the oldest is evicted
    pub max_event_records: usize,
    /// External wait handles that may be registered
    pub max_event_signals: usize,
    /// Entries in the non-decoded frame table
    pub max_discarded_frames: usize,
    /// Decode buffers kept free of the reorder table
    pub minimum_working_decode_buffers: usize,
    /// Forward-play cap on decodes held out of display order
    pub limit_on_out_of_order_decodes: usize,
    /// Largest parameter block accepted by an in-sequence call
    pub max_parameter_block_size: usize,
    /// Largest decode buffer pool a manifestor may hand over
    pub max_decode_buffers: usize,
    /// Reorder table size when a manifestor reports no decode buffers
    pub default_decode_buffers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_ring_size: 1024,
            control_structure_buffers: 64,
            accumulated_control_messages: 16,
            max_event_records: 64,
            max_event_signals: 4,
            max_discarded_frames: 32,
            minimum_working_decode_buffers: 3,
            limit_on_out_of_order_decodes: 12,
            max_parameter_block_size: 128,
            max_decode_buffers: 64,
            default_decode_buffers: 64,
        }
    }
}

impl Limits {
    /// Entries in a coded ring fed by a pool of `frame_count` frames
    pub fn coded_ring_size(&self, frame_count: usize) -> usize {
        frame_count + self.control_structure_buffers
    }

    /// A drain marker reserves `max_ring_size` sequence numbers, which must
    /// cover every unnumbered entry the coded ring can hold ahead of it
    pub fn check_coded_sizing(&self, name: &str, sizing: &CodedBufferSizing) -> Result<()> {
        let ring_size = self.coded_ring_size(sizing.frame_count);
        if ring_size as u64 > self.max_ring_size {
            return Err(Error::Config(format!(
                "coded_buffers.{} ring of {} entries ({} frames + {} control structures) exceeds limits.max_ring_size ({})",
                name, ring_size, sizing.frame_count, self.control_structure_buffers, self.max_ring_size
            )));
        }
        Ok(())
    }
}

/// Bounded waits used by the pipeline, milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Ring extract wait, start/stop waits and event-queue polling
    pub event_wait_ms: u64,
    /// Poll interval while a frame waits outside the decode window
    pub next_frame_event_wait_ms: u64,
    /// Bound on a discarding drain
    pub discard_drain_time_ms: u64,
    /// Longest a frame may stay on display at normal speed
    pub time_on_display_ms: u64,
    /// Bound on a marker travelling through the codec during a switch
    pub marker_time_through_codec_ms: u64,
    /// Bound on waiting for the last queued frame of a playout drain
    pub playout_time_ms: u64,
    /// Retime window hard limit
    pub retime_max_ms: u64,
    /// Poll interval while post-manifest retiming is in progress
    pub retiming_wait_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            event_wait_ms: 50,
            next_frame_event_wait_ms: 20,
            discard_drain_time_ms: 2500,
            time_on_display_ms: 2000,
            marker_time_through_codec_ms: 2000,
            playout_time_ms: 5000,
            retime_max_ms: 1000,
            retiming_wait_ms: 4,
        }
    }
}

impl Timeouts {
    pub fn event_wait(&self) -> Duration {
        Duration::from_millis(self.event_wait_ms)
    }

    pub fn next_frame_event_wait(&self) -> Duration {
        Duration::from_millis(self.next_frame_event_wait_ms)
    }

    pub fn discard_drain_time(&self) -> Duration {
        Duration::from_millis(self.discard_drain_time_ms)
    }

    pub fn time_on_display(&self) -> Duration {
        Duration::from_millis(self.time_on_display_ms)
    }

    pub fn marker_time_through_codec(&self) -> Duration {
        Duration::from_millis(self.marker_time_through_codec_ms)
    }

    pub fn playout_time(&self) -> Duration {
        Duration::from_millis(self.playout_time_ms)
    }

    pub fn retime_max(&self) -> Duration {
        Duration::from_millis(self.retime_max_ms)
    }

    pub fn retiming_wait(&self) -> Duration {
        Duration::from_millis(self.retiming_wait_ms)
    }
}

/// Coded-frame pool sizing for one media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodedBufferSizing {
    pub frame_count: usize,
    pub memory_size: usize,
    pub maximum_frame_size: usize,
}

impl CodedBufferSizing {
    pub const fn new(frame_count: usize, memory_size: usize, maximum_frame_size: usize) -> Self {
        Self {
            frame_count,
            memory_size,
            maximum_frame_size,
        }
    }
}

impl Default for CodedBufferSizing {
    fn default() -> Self {
        Self::new(64, 1024 * 1024, 64 * 1024)
    }
}

/// Per-media-type coded-frame pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodedBufferTable {
    pub audio: CodedBufferSizing,
    pub video: CodedBufferSizing,
    pub other: CodedBufferSizing,
}

impl Default for CodedBufferTable {
    fn default() -> Self {
        Self {
            audio: CodedBufferSizing::new(256, 256 * 1024, 4 * 1024),
            video: CodedBufferSizing::new(64, 4 * 1024 * 1024, 1024 * 1024),
            other: CodedBufferSizing::new(32, 256 * 1024, 16 * 1024),
        }
    }
}

impl CodedBufferTable {
    /// Sizing for a media type, or `None` for `StreamType::None`
    pub fn for_type(&self, stream_type: StreamType) -> Option<CodedBufferSizing> {
        match stream_type {
            StreamType::Audio => Some(self.audio),
            StreamType::Video => Some(self.video),
            StreamType::Other => Some(self.other),
            StreamType::None => None,
        }
    }

    pub fn set_for_type(&mut self, stream_type: StreamType, sizing: CodedBufferSizing) -> Result<()> {
        match stream_type {
            StreamType::Audio => self.audio = sizing,
            StreamType::Video => self.video = sizing,
            StreamType::Other => self.other = sizing,
            StreamType::None => {
                return Err(Error::InvalidInput(
                    "Cannot size buffers for stream type none".to_string(),
                ))
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded pipeline configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve a configuration file and load it, falling back to defaults
    /// when no file exists anywhere in the search order
    pub fn load_or_default(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg, CONFIG_ENV_VAR) {
            Some(path) => Self::load(&path),
            None => {
                debug!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values that would make the pipeline unusable
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.max_ring_size == 0 {
            return Err(Error::Config("limits.max_ring_size must be non-zero".to_string()));
        }
        if limits.control_structure_buffers == 0 {
            return Err(Error::Config(
                "limits.control_structure_buffers must be non-zero".to_string(),
            ));
        }
        if limits.max_event_records == 0 {
            return Err(Error::Config("limits.max_event_records must be non-zero".to_string()));
        }
        if limits.default_decode_buffers > limits.max_decode_buffers {
            return Err(Error::Config(format!(
                "limits.default_decode_buffers ({}) exceeds limits.max_decode_buffers ({})",
                limits.default_decode_buffers, limits.max_decode_buffers
            )));
        }
        for (name, sizing) in [
            ("audio", self.coded_buffers.audio),
            ("video", self.coded_buffers.video),
            ("other", self.coded_buffers.other),
        ] {
            if sizing.frame_count == 0 {
                return Err(Error::Config(format!(
                    "coded_buffers.{}.frame_count must be non-zero",
                    name
                )));
            }
            limits.check_coded_sizing(name, &sizing)?;
        }
        if self.timeouts.event_wait_ms == 0 {
            return Err(Error::Config("timeouts.event_wait_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Locate a configuration file following the documented priority order
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user then system-wide file
    let user_config = dirs::config_dir().map(|d| d.join("avpipe").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }
    let system_config = PathBuf::from("/etc/avpipe/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_section() {
        let config = PipelineConfig::from_toml_str(
            "[coded_buffers.video]\nframe_count = 4\n[timeouts]\nevent_wait_ms = 10\n",
        )
        .unwrap();
        assert_eq!(config.coded_buffers.video.frame_count, 4);
        assert_eq!(
            config.coded_buffers.video.maximum_frame_size,
            CodedBufferSizing::default().maximum_frame_size
        );
        assert_eq!(config.timeouts.event_wait(), Duration::from_millis(10));
        assert_eq!(config.timeouts.discard_drain_time_ms, 2500);
    }

    #[test]
    fn test_zero_ring_size_rejected() {
        let result = PipelineConfig::from_toml_str("[limits]\nmax_ring_size = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_coded_ring_larger_than_marker_headroom_rejected() {
        let result = PipelineConfig::from_toml_str("[limits]\nmax_ring_size = 8\n");
        assert!(matches!(result, Err(Error::Config(_))));

        let result = PipelineConfig::from_toml_str(
            "[limits]\nmax_ring_size = 100\ncontrol_structure_buffers = 4\n\
             [coded_buffers.audio]\nframe_count = 96\n\
             [coded_buffers.video]\nframe_count = 97\n\
             [coded_buffers.other]\nframe_count = 8\n",
        );
        assert!(matches!(result, Err(Error::Config(ref message)) if message.contains("video")));
    }

    #[test]
    fn test_coded_ring_filling_marker_headroom_accepted() {
        let limits = Limits {
            max_ring_size: 100,
            control_structure_buffers: 4,
            ..Limits::default()
        };
        assert!(limits.check_coded_sizing("audio", &CodedBufferSizing::new(96, 0, 0)).is_ok());
        assert!(limits.check_coded_sizing("audio", &CodedBufferSizing::new(97, 0, 0)).is_err());
    }

    #[test]
    fn test_sizing_for_none_type() {
        let table = CodedBufferTable::default();
        assert!(table.for_type(StreamType::None).is_none());
        assert!(table.for_type(StreamType::Audio).is_some());
    }
}
