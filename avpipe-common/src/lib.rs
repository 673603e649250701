//! # avpipe Common Library
//!
//! Shared definitions for the pipeline core and its tools:
//! - Playback/stream identifiers and stream types
//! - Event codes, masks and event records
//! - Policy identifiers and values
//! - Pipeline configuration (TOML) and config file resolution
//! - Native time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod policy;
pub mod time;

pub use error::{Error, Result};
pub use ids::{PlayDirection, PlaybackId, StreamId, StreamType};
