//! # avpipe Player Library (avpipe-player)
//!
//! Control and data-flow core of an audio/video player.
//!
//! **Purpose:** Move coded frames through collation, parsing, decoding and
//! manifestation while keeping in-band control requests (parameter changes,
//! collaborator switches, drains, event signals) in order with the data.
//!
//! **Architecture:** Per stream, four stage tasks joined by bounded rings;
//! drains and switches are driven by a marker buffer flowing through them.
//! Collaborators (collator, frame parser, codec, output timer, manifestor)
//! are plugged in through the traits in [`components`].

pub mod buffer;
pub mod components;
pub mod control;
pub mod error;
pub mod events;
pub mod loopback;
pub mod pipeline;
pub mod player;
pub mod policy;
pub mod ring;
pub mod statistics;
pub mod sync;

pub use error::{Error, ErrorClass, Result};
pub use player::Player;
pub use sync::Signal;
