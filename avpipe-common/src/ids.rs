//! Identifiers for playbacks and streams

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one presentation timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackId(pub Uuid);

impl PlaybackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlaybackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "playback-{}", self.0)
    }
}

/// Identifier of one elementary stream within a playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Media type of an elementary stream
///
/// `None` exists so callers can express "no stream"; adding a stream of
/// this type is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    None,
    Audio,
    Video,
    Other,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamType::None => "none",
            StreamType::Audio => "audio",
            StreamType::Video => "video",
            StreamType::Other => "other",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for StreamType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(StreamType::None),
            "audio" => Ok(StreamType::Audio),
            "video" => Ok(StreamType::Video),
            "other" => Ok(StreamType::Other),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown stream type: {}",
                other
            ))),
        }
    }
}

/// Direction of play for a playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayDirection {
    #[default]
    Forward,
    Backward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_type_parse() {
        assert_eq!("Video".parse::<StreamType>().unwrap(), StreamType::Video);
        assert_eq!("audio".parse::<StreamType>().unwrap(), StreamType::Audio);
        assert!("teletext".parse::<StreamType>().is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(PlaybackId::new(), PlaybackId::new());
        assert_ne!(StreamId::new(), StreamId::new());
    }
}
