//! Catalog track record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique catalog identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TrackId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A playable track. Immutable once the catalog stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Audio source locator (file path or URL).
    #[serde(default)]
    pub audio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    /// Whole seconds, 0 while unknown.
    #[serde(default)]
    pub duration: u32,
}

impl Track {
    pub fn new(id: u64, title: impl Into<String>, audio: impl Into<String>) -> Self {
        Self {
            id: TrackId(id),
            title: title.into(),
            artist: String::new(),
            album: None,
            audio: audio.into(),
            cover: None,
            duration: 0,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration = seconds;
        self
    }

    /// True when the track names something a resource could load.
    pub fn has_source(&self) -> bool {
        !self.audio.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_missing_optional_fields() {
        let track: Track =
            serde_json::from_value(serde_json::json!({"id": 3, "title": "Song"})).unwrap();
        assert_eq!(track.id, TrackId(3));
        assert_eq!(track.duration, 0);
        assert!(!track.has_source());
    }

    #[test]
    fn whitespace_source_is_not_a_source() {
        assert!(!Track::new(1, "x", "   ").has_source());
        assert!(Track::new(1, "x", "a.mp3").has_source());
    }
}
