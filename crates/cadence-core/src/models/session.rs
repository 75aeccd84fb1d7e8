//! Playback session and its durable snapshot.
//!
//! `PlaybackSession` is what the engine mutates. `PlayerSnapshot` is the
//! wire shape at `/cadence/player/session`: camelCase keys, every field
//! optional on read so that older or partial snapshots still restore.

use serde::{Deserialize, Serialize};

use super::track::{Track, TrackId};

pub const DEFAULT_VOLUME: u8 = 50;

/// In-memory playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub track: Option<Track>,
    /// Previously active track, excluded when picking the next one.
    pub last_track: Option<Track>,
    /// Elapsed seconds.
    pub position: f64,
    /// Seconds, 0 while unknown.
    pub duration: f64,
    pub playing: bool,
    /// 0..=100
    pub volume: u8,
    /// Volume to return to on unmute.
    pub muted_volume: Option<u8>,
    pub shuffle: bool,
    pub repeat: bool,
    /// Running on the simulated clock after a playback failure.
    pub degraded: bool,
    /// Last user-visible playback error.
    pub error: Option<String>,
    /// Saved position waiting for the resource to become seekable.
    #[serde(skip)]
    pub pending_seek: Option<f64>,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            track: None,
            last_track: None,
            position: 0.0,
            duration: 0.0,
            playing: false,
            volume: DEFAULT_VOLUME,
            muted_volume: None,
            shuffle: false,
            repeat: false,
            degraded: false,
            error: None,
            pending_seek: None,
        }
    }
}

impl PlaybackSession {
    /// Fresh session for `track`, carrying over the user's settings.
    ///
    /// The outgoing track becomes `last_track` unless it is the same track.
    pub fn replaced_by(&self, track: Track) -> Self {
        let last_track = match &self.track {
            Some(current) if current.id != track.id => Some(current.clone()),
            _ => self.last_track.clone(),
        };
        Self {
            duration: track.duration as f64,
            track: Some(track),
            last_track,
            position: 0.0,
            playing: true,
            volume: self.volume,
            muted_volume: self.muted_volume,
            shuffle: self.shuffle,
            repeat: self.repeat,
            degraded: false,
            error: None,
            pending_seek: None,
        }
    }

    pub fn track_id(&self) -> Option<TrackId> {
        self.track.as_ref().map(|t| t.id)
    }

    pub fn last_track_id(&self) -> Option<TrackId> {
        self.last_track.as_ref().map(|t| t.id)
    }

    /// Position clamped into the known duration.
    pub fn clamp_position(&self, position: f64) -> f64 {
        let position = position.max(0.0);
        if self.duration > 0.0 {
            position.min(self.duration)
        } else {
            position
        }
    }
}

/// Durable snapshot of a [`PlaybackSession`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerSnapshot {
    pub track_ref: Option<Track>,
    pub last_track_ref: Option<Track>,
    pub position: f64,
    pub duration: f64,
    pub volume: Option<u32>,
    pub shuffle: bool,
    pub repeat: bool,
    pub playing: bool,
}

impl PlayerSnapshot {
    pub fn from_session(session: &PlaybackSession) -> Self {
        Self {
            track_ref: session.track.clone(),
            last_track_ref: session.last_track.clone(),
            position: session.pending_seek.unwrap_or(session.position),
            duration: session.duration,
            volume: Some(session.volume as u32),
            shuffle: session.shuffle,
            repeat: session.repeat,
            playing: session.playing,
        }
    }

    /// Source the snapshot expects to resume, if it names a loadable track.
    pub fn restorable_source(&self) -> Option<&str> {
        self.track_ref
            .as_ref()
            .filter(|t| t.has_source())
            .map(|t| t.audio.as_str())
    }

    pub fn volume(&self) -> Option<u8> {
        self.volume.map(|v| v.min(100) as u8)
    }
}
