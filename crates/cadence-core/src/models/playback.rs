//! Playback commands.
//!
//! PlaybackCommand is a tagged enum written to `/cadence/player/command`
//! by collaborators that cannot call the engine directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::track::{Track, TrackId};

/// Command consumed by the engine's command loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlaybackCommand {
    Play { track: Track },
    PlayId { id: TrackId },
    PlayAlbum { id: u64 },
    TogglePlay,
    Pause,
    Resume,
    Stop,
    Seek { position: f64 },
    Next,
    Previous,
    SetVolume { volume: u8 },
    ToggleMute,
    ToggleShuffle,
    ToggleRepeat,
    ToggleLike,
}

impl PlaybackCommand {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        serde_json::from_value(v.clone()).ok()
    }
}
