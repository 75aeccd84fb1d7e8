//! Cadence data models.
//!
//! Tracks, the playback session, its durable snapshot, and the commands
//! collaborators send. Stored as plain JSON in scrolls via serde.

pub mod playback;
pub mod session;
pub mod track;

pub use playback::PlaybackCommand;
pub use session::{PlaybackSession, PlayerSnapshot, DEFAULT_VOLUME};
pub use track::{Track, TrackId};
