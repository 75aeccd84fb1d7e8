//! Audio resources: anything that can be in a playing or paused state.
//!
//! The coordinator only talks to resources through [`AudioResource`]. Native
//! output (`effects::audio`) and the simulated clock (`effects::simulated`)
//! both implement it; so do test doubles.
//!
//! Resources fire listeners synchronously from whatever thread caused the
//! transition. Implementations must not hold their own locks while doing so.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique resource identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// How much of the source is available. Mirrors the media element levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ReadyState {
    #[default]
    Nothing = 0,
    Metadata = 1,
    CurrentData = 2,
    /// Enough buffered to seek and keep playing.
    FutureData = 3,
    EnoughData = 4,
}

impl ReadyState {
    pub fn can_seek(self) -> bool {
        self >= ReadyState::FutureData
    }
}

/// Transition reported to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    Playing,
    Paused,
    Ready(ReadyState),
    Ended,
    Failed(String),
}

pub type Listener = Arc<dyn Fn(ResourceId, &ResourceEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("audio source unavailable: {source_uri}: {reason}")]
    Unavailable { source_uri: String, reason: String },
    #[error("playback rejected: {0}")]
    Rejected(String),
    #[error("resource {0} is torn down")]
    TornDown(ResourceId),
}

/// An audio-producing object.
pub trait AudioResource: Send + Sync {
    fn id(&self) -> ResourceId;
    fn source(&self) -> &str;

    fn play(&self) -> Result<(), ResourceError>;
    fn pause(&self) -> Result<(), ResourceError>;
    fn seek(&self, position: f64) -> Result<(), ResourceError>;
    fn set_volume(&self, volume: u8);

    fn is_playing(&self) -> bool;
    fn is_ended(&self) -> bool;
    /// Seconds.
    fn position(&self) -> f64;
    /// Seconds, `None` until the source is probed.
    fn duration(&self) -> Option<f64>;
    fn ready_state(&self) -> ReadyState;
    /// Asynchronous failure (decode or device), if any.
    fn error(&self) -> Option<String> {
        None
    }

    fn subscribe(&self, listener: Listener) -> ListenerId;
    fn unsubscribe(&self, id: ListenerId);

    /// Pause and rewind. Safe on an already-stopped resource.
    fn stop(&self) -> Result<(), ResourceError> {
        self.pause()?;
        self.seek(0.0)
    }

    /// Free threads and devices. The resource is unusable afterwards.
    fn release(&self) {}
}

impl fmt::Debug for dyn AudioResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioResource")
            .field("id", &self.id())
            .field("source", &self.source())
            .field("playing", &self.is_playing())
            .finish()
    }
}

/// Creates resources for a source locator.
pub trait ResourceFactory: Send + Sync {
    fn create(&self, source: &str) -> Result<Arc<dyn AudioResource>, ResourceError>;
}

/// Resources that exist outside the factory path (third-party embeds).
///
/// Only consulted by the fallback sweep.
pub trait Discovery: Send + Sync {
    fn discover(&self) -> Vec<Arc<dyn AudioResource>>;
}

impl<F> Discovery for F
where
    F: Fn() -> Vec<Arc<dyn AudioResource>> + Send + Sync,
{
    fn discover(&self) -> Vec<Arc<dyn AudioResource>> {
        self()
    }
}

/// Listener bookkeeping shared by resource implementations.
#[derive(Default)]
pub struct Listeners {
    next: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Listener)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) {
        self.entries.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener. The list is snapshotted first so listeners may
    /// subscribe or unsubscribe while running.
    pub fn emit(&self, resource: ResourceId, event: &ResourceEvent) {
        let snapshot: Vec<Listener> = self.entries.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener(resource, event);
        }
    }
}
