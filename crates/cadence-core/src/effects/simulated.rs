//! Simulated clock resource.
//!
//! Produces no sound: position advances with wall-clock time while playing
//! and the resource ends at its duration. The engine falls back to it when a
//! real source fails so progress keeps moving, and headless builds and tests
//! use it as their only backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::resource::{
    AudioResource, Listener, ListenerId, Listeners, ReadyState, ResourceError, ResourceEvent,
    ResourceFactory, ResourceId,
};

pub struct SimulatedResource {
    id: ResourceId,
    source: String,
    state: Mutex<SimState>,
    listeners: Listeners,
}

struct SimState {
    playing: bool,
    /// Position when the clock was last anchored.
    base: f64,
    anchored_at: Option<Instant>,
    duration: Option<f64>,
    ready: ReadyState,
    volume: u8,
    released: bool,
    reject_play: Option<String>,
    reject_pause: bool,
    plays: usize,
}

impl SimState {
    fn position(&self) -> f64 {
        let elapsed = match (self.playing, self.anchored_at) {
            (true, Some(at)) => at.elapsed().as_secs_f64(),
            _ => 0.0,
        };
        let pos = self.base + elapsed;
        match self.duration {
            Some(d) if d > 0.0 => pos.min(d),
            _ => pos,
        }
    }

    fn ended(&self) -> bool {
        matches!(self.duration, Some(d) if d > 0.0 && self.position() >= d)
    }
}

impl SimulatedResource {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: ResourceId::next(),
            source: source.into(),
            state: Mutex::new(SimState {
                playing: false,
                base: 0.0,
                anchored_at: None,
                duration: None,
                ready: ReadyState::EnoughData,
                volume: 100,
                released: false,
                reject_play: None,
                reject_pause: false,
                plays: 0,
            }),
            listeners: Listeners::new(),
        }
    }

    /// Seconds; `0` means unknown and the clock never ends.
    pub fn with_duration(self, seconds: f64) -> Self {
        self.state.lock().duration = Some(seconds).filter(|d| *d > 0.0);
        self
    }

    pub fn with_ready_state(self, ready: ReadyState) -> Self {
        self.state.lock().ready = ready;
        self
    }

    /// Report more (or less) buffered data, as a loading source would.
    pub fn set_ready_state(&self, ready: ReadyState) {
        self.state.lock().ready = ready;
        self.listeners.emit(self.id, &ResourceEvent::Ready(ready));
    }

    /// Make the next `play()` calls fail, as an autoplay policy would.
    pub fn reject_play(&self, reason: Option<&str>) {
        self.state.lock().reject_play = reason.map(String::from);
    }

    /// Make `pause()` fail, as a resource mid-teardown would.
    pub fn reject_pause(&self, reject: bool) {
        self.state.lock().reject_pause = reject;
    }

    /// Number of times playback actually started.
    pub fn play_count(&self) -> usize {
        self.state.lock().plays
    }

    pub fn volume(&self) -> u8 {
        self.state.lock().volume
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl AudioResource for SimulatedResource {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn play(&self) -> Result<(), ResourceError> {
        {
            let mut s = self.state.lock();
            if s.released {
                return Err(ResourceError::TornDown(self.id));
            }
            if let Some(reason) = &s.reject_play {
                return Err(ResourceError::Rejected(reason.clone()));
            }
            if s.ended() {
                s.base = 0.0;
            }
            if s.playing {
                return Ok(());
            }
            s.playing = true;
            s.anchored_at = Some(Instant::now());
            s.plays += 1;
        }
        self.listeners.emit(self.id, &ResourceEvent::Playing);
        Ok(())
    }

    fn pause(&self) -> Result<(), ResourceError> {
        {
            let mut s = self.state.lock();
            if s.reject_pause {
                return Err(ResourceError::Rejected("pause failed".into()));
            }
            if !s.playing {
                return Ok(());
            }
            s.base = s.position();
            s.playing = false;
            s.anchored_at = None;
        }
        self.listeners.emit(self.id, &ResourceEvent::Paused);
        Ok(())
    }

    fn seek(&self, position: f64) -> Result<(), ResourceError> {
        let mut s = self.state.lock();
        let position = position.max(0.0);
        s.base = match s.duration {
            Some(d) => position.min(d),
            None => position,
        };
        if s.playing {
            s.anchored_at = Some(Instant::now());
        }
        Ok(())
    }

    fn set_volume(&self, volume: u8) {
        self.state.lock().volume = volume.min(100);
    }

    fn is_playing(&self) -> bool {
        let s = self.state.lock();
        s.playing && !s.ended()
    }

    fn is_ended(&self) -> bool {
        self.state.lock().ended()
    }

    fn position(&self) -> f64 {
        self.state.lock().position()
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready
    }

    fn subscribe(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.remove(id)
    }

    fn release(&self) {
        let mut s = self.state.lock();
        s.base = s.position();
        s.playing = false;
        s.anchored_at = None;
        s.released = true;
    }
}

/// Factory producing [`SimulatedResource`]s. Keeps every resource it made.
pub struct SimulatedFactory {
    ready: ReadyState,
    duration: Option<f64>,
    created: Mutex<Vec<Arc<SimulatedResource>>>,
    unavailable: Mutex<HashSet<String>>,
}

impl SimulatedFactory {
    /// Resources start fully buffered.
    pub fn new() -> Self {
        Self {
            ready: ReadyState::EnoughData,
            duration: None,
            created: Mutex::new(Vec::new()),
            unavailable: Mutex::new(HashSet::new()),
        }
    }

    /// Resources start with metadata only and must be advanced by the caller.
    pub fn buffering() -> Self {
        Self {
            ready: ReadyState::Metadata,
            ..Self::new()
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Fail every future `create` for `source`.
    pub fn mark_unavailable(&self, source: &str) {
        self.unavailable.lock().insert(source.to_string());
    }

    pub fn created(&self) -> Vec<Arc<SimulatedResource>> {
        self.created.lock().clone()
    }

    pub fn created_for(&self, source: &str) -> Vec<Arc<SimulatedResource>> {
        self.created
            .lock()
            .iter()
            .filter(|r| r.source() == source)
            .cloned()
            .collect()
    }
}

impl Default for SimulatedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceFactory for SimulatedFactory {
    fn create(&self, source: &str) -> Result<Arc<dyn AudioResource>, ResourceError> {
        if self.unavailable.lock().contains(source) {
            return Err(ResourceError::Unavailable {
                source_uri: source.to_string(),
                reason: "marked unavailable".into(),
            });
        }
        let mut resource = SimulatedResource::new(source).with_ready_state(self.ready);
        if let Some(d) = self.duration {
            resource = resource.with_duration(d);
        }
        let resource = Arc::new(resource);
        self.created.lock().push(Arc::clone(&resource));
        Ok(resource)
    }
}
