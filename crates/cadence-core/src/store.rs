//! Player state store: the session survives a process restart.
//!
//! The snapshot lives at `/cadence/player/session`, the volume on its own at
//! `/cadence/player/volume` so it can be restored even without a session.
//! Nothing here returns an error: absent or malformed state reads as "no
//! session" and failed writes are logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use nine_s_shell::Shell;
use parking_lot::Mutex;
use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::log_err;
use crate::models::{PlaybackSession, PlayerSnapshot};
use crate::paths;
use crate::resource::{AudioResource, ListenerId, ResourceEvent};

/// Outcome of a successful [`PlayerStateStore::restore`].
pub struct Restored {
    pub session: PlaybackSession,
    /// Resource adopted for the restored track, if the snapshot named one.
    pub resource: Option<Arc<dyn AudioResource>>,
    /// Set once the saved position has reached the resource.
    pub pending: Option<PendingSeek>,
}

/// Handle on a saved position waiting for the resource to become seekable.
#[derive(Clone, Debug)]
pub struct PendingSeek {
    pub position: f64,
    applied: Arc<AtomicBool>,
}

impl PendingSeek {
    pub fn is_applied(&self) -> bool {
        self.applied.load(Ordering::SeqCst)
    }
}

pub struct PlayerStateStore {
    shell: Arc<Shell>,
    throttle: Duration,
    last_save: Mutex<Option<Instant>>,
}

impl PlayerStateStore {
    pub fn new(shell: Arc<Shell>, throttle: Duration) -> Self {
        Self {
            shell,
            throttle,
            last_save: Mutex::new(None),
        }
    }

    /// Write the snapshot and the volume key.
    pub fn save(&self, session: &PlaybackSession) {
        let snapshot = PlayerSnapshot::from_session(session);
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                log_err(self.shell.put(paths::PLAYER_SESSION, value), "save player session");
            }
            Err(e) => log::warn!("cadence: serializing player session failed: {}", e),
        }
        log_err(
            self.shell.put(paths::PLAYER_VOLUME, serde_json::json!(session.volume)),
            "save volume",
        );
        *self.last_save.lock() = Some(Instant::now());
    }

    /// [`save`](Self::save), at most once per throttle window.
    pub fn save_throttled(&self, session: &PlaybackSession) -> bool {
        let due = match *self.last_save.lock() {
            Some(at) => at.elapsed() >= self.throttle,
            None => true,
        };
        if due {
            self.save(session);
        }
        due
    }

    /// Read the snapshot. Shape mismatches read as absent.
    pub fn load(&self) -> Option<PlayerSnapshot> {
        let data = match self.shell.get(paths::PLAYER_SESSION) {
            Ok(Some(scroll)) => scroll.data,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("cadence: reading player session failed: {}", e);
                return None;
            }
        };
        if !data.is_object() {
            log::warn!("cadence: player session is not an object, ignoring");
            return None;
        }
        match serde_json::from_value(data) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("cadence: malformed player session, ignoring: {}", e);
                None
            }
        }
    }

    /// Standalone volume key.
    pub fn load_volume(&self) -> Option<u8> {
        let scroll = self.shell.get(paths::PLAYER_VOLUME).ok()??;
        let volume = match &scroll.data {
            Value::Object(map) => map.get("volume")?.as_u64()?,
            other => other.as_u64()?,
        };
        Some(volume.min(100) as u8)
    }

    /// Create the resource the next restore will want, as early as possible.
    ///
    /// Only when the snapshot says it was playing. The resource is parked in
    /// the coordinator's preloaded slot, exempt from being adopted early.
    pub fn preload(&self, coordinator: &Coordinator) -> bool {
        let snapshot = match self.load() {
            Some(s) if s.playing => s,
            _ => return false,
        };
        let source = match snapshot.restorable_source() {
            Some(source) => source.to_string(),
            None => return false,
        };
        match coordinator.create_resource(&source) {
            Ok(resource) => {
                log::info!("cadence: preloaded {} as {}", source, resource.id());
                coordinator.set_preloaded(resource);
                true
            }
            Err(e) => {
                log::warn!("cadence: preload of {} failed: {}", source, e);
                false
            }
        }
    }

    /// Rebuild the session from the snapshot.
    ///
    /// Adopts the preloaded resource when it matches the saved source,
    /// otherwise creates one. Either way it goes through
    /// `Coordinator::set_active`. The saved position is applied once the
    /// resource can seek; until then `session.position` stays 0 and
    /// `session.pending_seek` holds it.
    pub fn restore(&self, coordinator: &Coordinator) -> Option<Restored> {
        let snapshot = match self.load() {
            Some(snapshot) => snapshot,
            None => {
                coordinator.discard_preloaded();
                return None;
            }
        };

        let mut session = PlaybackSession {
            volume: snapshot
                .volume()
                .or_else(|| self.load_volume())
                .unwrap_or(crate::models::DEFAULT_VOLUME),
            shuffle: snapshot.shuffle,
            repeat: snapshot.repeat,
            last_track: snapshot.last_track_ref.clone(),
            ..PlaybackSession::default()
        };

        let (track, source) = match (&snapshot.track_ref, snapshot.restorable_source()) {
            (Some(track), Some(source)) => (track.clone(), source.to_string()),
            _ => {
                coordinator.discard_preloaded();
                return Some(Restored {
                    session,
                    resource: None,
                    pending: None,
                });
            }
        };

        let resource = match coordinator.preloaded_for(&source) {
            Some(preloaded) => {
                log::info!("cadence: adopting preloaded {}", preloaded.id());
                preloaded
            }
            None => {
                coordinator.discard_preloaded();
                let (resource, failure) = coordinator.create_for_track(&track);
                if let Some(e) = failure {
                    session.degraded = true;
                    session.error = Some(e.to_string());
                }
                resource
            }
        };
        coordinator.set_active(&resource);
        resource.set_volume(session.volume);

        session.duration = if snapshot.duration > 0.0 {
            snapshot.duration
        } else {
            track.duration as f64
        };
        session.track = Some(track);
        session.playing = snapshot.playing;
        let target = session.clamp_position(snapshot.position);

        let pending = if resource.ready_state().can_seek() {
            log_err(resource.seek(target), "restore seek");
            session.position = target;
            if snapshot.playing {
                log_err(resource.play(), "restore resume");
            }
            None
        } else {
            session.pending_seek = Some(target);
            Some(seek_when_ready(coordinator, &resource, target, snapshot.playing))
        };

        Some(Restored {
            session,
            resource: Some(resource),
            pending,
        })
    }
}

/// One-shot readiness listener: seek to `position`, then resume if asked.
///
/// Skipped when another resource became active in the meantime.
fn seek_when_ready(
    coordinator: &Coordinator,
    resource: &Arc<dyn AudioResource>,
    position: f64,
    resume: bool,
) -> PendingSeek {
    let applied = Arc::new(AtomicBool::new(false));
    let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

    let weak: Weak<dyn AudioResource> = Arc::downgrade(resource);
    let coordinator = coordinator.downgrade();
    let (flag, own_slot) = (Arc::clone(&applied), Arc::clone(&slot));
    let id = resource.subscribe(Arc::new(move |rid, event| {
        let ready = matches!(event, ResourceEvent::Ready(state) if state.can_seek());
        if !ready {
            return;
        }
        let listener = match own_slot.lock().take() {
            Some(listener) => listener,
            None => return,
        };
        let resource = match weak.upgrade() {
            Some(r) => r,
            None => return,
        };
        resource.unsubscribe(listener);
        let still_active = coordinator.upgrade().map_or(false, |c| c.is_active(rid));
        if !still_active {
            log::info!("cadence: {} superseded before it was ready, skipping restore", rid);
            return;
        }
        log_err(resource.seek(position), "deferred restore seek");
        flag.store(true, Ordering::SeqCst);
        if resume {
            log_err(resource.play(), "deferred restore resume");
        }
    }));
    *slot.lock() = Some(id);

    // Readiness may have arrived between the check and the subscribe.
    if resource.ready_state().can_seek() {
        if let Some(listener) = slot.lock().take() {
            resource.unsubscribe(listener);
            log_err(resource.seek(position), "restore seek");
            applied.store(true, Ordering::SeqCst);
            if resume {
                log_err(resource.play(), "restore resume");
            }
        }
    }

    PendingSeek { position, applied }
}
