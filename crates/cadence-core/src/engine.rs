//! Cadence engine: the player facade over 9S scrolls.
//!
//! Owns the coordinator, the state store and the collections, and runs two
//! background loops: the command loop consuming `/cadence/player/command`
//! and the heartbeat. Every session mutation is published to
//! `/cadence/player/now` and saved through the store.
//!
//! The persisted session is restored exactly once per process, before the
//! first playback operation is processed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use beeclock_core::Clock;
use nine_s_core::errors::NineSResult;
use nine_s_core::scroll::Scroll;
use nine_s_shell::Shell;
use parking_lot::{Mutex, ReentrantMutex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::collections::{Albums, Catalog, Favorites, RecentlyPlayed};
use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
#[cfg(feature = "native")]
use crate::effects::audio::NativeFactory;
use crate::effects::import;
use crate::effects::probe::{self, DetectCallback, DurationDetector, ProbeError};
use crate::error::{Error, Result};
use crate::log_err;
use crate::models::{PlaybackCommand, PlaybackSession, Track, TrackId, DEFAULT_VOLUME};
use crate::paths;
use crate::resource::{AudioResource, ResourceFactory};
use crate::selection;
use crate::store::{PendingSeek, PlayerStateStore};

/// Heartbeat pulse that triggers an enforcement sweep.
const SWEEP_PULSE: &str = "sweep";

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The cadence player.
pub struct Engine {
    player: Arc<Player>,
    /// Shutdown signal for all background threads.
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// State shared with the background loops.
struct Player {
    shell: Arc<Shell>,
    config: EngineConfig,
    coordinator: Coordinator,
    store: PlayerStateStore,
    catalog: Catalog,
    albums: Albums,
    favorites: Favorites,
    recent: RecentlyPlayed,
    /// Authoritative session. Published to scroll as a side effect.
    session: Mutex<PlaybackSession>,
    /// Saved position still waiting for the restored resource.
    pending: Mutex<Option<PendingSeek>>,
    restored: Once,
    /// Held across resource activation and the session update naming it,
    /// so concurrent callers cannot interleave the two.
    op: ReentrantMutex<()>,
    rng: Mutex<StdRng>,
}

impl Engine {
    /// Boot the engine with native (cpal) audio output.
    #[cfg(feature = "native")]
    pub fn new(shell: Shell) -> Self {
        Self::with_factory(shell, Arc::new(NativeFactory::new()))
    }

    /// Boot the engine with a custom resource factory.
    ///
    /// `SimulatedFactory` gives a headless player with no audio output.
    pub fn with_factory(shell: Shell, factory: Arc<dyn ResourceFactory>) -> Self {
        let shell = Arc::new(shell);
        let config = EngineConfig::load(&shell);
        let coordinator = Coordinator::new(factory);
        let store = PlayerStateStore::new(
            Arc::clone(&shell),
            Duration::from_millis(config.save_throttle_ms),
        );

        let mut session = PlaybackSession::default();
        if let Some(volume) = store.load_volume() {
            session.volume = volume;
        }
        // Start buffering the saved track before anything else runs.
        store.preload(&coordinator);

        let player = Player {
            catalog: Catalog::new(Arc::clone(&shell)),
            albums: Albums::new(Arc::clone(&shell)),
            favorites: Favorites::new(Arc::clone(&shell)),
            recent: RecentlyPlayed::new(Arc::clone(&shell)),
            shell,
            config,
            coordinator,
            store,
            session: Mutex::new(session),
            pending: Mutex::new(None),
            restored: Once::new(),
            op: ReentrantMutex::new(()),
            rng: Mutex::new(StdRng::from_entropy()),
        };

        Self {
            player: Arc::new(player),
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Restore the saved session and start the background loops.
    /// Idempotent: calling twice is a no-op.
    pub fn start(&self) {
        self.player.ensure_restored();
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        handles.push(self.start_command_loop());
        handles.push(self.start_heartbeat());
    }

    /// Stop the loops, wait for them, and release every resource.
    ///
    /// The sentinel command unblocks the command loop so it sees the
    /// shutdown flag.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        log_err(
            self.player
                .shell
                .put(paths::PLAYER_COMMAND, serde_json::json!({"action": "noop"})),
            "shutdown sentinel",
        );

        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        drop(handles);

        // An engine that never restored holds a blank session; saving it
        // would overwrite the snapshot.
        if self.player.restored.is_completed() {
            let session = self.player.session.lock().clone();
            self.player.store.save(&session);
        }
        self.player.coordinator.release_all();
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    fn start_command_loop(&self) -> JoinHandle<()> {
        let player = Arc::clone(&self.player);
        let shutdown = Arc::clone(&self.shutdown);

        // Subscribe before spawning so commands written right after
        // `start` returns are not missed.
        let rx = player.shell.on(paths::PLAYER_COMMAND);
        thread::spawn(move || {
            let rx = match rx {
                Ok(rx) => rx,
                Err(e) => {
                    log::error!("cadence: failed to watch player commands: {}", e);
                    return;
                }
            };

            for scroll in rx.iter() {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match PlaybackCommand::from_value(&scroll.data) {
                    Some(cmd) => player.handle(cmd),
                    None => log::debug!("cadence: ignoring command {}", scroll.data),
                }
            }
        })
    }

    /// Clock-driven heartbeat.
    ///
    /// Every tick syncs the session from the active resource and handles
    /// track end and resource failure. The `sweep` pulse runs the
    /// single-active enforcement.
    fn start_heartbeat(&self) -> JoinHandle<()> {
        let player = Arc::clone(&self.player);
        let shutdown = Arc::clone(&self.shutdown);

        thread::spawn(move || {
            let period = Duration::from_millis(player.config.heartbeat_ms);
            let mut clock = build_clock(&player.config);
            let mut ticks = 0u64;

            while !shutdown.load(Ordering::SeqCst) {
                thread::sleep(period);
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                ticks += 1;
                let sweep = match clock.as_mut() {
                    Some(clock) => clock.tick().pulses.iter().any(|p| p.name == SWEEP_PULSE),
                    None => ticks % player.config.sweep_every_ticks == 0,
                };
                player.tick(sweep);
            }
        })
    }

    // -----------------------------------------------------------------------
    // Playback
    // -----------------------------------------------------------------------

    /// Play `track` from the start, replacing the current one.
    pub fn play(&self, track: Track) {
        self.player.play(track)
    }

    /// Play a catalog track by id.
    pub fn play_id(&self, id: TrackId) -> Result<()> {
        self.player.play_id(id)
    }

    /// Play the first song of an album that is still in the catalog.
    pub fn play_album(&self, id: u64) -> Result<()> {
        self.player.play_album(id)
    }

    pub fn toggle_play(&self) {
        self.player.toggle_play()
    }

    pub fn pause(&self) {
        self.player.pause()
    }

    pub fn resume(&self) {
        self.player.resume()
    }

    /// Pause and rewind.
    pub fn stop(&self) {
        self.player.stop()
    }

    /// Seek the current track. Clamped into the known duration.
    pub fn seek(&self, position: f64) {
        self.player.seek(position)
    }

    /// Random pick that avoids the current and the last track.
    pub fn next(&self) {
        self.player.next()
    }

    pub fn previous(&self) {
        self.player.previous()
    }

    /// Set volume (0..=100, clamped).
    pub fn set_volume(&self, volume: u8) {
        self.player.set_volume(volume)
    }

    pub fn toggle_mute(&self) {
        self.player.toggle_mute()
    }

    /// Returns the new shuffle state.
    pub fn toggle_shuffle(&self) -> bool {
        self.player.update(|s| s.shuffle = !s.shuffle).shuffle
    }

    /// Returns the new repeat state.
    pub fn toggle_repeat(&self) -> bool {
        self.player.update(|s| s.repeat = !s.repeat).repeat
    }

    /// Flip the current track's favorite state. Returns the new state, or
    /// `None` when nothing is loaded.
    pub fn toggle_like(&self) -> Option<bool> {
        self.player.toggle_like()
    }

    /// Run one heartbeat step now, sweep included. The heartbeat thread
    /// does this on its own; hosts without threads call it directly.
    pub fn tick(&self) {
        self.player.ensure_restored();
        self.player.tick(true)
    }

    /// Queue a command for the command loop.
    pub fn command(&self, cmd: PlaybackCommand) -> NineSResult<Scroll> {
        self.player.shell.put(paths::PLAYER_COMMAND, cmd.to_value())
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// Current session, `None` until a track has been loaded.
    pub fn session_state(&self) -> Option<PlaybackSession> {
        self.player.ensure_restored();
        let session = self.player.session.lock().clone();
        session.track.is_some().then_some(session)
    }

    /// Current session including settings-only state.
    pub fn session(&self) -> PlaybackSession {
        self.player.ensure_restored();
        self.player.session.lock().clone()
    }

    pub fn is_current(&self, id: TrackId) -> bool {
        self.player.ensure_restored();
        self.player.session.lock().track_id() == Some(id)
    }

    pub fn is_liked(&self, id: TrackId) -> bool {
        self.player.favorites.contains(id)
    }

    // -----------------------------------------------------------------------
    // Collaborators
    // -----------------------------------------------------------------------

    pub fn shell(&self) -> &Shell {
        &self.player.shell
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.player.coordinator
    }

    pub fn catalog(&self) -> &Catalog {
        &self.player.catalog
    }

    pub fn albums(&self) -> &Albums {
        &self.player.albums
    }

    pub fn favorites(&self) -> &Favorites {
        &self.player.favorites
    }

    pub fn recently_played(&self) -> &RecentlyPlayed {
        &self.player.recent
    }

    pub fn config(&self) -> &EngineConfig {
        &self.player.config
    }

    /// Write engine settings. Takes effect on the next boot.
    pub fn configure(&self, config: &EngineConfig) -> Result<()> {
        if !config.is_valid() {
            return Err(Error::Config("zero heartbeat, sweep or recent cap".into()));
        }
        self.player.shell.put(paths::SETTINGS_PLAYER, config.to_value())?;
        Ok(())
    }

    /// Import every audio file under `dir`. Returns how many were added.
    pub fn import_dir(&self, dir: &str) -> usize {
        let count = import::scan_directory(&self.player.catalog, dir);
        log::info!("cadence: imported {} tracks from {}", count, dir);
        count
    }

    pub fn import_file(&self, path: &str) -> Result<Option<Track>> {
        import::import_file(&self.player.catalog, path)
    }

    /// Duration of `source` in whole seconds, bounded by the probe timeout.
    pub fn probe_duration(&self, source: &str) -> std::result::Result<u32, ProbeError> {
        probe::probe_duration(
            source,
            Duration::from_millis(self.player.config.probe_timeout_ms),
        )
    }

    /// Debounced detector using the configured debounce and timeout.
    pub fn duration_detector(&self, on_result: DetectCallback) -> DurationDetector {
        DurationDetector::new(
            Duration::from_millis(self.player.config.probe_debounce_ms),
            Duration::from_millis(self.player.config.probe_timeout_ms),
            on_result,
        )
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Don't join here: the command loop only exits on its next scroll.
    }
}

// ---------------------------------------------------------------------------
// Player operations
// ---------------------------------------------------------------------------

impl Player {
    fn ensure_restored(&self) {
        self.restored.call_once(|| {
            let restored = match self.store.restore(&self.coordinator) {
                Some(restored) => restored,
                None => return,
            };
            if let Some(track) = &restored.session.track {
                log::info!(
                    "cadence: restored track {} at {:.1}s",
                    track.id,
                    restored.session.pending_seek.unwrap_or(restored.session.position)
                );
            }
            *self.pending.lock() = restored.pending;
            *self.session.lock() = restored.session.clone();
            self.publish(&restored.session);
        });
    }

    /// Mutate the session under lock, then publish and save.
    fn update(&self, f: impl FnOnce(&mut PlaybackSession)) -> PlaybackSession {
        self.ensure_restored();
        let session = {
            let mut guard = self.session.lock();
            f(&mut guard);
            guard.clone()
        };
        self.publish(&session);
        self.store.save(&session);
        session
    }

    /// Heartbeat variant of [`update`](Self::update): saves are throttled
    /// and nothing is written when the session did not change.
    fn sync(&self, f: impl FnOnce(&mut PlaybackSession)) {
        let session = {
            let mut guard = self.session.lock();
            let before = guard.clone();
            f(&mut guard);
            if *guard == before {
                return;
            }
            guard.clone()
        };
        self.publish(&session);
        self.store.save_throttled(&session);
    }

    fn publish(&self, session: &PlaybackSession) {
        match serde_json::to_value(session) {
            Ok(value) => {
                log_err(self.shell.put(paths::PLAYER_NOW, value), "publish session");
            }
            Err(e) => log::warn!("cadence: serializing session failed: {}", e),
        }
    }

    fn handle(&self, cmd: PlaybackCommand) {
        match cmd {
            PlaybackCommand::Play { track } => self.play(track),
            PlaybackCommand::PlayId { id } => {
                log_err(self.play_id(id), "play command");
            }
            PlaybackCommand::PlayAlbum { id } => {
                log_err(self.play_album(id), "play album command");
            }
            PlaybackCommand::TogglePlay => self.toggle_play(),
            PlaybackCommand::Pause => self.pause(),
            PlaybackCommand::Resume => self.resume(),
            PlaybackCommand::Stop => self.stop(),
            PlaybackCommand::Seek { position } => self.seek(position),
            PlaybackCommand::Next => self.next(),
            PlaybackCommand::Previous => self.previous(),
            PlaybackCommand::SetVolume { volume } => self.set_volume(volume),
            PlaybackCommand::ToggleMute => self.toggle_mute(),
            PlaybackCommand::ToggleShuffle => {
                self.update(|s| s.shuffle = !s.shuffle);
            }
            PlaybackCommand::ToggleRepeat => {
                self.update(|s| s.repeat = !s.repeat);
            }
            PlaybackCommand::ToggleLike => {
                self.toggle_like();
            }
        }
    }

    fn play(&self, track: Track) {
        let _op = self.op.lock();
        self.ensure_restored();
        self.pending.lock().take();
        let volume = self.session.lock().volume;
        let error = self.start(&track, volume, 0.0);

        log::info!("cadence: playing {} ({})", track.id, track.title);
        let recorded = track.clone();
        self.update(move |s| {
            *s = s.replaced_by(track);
            s.degraded = error.is_some();
            s.error = error;
        });
        log_err(
            self.recent.record(&recorded, self.config.recent_cap),
            "record recently played",
        );
    }

    fn play_id(&self, id: TrackId) -> Result<()> {
        let track = self.catalog.get(id).ok_or(Error::TrackNotFound(id))?;
        self.play(track);
        Ok(())
    }

    fn play_album(&self, id: u64) -> Result<()> {
        if self.albums.get(id).is_none() {
            return Err(Error::AlbumNotFound(id));
        }
        let track = self
            .albums
            .tracks(id, &self.catalog)
            .into_iter()
            .next()
            .ok_or(Error::EmptyAlbum(id))?;
        self.play(track);
        Ok(())
    }

    /// Create, activate and play a resource for `track`. Returns the
    /// failure that forced the simulated clock, if any.
    fn start(&self, track: &Track, volume: u8, position: f64) -> Option<String> {
        let (resource, failure) = self.coordinator.create_for_track(track);
        self.coordinator.set_active(&resource);
        resource.set_volume(volume);
        if position > 0.0 {
            log_err(resource.seek(position), "seek new resource");
        }
        match resource.play() {
            Ok(()) => failure.map(|e| e.to_string()),
            Err(e) => Some(self.degrade(track, volume, position, e.to_string())),
        }
    }

    /// Fall back to a simulated clock for `track`.
    fn degrade(&self, track: &Track, volume: u8, position: f64, reason: String) -> String {
        log::warn!(
            "cadence: playback of {} failed ({}), using simulated clock",
            track.id,
            reason
        );
        let simulated = self.coordinator.simulated_for(track);
        self.coordinator.set_active(&simulated);
        simulated.set_volume(volume);
        log_err(simulated.seek(position), "seek simulated clock");
        log_err(simulated.play(), "play simulated clock");
        reason
    }

    fn toggle_play(&self) {
        let _op = self.op.lock();
        self.ensure_restored();
        let (loaded, playing) = {
            let s = self.session.lock();
            (s.track.is_some(), s.playing)
        };
        if !loaded {
            return;
        }
        if playing {
            self.pause();
        } else {
            self.resume();
        }
    }

    fn pause(&self) {
        let _op = self.op.lock();
        self.ensure_restored();
        if let Some(resource) = self.coordinator.active() {
            log_err(resource.pause(), "pause");
        }
        self.update(|s| s.playing = false);
    }

    fn resume(&self) {
        let _op = self.op.lock();
        self.ensure_restored();
        let (track, volume, position) = {
            let s = self.session.lock();
            match &s.track {
                Some(track) => (track.clone(), s.volume, s.position),
                None => return,
            }
        };

        let error = match self.coordinator.active() {
            Some(resource) => {
                self.coordinator.set_active(&resource);
                match resource.play() {
                    Ok(()) => None,
                    Err(e) => Some(self.degrade(&track, volume, position, e.to_string())),
                }
            }
            None => self.start(&track, volume, position),
        };
        self.update(move |s| {
            s.playing = true;
            if error.is_some() {
                s.degraded = true;
                s.error = error;
            }
        });
    }

    fn stop(&self) {
        let _op = self.op.lock();
        self.ensure_restored();
        self.pending.lock().take();
        if let Some(resource) = self.coordinator.active() {
            log_err(resource.stop(), "stop");
        }
        self.update(|s| {
            s.playing = false;
            s.position = 0.0;
            s.pending_seek = None;
        });
    }

    fn seek(&self, position: f64) {
        let _op = self.op.lock();
        self.ensure_restored();
        let target = {
            let s = self.session.lock();
            if s.track.is_none() {
                return;
            }
            s.clamp_position(position)
        };
        if let Some(resource) = self.coordinator.active() {
            log_err(resource.seek(target), "seek");
        }
        self.update(|s| {
            s.position = target;
            s.pending_seek = None;
        });
    }

    fn next(&self) {
        let _op = self.op.lock();
        self.ensure_restored();
        let tracks = self.catalog.list();
        let (current, last) = {
            let s = self.session.lock();
            (s.track_id(), s.last_track_id())
        };
        let picked = {
            let mut rng = self.rng.lock();
            selection::pick_next(&tracks, current, last, &mut *rng).cloned()
        };
        match picked {
            Some(track) => self.play(track),
            None => log::info!("cadence: catalog is empty, nothing to play next"),
        }
    }

    fn previous(&self) {
        let _op = self.op.lock();
        self.ensure_restored();
        let tracks = self.catalog.list();
        let (current, shuffle) = {
            let s = self.session.lock();
            (s.track_id(), s.shuffle)
        };
        let picked = {
            let mut rng = self.rng.lock();
            selection::pick_previous(&tracks, current, shuffle, &mut *rng).cloned()
        };
        match picked {
            Some(track) => self.play(track),
            None => log::info!("cadence: catalog is empty, nothing to play"),
        }
    }

    fn set_volume(&self, volume: u8) {
        let _op = self.op.lock();
        self.ensure_restored();
        let volume = volume.min(100);
        if let Some(resource) = self.coordinator.active() {
            resource.set_volume(volume);
        }
        self.update(|s| {
            s.volume = volume;
            if volume > 0 {
                s.muted_volume = None;
            }
        });
    }

    fn toggle_mute(&self) {
        let _op = self.op.lock();
        let session = self.update(|s| {
            if s.volume > 0 {
                s.muted_volume = Some(s.volume);
                s.volume = 0;
            } else {
                s.volume = s.muted_volume.take().unwrap_or(DEFAULT_VOLUME);
            }
        });
        if let Some(resource) = self.coordinator.active() {
            resource.set_volume(session.volume);
        }
    }

    fn toggle_like(&self) -> Option<bool> {
        self.ensure_restored();
        let track = self.session.lock().track.clone()?;
        match self.favorites.toggle(&track) {
            Ok(liked) => Some(liked),
            Err(e) => {
                log::warn!("cadence: toggling favorite {} failed: {}", track.id, e);
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    fn tick(&self, sweep: bool) {
        let _op = self.op.lock();
        if sweep {
            let stopped = self.coordinator.enforce_single_active();
            if stopped > 0 {
                log::info!("cadence: sweep stopped {} stray resources", stopped);
            }
        }

        let resource = match self.coordinator.active() {
            Some(resource) => resource,
            None => return,
        };
        let (track, degraded) = {
            let s = self.session.lock();
            match &s.track {
                Some(track) => (track.clone(), s.degraded),
                None => return,
            }
        };

        if let Some(reason) = resource.error() {
            if !degraded {
                let (volume, position) = {
                    let s = self.session.lock();
                    (s.volume, s.position)
                };
                let reason = self.degrade(&track, volume, position, reason);
                self.update(move |s| {
                    s.degraded = true;
                    s.error = Some(reason);
                });
            }
            return;
        }

        if resource.is_ended() {
            self.track_ended(&resource);
            return;
        }

        self.sync_from(&*resource);
    }

    /// Copy position, duration and playing from the active resource.
    ///
    /// While a restored position is pending the session keeps its saved
    /// intent, so a slow-buffering resource is not recorded as paused at 0.
    fn sync_from(&self, resource: &dyn AudioResource) {
        let pending = self.pending.lock().clone();
        let settled = match pending {
            Some(p) if p.is_applied() => {
                self.pending.lock().take();
                true
            }
            Some(_) => false,
            None => true,
        };

        let position = resource.position();
        let duration = resource.duration();
        let playing = resource.is_playing();
        self.sync(|s| {
            if let Some(d) = duration.filter(|d| *d > 0.0) {
                s.duration = d;
            }
            if settled {
                s.pending_seek = None;
                s.position = s.clamp_position(position);
                s.playing = playing;
            }
        });
    }

    /// Repeat replays the current track; otherwise the next track in
    /// catalog order plays, wrapping at the end.
    fn track_ended(&self, resource: &Arc<dyn AudioResource>) {
        let _op = self.op.lock();
        let (current, repeat) = {
            let s = self.session.lock();
            (s.track_id(), s.repeat)
        };
        if repeat {
            log_err(resource.seek(0.0), "rewind for repeat");
            log_err(resource.play(), "repeat");
            self.update(|s| {
                s.position = 0.0;
                s.playing = true;
            });
            return;
        }

        let tracks = self.catalog.list();
        match selection::next_in_order(&tracks, current).cloned() {
            Some(track) => self.play(track),
            None => {
                self.update(|s| {
                    s.playing = false;
                    s.position = s.duration;
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Heartbeat clock with a `sweep` pulse every `sweep_every_ticks` ticks.
///
/// `None` when the clock cannot be built; the heartbeat then counts ticks
/// itself.
fn build_clock(config: &EngineConfig) -> Option<Clock> {
    let clock = Clock::builder()
        .least_significant_first()
        .partition("tick", config.sweep_every_ticks)
        .pulse_every(SWEEP_PULSE, config.sweep_every_ticks)
        .build()
        .ok();
    if clock.is_none() {
        log::warn!("cadence: heartbeat clock build failed, counting ticks");
    }
    clock
}
