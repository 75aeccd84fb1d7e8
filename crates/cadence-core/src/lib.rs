//! cadence-core: music player core over 9S scrolls.
//!
//! All durable state is scrolls. Effects are the only code that touches
//! devices.
//!
//! # Architecture
//!
//! ```text
//! Layer 0: 9S Substrate (paths, scrolls, persistence)
//! Layer 1: Effects (native audio, simulated clock, probe, import)
//! Layer 2: Coordinator + state store (one active resource, restore)
//! Layer 3: Engine (session, heartbeat, commands) and its agents (CLI, FFI)
//! ```

pub mod collections;
pub mod config;
pub mod coordinator;
pub mod effects;
pub mod engine;
pub mod error;
pub mod models;
pub mod paths;
pub mod resource;
pub mod selection;
pub mod store;

pub use config::EngineConfig;
pub use coordinator::Coordinator;
pub use engine::Engine;
pub use error::{Error, Result};
pub use models::*;
pub use store::PlayerStateStore;

/// Log errors from fallible side effects without panicking.
pub(crate) fn log_err<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!("cadence: {} failed: {}", context, e);
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::simulated::{SimulatedFactory, SimulatedResource};
    use crate::resource::{AudioResource, Discovery};
    use crate::test_support::temp_root;
    use nine_s_shell::Shell;
    use std::sync::{Arc, MutexGuard};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct Fixture {
        engine: Engine,
        factory: Arc<SimulatedFactory>,
        app: String,
        _dir: TempDir,
        _guard: MutexGuard<'static, ()>,
    }

    impl Fixture {
        /// Drop the engine and boot a new one on the same storage, as a
        /// fresh process would.
        fn restart(self, factory: SimulatedFactory) -> Fixture {
            let Fixture {
                engine,
                app,
                _dir,
                _guard,
                ..
            } = self;
            engine.shutdown();
            drop(engine);
            let factory = Arc::new(factory);
            let shell = Shell::open(&app, &[]).expect("shell");
            Fixture {
                engine: Engine::with_factory(shell, factory.clone()),
                factory,
                app,
                _dir,
                _guard,
            }
        }
    }

    fn temp_engine(app: &str) -> Fixture {
        temp_engine_with(app, SimulatedFactory::new())
    }

    fn temp_engine_with(app: &str, factory: SimulatedFactory) -> Fixture {
        let (dir, guard) = temp_root();
        let shell = Shell::open(app, &[]).expect("shell");
        let factory = Arc::new(factory);
        Fixture {
            engine: Engine::with_factory(shell, factory.clone()),
            factory,
            app: app.to_string(),
            _dir: dir,
            _guard: guard,
        }
    }

    fn track(id: u64) -> Track {
        Track::new(id, format!("Song {}", id), format!("/music/{}.mp3", id)).with_duration(200)
    }

    fn seed_catalog(engine: &Engine, count: u64) {
        for id in 1..=count {
            engine.catalog().add(&track(id)).unwrap();
        }
    }

    fn playing_count(fx: &Fixture) -> usize {
        fx.factory.created().iter().filter(|r| r.is_playing()).count()
    }

    fn current(engine: &Engine) -> Option<u64> {
        engine.session_state().and_then(|s| s.track_id()).map(|id| id.0)
    }

    #[test]
    fn fresh_engine_has_no_session() {
        let fx = temp_engine("test-fresh");
        assert!(fx.engine.session_state().is_none());
        let session = fx.engine.session();
        assert_eq!(session.volume, DEFAULT_VOLUME);
        assert!(!session.playing);
    }

    #[test]
    fn play_publishes_and_persists() {
        let fx = temp_engine("test-play");
        let rx = fx.engine.shell().on(paths::WATCH_PLAYER).unwrap();

        fx.engine.play(track(1));

        let scroll = rx.recv().unwrap();
        assert_eq!(scroll.data["track"]["id"], 1);
        assert_eq!(scroll.data["playing"], true);

        let saved = fx.engine.shell().get(paths::PLAYER_SESSION).unwrap().unwrap();
        assert_eq!(saved.data["trackRef"]["title"], "Song 1");
        assert!(fx.engine.is_current(TrackId(1)));
        assert_eq!(fx.engine.recently_played().list(10)[0].track.id, TrackId(1));
    }

    #[test]
    fn rapid_switching_leaves_one_playing() {
        let fx = temp_engine("test-rapid");
        for id in 1..=5 {
            fx.engine.play(track(id));
        }
        assert_eq!(playing_count(&fx), 1);
        assert_eq!(current(&fx.engine), Some(5));
        let active = fx.engine.coordinator().active().unwrap();
        assert_eq!(active.source(), "/music/5.mp3");
        assert!(active.is_playing());
    }

    #[test]
    fn stray_resource_is_stopped_by_sweep() {
        let fx = temp_engine("test-sweep");
        fx.engine.play(track(1));

        let stray = Arc::new(SimulatedResource::new("embed://video"));
        let shared: Arc<dyn AudioResource> = stray.clone();
        let discovery: Arc<dyn Discovery> = Arc::new(move || vec![Arc::clone(&shared)]);
        fx.engine.coordinator().add_discovery(discovery);

        stray.play().unwrap();
        assert!(stray.is_playing());
        fx.engine.tick();
        assert!(!stray.is_playing());
        assert!(fx.engine.coordinator().active().unwrap().is_playing());
    }

    #[test]
    fn session_survives_restart() {
        let fx = temp_engine("test-restart");
        fx.engine.play(track(7));
        fx.engine.seek(30.0);
        fx.engine.set_volume(35);
        fx.engine.toggle_repeat();

        let fx = fx.restart(SimulatedFactory::new());
        let s = fx.engine.session_state().unwrap();
        assert_eq!(s.track_id(), Some(TrackId(7)));
        assert_eq!(s.position, 30.0);
        assert_eq!(s.volume, 35);
        assert!(s.playing && s.repeat);

        // The boot-time preload was adopted, not duplicated.
        let created = fx.factory.created_for("/music/7.mp3");
        assert_eq!(created.len(), 1);
        assert!(created[0].is_playing());
        assert!(created[0].position() >= 30.0);
    }

    #[test]
    fn paused_session_restores_paused() {
        let fx = temp_engine("test-restart-paused");
        fx.engine.play(track(2));
        fx.engine.seek(12.0);
        fx.engine.pause();

        let fx = fx.restart(SimulatedFactory::new());
        let s = fx.engine.session_state().unwrap();
        assert!(!s.playing);
        assert_eq!(s.position, 12.0);
        assert_eq!(playing_count(&fx), 0);
    }

    #[test]
    fn restore_waits_for_buffering() {
        let fx = temp_engine("test-restart-buffering");
        fx.engine.play(track(3));
        fx.engine.seek(50.0);

        let fx = fx.restart(SimulatedFactory::buffering());
        let s = fx.engine.session_state().unwrap();
        assert_eq!(s.position, 0.0);
        assert_eq!(s.pending_seek, Some(50.0));

        // Heartbeat must not record the buffering resource as paused.
        fx.engine.tick();
        assert!(fx.engine.session_state().unwrap().playing);

        let sim = &fx.factory.created_for("/music/3.mp3")[0];
        sim.set_ready_state(crate::resource::ReadyState::EnoughData);
        fx.engine.tick();
        let s = fx.engine.session_state().unwrap();
        assert!(s.pending_seek.is_none());
        assert!(s.position >= 50.0);
        assert!(s.playing);
    }

    #[test]
    fn volume_survives_restart_without_track() {
        let fx = temp_engine("test-volume-only");
        fx.engine.set_volume(20);
        let fx = fx.restart(SimulatedFactory::new());
        assert!(fx.engine.session_state().is_none());
        assert_eq!(fx.engine.session().volume, 20);
    }

    #[test]
    fn garbage_snapshot_boots_empty() {
        let fx = temp_engine("test-garbage");
        fx.engine
            .shell()
            .put(paths::PLAYER_SESSION, serde_json::json!("not an object"))
            .unwrap();
        let fx = fx.restart(SimulatedFactory::new());
        assert!(fx.engine.session_state().is_none());
        assert!(fx.factory.created().is_empty());
    }

    #[test]
    fn next_avoids_current_and_last() {
        let fx = temp_engine("test-next");
        seed_catalog(&fx.engine, 3);
        fx.engine.play(track(1));
        fx.engine.play(track(2));
        for _ in 0..10 {
            let before = fx.engine.session_state().unwrap();
            fx.engine.next();
            let picked = current(&fx.engine).map(TrackId);
            assert_ne!(picked, before.track_id());
            assert_ne!(picked, before.last_track_id());
        }
    }

    #[test]
    fn next_with_two_tracks_alternates() {
        let fx = temp_engine("test-next-two");
        seed_catalog(&fx.engine, 2);
        fx.engine.play(track(1));
        fx.engine.play(track(2));
        fx.engine.next();
        assert_eq!(current(&fx.engine), Some(1));
        fx.engine.next();
        assert_eq!(current(&fx.engine), Some(2));
    }

    #[test]
    fn next_on_single_track_replays_it() {
        let fx = temp_engine("test-next-one");
        seed_catalog(&fx.engine, 1);
        fx.engine.play(track(1));
        fx.engine.next();
        assert_eq!(current(&fx.engine), Some(1));
    }

    #[test]
    fn previous_wraps_in_catalog_order() {
        let fx = temp_engine("test-previous");
        seed_catalog(&fx.engine, 3);
        fx.engine.play(track(1));
        fx.engine.previous();
        assert_eq!(current(&fx.engine), Some(3));
        fx.engine.previous();
        assert_eq!(current(&fx.engine), Some(2));
    }

    #[test]
    fn track_end_advances_in_order() {
        let fx = temp_engine_with("test-end", SimulatedFactory::new().with_duration(0.05));
        seed_catalog(&fx.engine, 3);
        fx.engine.play(track(3));
        std::thread::sleep(Duration::from_millis(120));
        fx.engine.tick();
        assert_eq!(current(&fx.engine), Some(1));
    }

    #[test]
    fn track_end_with_repeat_replays() {
        let fx = temp_engine_with("test-end-repeat", SimulatedFactory::new().with_duration(0.05));
        seed_catalog(&fx.engine, 3);
        fx.engine.play(track(2));
        assert!(fx.engine.toggle_repeat());
        std::thread::sleep(Duration::from_millis(120));
        fx.engine.tick();

        let s = fx.engine.session_state().unwrap();
        assert_eq!(s.track_id(), Some(TrackId(2)));
        assert!(s.playing);
        assert_eq!(fx.factory.created_for("/music/2.mp3").len(), 1);
    }

    #[test]
    fn stop_rewinds_and_seek_clamps() {
        let fx = temp_engine("test-stop-seek");
        fx.engine.play(track(1));
        fx.engine.seek(900.0);
        assert_eq!(fx.engine.session_state().unwrap().position, 200.0);

        fx.engine.stop();
        let s = fx.engine.session_state().unwrap();
        assert!(!s.playing);
        assert_eq!(s.position, 0.0);
        assert_eq!(playing_count(&fx), 0);
    }

    #[test]
    fn toggle_play_pauses_and_resumes() {
        let fx = temp_engine("test-toggle-play");
        fx.engine.toggle_play();
        assert!(fx.engine.session_state().is_none());

        fx.engine.play(track(1));
        fx.engine.toggle_play();
        assert!(!fx.engine.session_state().unwrap().playing);
        assert_eq!(playing_count(&fx), 0);

        fx.engine.toggle_play();
        assert!(fx.engine.session_state().unwrap().playing);
        assert_eq!(playing_count(&fx), 1);
    }

    #[test]
    fn mute_remembers_volume() {
        let fx = temp_engine("test-mute");
        fx.engine.play(track(1));
        fx.engine.set_volume(40);
        fx.engine.toggle_mute();
        assert_eq!(fx.engine.session().volume, 0);
        assert_eq!(fx.factory.created_for("/music/1.mp3")[0].volume(), 0);
        fx.engine.toggle_mute();
        assert_eq!(fx.engine.session().volume, 40);

        fx.engine.set_volume(0);
        fx.engine.toggle_mute();
        assert_eq!(fx.engine.session().volume, DEFAULT_VOLUME);
    }

    #[test]
    fn like_follows_current_track() {
        let fx = temp_engine("test-like");
        assert_eq!(fx.engine.toggle_like(), None);
        fx.engine.play(track(4));
        assert_eq!(fx.engine.toggle_like(), Some(true));
        assert!(fx.engine.is_liked(TrackId(4)));
        assert_eq!(fx.engine.toggle_like(), Some(false));
        assert!(!fx.engine.is_liked(TrackId(4)));
    }

    #[test]
    fn unavailable_source_degrades_to_simulated_clock() {
        let fx = temp_engine("test-degraded");
        fx.factory.mark_unavailable("/music/1.mp3");
        fx.engine.play(track(1));

        let s = fx.engine.session_state().unwrap();
        assert!(s.degraded && s.playing);
        assert!(s.error.unwrap().contains("unavailable"));
        assert!(fx.engine.coordinator().active().unwrap().is_playing());

        fx.engine.play(track(2));
        let s = fx.engine.session_state().unwrap();
        assert!(!s.degraded && s.error.is_none());
    }

    #[test]
    fn play_id_requires_catalog_track() {
        let fx = temp_engine("test-play-id");
        seed_catalog(&fx.engine, 2);
        fx.engine.play_id(TrackId(2)).unwrap();
        assert_eq!(current(&fx.engine), Some(2));
        assert!(matches!(fx.engine.play_id(TrackId(9)), Err(Error::TrackNotFound(_))));
    }

    #[test]
    fn recently_played_is_capped_by_config() {
        let fx = temp_engine("test-recent-cap");
        fx.engine
            .configure(&EngineConfig {
                recent_cap: 2,
                ..Default::default()
            })
            .unwrap();
        let fx = fx.restart(SimulatedFactory::new());
        assert_eq!(fx.engine.config().recent_cap, 2);
        for id in 1..=4 {
            fx.engine.play(track(id));
        }
        let ids: Vec<u64> = fx
            .engine
            .recently_played()
            .list(10)
            .iter()
            .map(|e| e.track.id.0)
            .collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[test]
    fn configure_rejects_zero_periods() {
        let fx = temp_engine("test-configure");
        let bad = EngineConfig {
            heartbeat_ms: 0,
            ..Default::default()
        };
        assert!(matches!(fx.engine.configure(&bad), Err(Error::Config(_))));
    }

    #[test]
    fn command_loop_drives_playback() {
        let fx = temp_engine("test-command");
        seed_catalog(&fx.engine, 2);
        fx.engine.start();

        fx.engine.command(PlaybackCommand::PlayId { id: TrackId(2) }).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while current(&fx.engine) != Some(2) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(current(&fx.engine), Some(2));

        fx.engine.command(PlaybackCommand::Pause).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while fx.engine.session_state().unwrap().playing && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!fx.engine.session_state().unwrap().playing);

        fx.engine.shutdown();
    }

    #[test]
    fn first_volume_change_after_restart_reaches_restored_resource() {
        let fx = temp_engine("test-restart-volume");
        fx.engine.play(track(3));
        fx.engine.set_volume(30);

        let fx = fx.restart(SimulatedFactory::new());
        fx.engine.set_volume(80);

        let created = fx.factory.created_for("/music/3.mp3");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].volume(), 80);
        assert_eq!(fx.engine.session().volume, 80);
    }

    #[test]
    fn is_current_sees_restored_track() {
        let fx = temp_engine("test-restart-current");
        fx.engine.play(track(4));

        let fx = fx.restart(SimulatedFactory::new());
        assert!(fx.engine.is_current(TrackId(4)));
    }

    #[test]
    fn racing_plays_keep_session_on_active_track() {
        let fx = temp_engine("test-racing-play");
        seed_catalog(&fx.engine, 20);
        fx.engine.start();

        for round in 0..10u64 {
            let (direct, queued) = (2 * round + 1, 2 * round + 2);
            std::thread::scope(|scope| {
                scope.spawn(|| fx.engine.play(track(direct)));
                fx.engine
                    .command(PlaybackCommand::PlayId { id: TrackId(queued) })
                    .unwrap();
            });

            // The command loop records the queued play once it has run.
            let deadline = Instant::now() + Duration::from_secs(3);
            while !fx
                .engine
                .recently_played()
                .list(100)
                .iter()
                .any(|e| e.track.id == TrackId(queued))
                && Instant::now() < deadline
            {
                std::thread::sleep(Duration::from_millis(5));
            }

            let session = fx.engine.session_state().unwrap();
            let active = fx.engine.coordinator().active().unwrap();
            assert_eq!(session.track.unwrap().audio, active.source());
            assert_eq!(playing_count(&fx), 1);
        }

        fx.engine.shutdown();
    }

    #[test]
    fn play_album_starts_first_song_in_catalog() {
        let fx = temp_engine("test-album");
        seed_catalog(&fx.engine, 3);
        let album: collections::Album = serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "Mixed",
            "songs": [{ "id": 9 }, { "id": 2 }, { "id": 3 }]
        }))
        .unwrap();
        fx.engine.albums().save(&album).unwrap();
        let empty: collections::Album =
            serde_json::from_value(serde_json::json!({ "id": 2, "name": "Empty" })).unwrap();
        fx.engine.albums().save(&empty).unwrap();

        fx.engine.play_album(1).unwrap();
        assert_eq!(current(&fx.engine), Some(2));
        assert!(matches!(fx.engine.play_album(5), Err(Error::AlbumNotFound(5))));
        assert!(matches!(fx.engine.play_album(2), Err(Error::EmptyAlbum(2))));
        assert_eq!(current(&fx.engine), Some(2));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let fx = temp_engine("test-shutdown");
        fx.engine.start();
        fx.engine.start();
        fx.engine.play(track(1));
        fx.engine.shutdown();
        fx.engine.shutdown();
        assert!(fx.engine.coordinator().active().is_none());
        assert_eq!(playing_count(&fx), 0);
    }
}
