//! C FFI surface for cadence.
//!
//! Pattern: opaque EngineHandle + C strings + JSON serialization.
//! Strings returned to the caller are freed with `cadence_string_free`.
//! Functions returning `i32` use 1 for success and 0 for failure unless
//! documented otherwise; the message is available from `cadence_last_error`.
//!
//! Web and mobile shells call these through their C FFI (`dart:ffi`,
//! Swift, Kotlin, Node.js).

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use cadence_core::collections::Album;
use cadence_core::effects::simulated::SimulatedFactory;
use cadence_core::resource::ResourceFactory;
use cadence_core::{Engine, EngineConfig, PlaybackCommand, Track, TrackId};
use nine_s_shell::Shell;

// ---------------------------------------------------------------------------
// Error handling (thread-local last error)
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(msg: String) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(msg));
}

fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Returns the last error message (caller frees with `cadence_string_free`).
#[no_mangle]
pub extern "C" fn cadence_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow_mut()
            .take()
            .and_then(|s| CString::new(s).ok())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut())
    })
}

/// Frees a string returned from cadence FFI.
///
/// # Safety
/// Must be a pointer returned from this FFI and not already freed.
#[no_mangle]
pub unsafe extern "C" fn cadence_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------------------------------------------------------------------------
// Opaque handle
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct EngineHandle {
    _private: [u8; 0],
}

struct EngineHandleInner {
    engine: Engine,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Sets the 9S storage root directory.
///
/// # Safety
/// `path` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn cadence_set_root(path: *const c_char) -> i32 {
    clear_error();
    match read_cstr(path) {
        Ok(p) => {
            std::env::set_var("NINE_S_ROOT", p);
            1
        }
        Err(e) => {
            set_error(e);
            0
        }
    }
}

/// Opens the player with native audio output, restores the saved session
/// and starts its loops. Returns an opaque handle, or NULL on error.
///
/// # Safety
/// `app_id` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn cadence_open(app_id: *const c_char) -> *mut EngineHandle {
    open_with(app_id, Engine::new)
}

/// Like `cadence_open`, but without audio output: every track runs on a
/// simulated clock. For hosts that render audio themselves.
///
/// # Safety
/// `app_id` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn cadence_open_headless(app_id: *const c_char) -> *mut EngineHandle {
    open_with(app_id, |shell| {
        let factory: Arc<dyn ResourceFactory> = Arc::new(SimulatedFactory::new());
        Engine::with_factory(shell, factory)
    })
}

fn open_with(app_id: *const c_char, boot: impl FnOnce(Shell) -> Engine) -> *mut EngineHandle {
    clear_error();
    let app = match read_cstr(app_id) {
        Ok(a) => a,
        Err(e) => {
            set_error(e);
            return ptr::null_mut();
        }
    };

    match Shell::open(&app, &[]) {
        Ok(shell) => {
            let engine = boot(shell);
            engine.start();
            Box::into_raw(Box::new(EngineHandleInner { engine })) as *mut EngineHandle
        }
        Err(e) => {
            set_error(e.to_string());
            ptr::null_mut()
        }
    }
}

/// Saves the session, stops the loops and releases all audio resources.
#[no_mangle]
pub extern "C" fn cadence_close(handle: *mut EngineHandle) {
    if !handle.is_null() {
        unsafe {
            let inner = Box::from_raw(handle as *mut EngineHandleInner);
            inner.engine.shutdown();
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Add a track. `json` is a Track object. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cadence_catalog_add(handle: *mut EngineHandle, json: *const c_char) -> i32 {
    clear_error();
    let (engine, track) = match engine_and_track(handle, json) {
        Ok(pair) => pair,
        Err(e) => return err_zero(e),
    };
    match engine.catalog().add(&track) {
        Ok(()) => 1,
        Err(e) => err_zero(e.to_string()),
    }
}

/// Live tracks ordered by id, as a JSON array (caller frees).
#[no_mangle]
pub extern "C" fn cadence_catalog_list(handle: *mut EngineHandle) -> *mut c_char {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => json_to_cstr(&engine.catalog().list()),
        Err(e) => err_null(e),
    }
}

/// One track as JSON, or NULL if it does not exist.
#[no_mangle]
pub extern "C" fn cadence_catalog_get(handle: *mut EngineHandle, id: u64) -> *mut c_char {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_null(e),
    };
    match engine.catalog().get(TrackId(id)) {
        Some(track) => json_to_cstr(&track),
        None => err_null(format!("track {} not found", id)),
    }
}

/// Soft-delete a track. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cadence_catalog_remove(handle: *mut EngineHandle, id: u64) -> i32 {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_zero(e),
    };
    match engine.catalog().remove(TrackId(id)) {
        Ok(()) => 1,
        Err(e) => err_zero(e.to_string()),
    }
}

/// Case-insensitive search over title, artist and album. JSON array.
#[no_mangle]
pub extern "C" fn cadence_catalog_search(
    handle: *mut EngineHandle,
    query: *const c_char,
) -> *mut c_char {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_null(e),
    };
    let q = match read_cstr(query) {
        Ok(s) => s,
        Err(e) => return err_null(e),
    };
    json_to_cstr(&engine.catalog().search(&q))
}

/// Cover art `{data, mime_type}` for a track, or NULL.
#[no_mangle]
pub extern "C" fn cadence_art(handle: *mut EngineHandle, id: u64) -> *mut c_char {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_null(e),
    };
    match engine.catalog().art(TrackId(id)) {
        Some(art) => json_to_cstr(&art),
        None => ptr::null_mut(),
    }
}

/// Import every audio file under `dir`. Returns the count, or -1 on error.
#[no_mangle]
pub extern "C" fn cadence_import_dir(handle: *mut EngineHandle, dir: *const c_char) -> i32 {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => {
            set_error(e);
            return -1;
        }
    };
    match read_cstr(dir) {
        Ok(d) => engine.import_dir(&d) as i32,
        Err(e) => {
            set_error(e);
            -1
        }
    }
}

/// Import one file. Returns the new track as JSON, or NULL when the file is
/// skipped (not audio, already cataloged) or on error.
#[no_mangle]
pub extern "C" fn cadence_import_file(handle: *mut EngineHandle, path: *const c_char) -> *mut c_char {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_null(e),
    };
    let path = match read_cstr(path) {
        Ok(s) => s,
        Err(e) => return err_null(e),
    };
    match engine.import_file(&path) {
        Ok(Some(track)) => json_to_cstr(&track),
        Ok(None) => ptr::null_mut(),
        Err(e) => err_null(e.to_string()),
    }
}

/// Duration of `source` in whole seconds, or -1 with an error message.
#[no_mangle]
pub extern "C" fn cadence_probe_duration(handle: *mut EngineHandle, source: *const c_char) -> i64 {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => {
            set_error(e);
            return -1;
        }
    };
    let source = match read_cstr(source) {
        Ok(s) => s,
        Err(e) => {
            set_error(e);
            return -1;
        }
    };
    match engine.probe_duration(&source) {
        Ok(seconds) => seconds as i64,
        Err(e) => {
            set_error(e.to_string());
            -1
        }
    }
}

// ---------------------------------------------------------------------------
// Albums
// ---------------------------------------------------------------------------

/// Albums ordered by id, as a JSON array (caller frees).
#[no_mangle]
pub extern "C" fn cadence_albums(handle: *mut EngineHandle) -> *mut c_char {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => json_to_cstr(&engine.albums().list()),
        Err(e) => err_null(e),
    }
}

/// Insert or replace an album given as JSON. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cadence_album_save(handle: *mut EngineHandle, json: *const c_char) -> i32 {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_zero(e),
    };
    let album: Album = match read_cstr(json)
        .and_then(|s| serde_json::from_str(&s).map_err(|e| format!("invalid album: {}", e)))
    {
        Ok(album) => album,
        Err(e) => return err_zero(e),
    };
    match engine.albums().save(&album) {
        Ok(()) => 1,
        Err(e) => err_zero(e.to_string()),
    }
}

/// An album's songs that are still in the catalog, as a JSON array of tracks.
#[no_mangle]
pub extern "C" fn cadence_album_tracks(handle: *mut EngineHandle, id: u64) -> *mut c_char {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => json_to_cstr(&engine.albums().tracks(id, engine.catalog())),
        Err(e) => err_null(e),
    }
}

/// Play the first playable song of an album. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cadence_play_album(handle: *mut EngineHandle, id: u64) -> i32 {
    with_engine(handle, |engine| engine.play_album(id).map_err(|e| e.to_string()))
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// Play a track given as JSON. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cadence_play(handle: *mut EngineHandle, json: *const c_char) -> i32 {
    clear_error();
    match engine_and_track(handle, json) {
        Ok((engine, track)) => {
            engine.play(track);
            1
        }
        Err(e) => err_zero(e),
    }
}

/// Play a catalog track by id. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cadence_play_id(handle: *mut EngineHandle, id: u64) -> i32 {
    with_engine(handle, |engine| engine.play_id(TrackId(id)).map_err(|e| e.to_string()))
}

#[no_mangle]
pub extern "C" fn cadence_toggle_play(handle: *mut EngineHandle) -> i32 {
    with_engine(handle, |engine| {
        engine.toggle_play();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn cadence_pause(handle: *mut EngineHandle) -> i32 {
    with_engine(handle, |engine| {
        engine.pause();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn cadence_resume(handle: *mut EngineHandle) -> i32 {
    with_engine(handle, |engine| {
        engine.resume();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn cadence_stop(handle: *mut EngineHandle) -> i32 {
    with_engine(handle, |engine| {
        engine.stop();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn cadence_next(handle: *mut EngineHandle) -> i32 {
    with_engine(handle, |engine| {
        engine.next();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn cadence_previous(handle: *mut EngineHandle) -> i32 {
    with_engine(handle, |engine| {
        engine.previous();
        Ok(())
    })
}

/// Seek to `position` seconds.
#[no_mangle]
pub extern "C" fn cadence_seek(handle: *mut EngineHandle, position: f64) -> i32 {
    with_engine(handle, |engine| {
        if !position.is_finite() {
            return Err(format!("invalid position: {}", position));
        }
        engine.seek(position);
        Ok(())
    })
}

/// Set volume, clamped to 0..=100.
#[no_mangle]
pub extern "C" fn cadence_set_volume(handle: *mut EngineHandle, volume: u32) -> i32 {
    with_engine(handle, |engine| {
        engine.set_volume(volume.min(100) as u8);
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn cadence_toggle_mute(handle: *mut EngineHandle) -> i32 {
    with_engine(handle, |engine| {
        engine.toggle_mute();
        Ok(())
    })
}

/// Returns the new shuffle state (1/0), or -1 on error.
#[no_mangle]
pub extern "C" fn cadence_toggle_shuffle(handle: *mut EngineHandle) -> i32 {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => engine.toggle_shuffle() as i32,
        Err(e) => err_minus_one(e),
    }
}

/// Returns the new repeat state (1/0), or -1 on error.
#[no_mangle]
pub extern "C" fn cadence_toggle_repeat(handle: *mut EngineHandle) -> i32 {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => engine.toggle_repeat() as i32,
        Err(e) => err_minus_one(e),
    }
}

/// Flip the current track's favorite state. Returns the new state (1/0),
/// or -1 when nothing is loaded or on error.
#[no_mangle]
pub extern "C" fn cadence_toggle_like(handle: *mut EngineHandle) -> i32 {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_minus_one(e),
    };
    match engine.toggle_like() {
        Some(liked) => liked as i32,
        None => err_minus_one("no track loaded".into()),
    }
}

/// Run one heartbeat step. For hosts that drive their own loop.
#[no_mangle]
pub extern "C" fn cadence_tick(handle: *mut EngineHandle) -> i32 {
    with_engine(handle, |engine| {
        engine.tick();
        Ok(())
    })
}

/// Queue a playback command (JSON, tagged by `action`).
/// Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cadence_command(handle: *mut EngineHandle, json: *const c_char) -> i32 {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_zero(e),
    };
    let json_str = match read_cstr(json) {
        Ok(s) => s,
        Err(e) => return err_zero(e),
    };
    let cmd: PlaybackCommand = match serde_json::from_str(&json_str) {
        Ok(v) => v,
        Err(e) => return err_zero(e.to_string()),
    };
    match engine.command(cmd) {
        Ok(_) => 1,
        Err(e) => err_zero(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Current session as JSON, `null` before any track is loaded.
#[no_mangle]
pub extern "C" fn cadence_session_state(handle: *mut EngineHandle) -> *mut c_char {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => json_to_cstr(&engine.session_state()),
        Err(e) => err_null(e),
    }
}

/// 1 if `id` is the loaded track, 0 otherwise.
#[no_mangle]
pub extern "C" fn cadence_is_current(handle: *mut EngineHandle, id: u64) -> i32 {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => engine.is_current(TrackId(id)) as i32,
        Err(e) => err_zero(e),
    }
}

/// 1 if `id` is a favorite, 0 otherwise.
#[no_mangle]
pub extern "C" fn cadence_is_liked(handle: *mut EngineHandle, id: u64) -> i32 {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => engine.is_liked(TrackId(id)) as i32,
        Err(e) => err_zero(e),
    }
}

/// Favorites as a JSON array of tracks with `addedAt`.
#[no_mangle]
pub extern "C" fn cadence_favorites(handle: *mut EngineHandle) -> *mut c_char {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => json_to_cstr(&engine.favorites().list()),
        Err(e) => err_null(e),
    }
}

/// Most recent first, at most `limit` entries with `playedAt`.
#[no_mangle]
pub extern "C" fn cadence_recently_played(handle: *mut EngineHandle, limit: u32) -> *mut c_char {
    clear_error();
    match engine_ref(handle) {
        Ok(engine) => json_to_cstr(&engine.recently_played().list(limit as usize)),
        Err(e) => err_null(e),
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Write engine settings (JSON, missing fields default). Takes effect on
/// the next open. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cadence_configure(handle: *mut EngineHandle, json: *const c_char) -> i32 {
    clear_error();
    let engine = match engine_ref(handle) {
        Ok(e) => e,
        Err(e) => return err_zero(e),
    };
    let json_str = match read_cstr(json) {
        Ok(s) => s,
        Err(e) => return err_zero(e),
    };
    let config: EngineConfig = match serde_json::from_str(&json_str) {
        Ok(c) => c,
        Err(e) => return err_zero(e.to_string()),
    };
    match engine.configure(&config) {
        Ok(()) => 1,
        Err(e) => err_zero(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Returns the FFI API version.
#[no_mangle]
pub extern "C" fn cadence_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine_ref<'a>(handle: *mut EngineHandle) -> Result<&'a Engine, String> {
    if handle.is_null() {
        return Err("null engine handle".into());
    }
    let inner = unsafe { &*(handle as *mut EngineHandleInner) };
    Ok(&inner.engine)
}

fn engine_and_track<'a>(
    handle: *mut EngineHandle,
    json: *const c_char,
) -> Result<(&'a Engine, Track), String> {
    let engine = engine_ref(handle)?;
    let json_str = read_cstr(json)?;
    let track: Track = serde_json::from_str(&json_str).map_err(|e| format!("invalid track: {}", e))?;
    Ok((engine, track))
}

/// Run `f` against the engine; 1 on success, 0 with the error recorded.
fn with_engine(handle: *mut EngineHandle, f: impl FnOnce(&Engine) -> Result<(), String>) -> i32 {
    clear_error();
    match engine_ref(handle).and_then(f) {
        Ok(()) => 1,
        Err(e) => err_zero(e),
    }
}

fn read_cstr(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("null string pointer".into());
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(String::from)
            .map_err(|_| "invalid utf-8".into())
    }
}

fn json_to_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => to_cstr(json),
        Err(e) => err_null(e.to_string()),
    }
}

fn to_cstr(s: String) -> *mut c_char {
    CString::new(s)
        .map(|c| c.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn err_null(msg: String) -> *mut c_char {
    set_error(msg);
    ptr::null_mut()
}

fn err_zero(msg: String) -> i32 {
    set_error(msg);
    0
}

fn err_minus_one(msg: String) -> i32 {
    set_error(msg);
    -1
}

// ---------------------------------------------------------------------------
// FFI Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::ffi::CString;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    /// Open a headless engine via FFI in a temp directory.
    fn ffi_engine(app: &str) -> (TempDir, *mut EngineHandle, std::sync::MutexGuard<'static, ()>) {
        let guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let root = CString::new(dir.path().to_str().unwrap()).unwrap();
        let app_c = CString::new(app).unwrap();
        unsafe {
            cadence_set_root(root.as_ptr());
            let handle = cadence_open_headless(app_c.as_ptr());
            assert!(!handle.is_null(), "cadence_open_headless returned null");
            (dir, handle, guard)
        }
    }

    fn reopen(app: &str) -> *mut EngineHandle {
        let app_c = CString::new(app).unwrap();
        let handle = unsafe { cadence_open_headless(app_c.as_ptr()) };
        assert!(!handle.is_null());
        handle
    }

    /// Read a *mut c_char into a String and free it.
    fn read_ffi_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null(), "FFI returned null string");
        let s = unsafe { CStr::from_ptr(ptr).to_str().unwrap().to_string() };
        unsafe { cadence_string_free(ptr) };
        s
    }

    fn read_json(ptr: *mut c_char) -> serde_json::Value {
        serde_json::from_str(&read_ffi_string(ptr)).unwrap()
    }

    fn last_error() -> String {
        read_ffi_string(cadence_last_error())
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn track_json(id: u64) -> CString {
        c(&format!(
            r#"{{"id":{id},"title":"Song {id}","artist":"FFI","audio":"/music/{id}.mp3","duration":180}}"#
        ))
    }

    fn seed(handle: *mut EngineHandle, count: u64) {
        for id in 1..=count {
            assert_eq!(cadence_catalog_add(handle, track_json(id).as_ptr()), 1);
        }
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[test]
    fn ffi_version() {
        assert_eq!(cadence_version(), 1);
    }

    #[test]
    fn ffi_open_close_lifecycle() {
        let (_dir, handle, _guard) = ffi_engine("ffi-lifecycle");
        cadence_close(handle);
    }

    #[test]
    fn ffi_null_handle_returns_error() {
        let ptr = cadence_session_state(ptr::null_mut());
        assert!(ptr.is_null());
        assert!(last_error().contains("null"));
        assert_eq!(cadence_pause(ptr::null_mut()), 0);
        assert_eq!(cadence_toggle_shuffle(ptr::null_mut()), -1);
    }

    // -------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------

    #[test]
    fn ffi_catalog_add_list_remove() {
        let (_dir, handle, _guard) = ffi_engine("ffi-catalog");
        seed(handle, 3);

        let list = read_json(cadence_catalog_list(handle));
        assert_eq!(list.as_array().unwrap().len(), 3);
        assert_eq!(list[0]["title"], "Song 1");

        let one = read_json(cadence_catalog_get(handle, 2));
        assert_eq!(one["audio"], "/music/2.mp3");

        assert_eq!(cadence_catalog_remove(handle, 2), 1);
        assert!(cadence_catalog_get(handle, 2).is_null());
        assert_eq!(cadence_catalog_remove(handle, 2), 0);
        assert!(last_error().contains("not found"));

        let found = read_json(cadence_catalog_search(handle, c("song 3").as_ptr()));
        assert_eq!(found.as_array().unwrap().len(), 1);
        cadence_close(handle);
    }

    #[test]
    fn ffi_rejects_malformed_track() {
        let (_dir, handle, _guard) = ffi_engine("ffi-bad-track");
        assert_eq!(cadence_catalog_add(handle, c(r#"{"title": 5}"#).as_ptr()), 0);
        assert!(last_error().contains("invalid track"));
        cadence_close(handle);
    }

    #[test]
    fn ffi_albums_save_list_and_play() {
        let (_dir, handle, _guard) = ffi_engine("ffi-albums");
        seed(handle, 3);

        let album = c(r#"{"id":1,"name":"Kho Bau","artist":"FFI","songs":[{"id":3},{"id":1}]}"#);
        assert_eq!(cadence_album_save(handle, album.as_ptr()), 1);
        assert_eq!(cadence_album_save(handle, c(r#"{"id":"x"}"#).as_ptr()), 0);
        assert!(last_error().contains("invalid album"));

        let albums = read_json(cadence_albums(handle));
        assert_eq!(albums.as_array().unwrap().len(), 1);
        assert_eq!(albums[0]["name"], "Kho Bau");

        let tracks = read_json(cadence_album_tracks(handle, 1));
        assert_eq!(tracks[0]["id"], 3);
        assert_eq!(tracks[1]["id"], 1);

        assert_eq!(cadence_play_album(handle, 1), 1);
        assert_eq!(cadence_is_current(handle, 3), 1);
        assert_eq!(cadence_play_album(handle, 9), 0);
        assert!(last_error().contains("album 9 not found"));
        cadence_close(handle);
    }

    // -------------------------------------------------------------------
    // Playback
    // -------------------------------------------------------------------

    #[test]
    fn ffi_play_and_session_state() {
        let (_dir, handle, _guard) = ffi_engine("ffi-play");
        assert_eq!(read_ffi_string(cadence_session_state(handle)), "null");

        assert_eq!(cadence_play(handle, track_json(5).as_ptr()), 1);
        let state = read_json(cadence_session_state(handle));
        assert_eq!(state["track"]["id"], 5);
        assert_eq!(state["playing"], true);
        assert_eq!(cadence_is_current(handle, 5), 1);

        assert_eq!(cadence_seek(handle, 400.0), 1);
        assert_eq!(read_json(cadence_session_state(handle))["position"], 180.0);
        assert_eq!(cadence_seek(handle, f64::NAN), 0);

        assert_eq!(cadence_toggle_play(handle), 1);
        assert_eq!(read_json(cadence_session_state(handle))["playing"], false);
        cadence_close(handle);
    }

    #[test]
    fn ffi_toggles_report_new_state() {
        let (_dir, handle, _guard) = ffi_engine("ffi-toggles");
        assert_eq!(cadence_toggle_shuffle(handle), 1);
        assert_eq!(cadence_toggle_shuffle(handle), 0);
        assert_eq!(cadence_toggle_repeat(handle), 1);
        assert_eq!(cadence_toggle_like(handle), -1);

        cadence_play(handle, track_json(1).as_ptr());
        assert_eq!(cadence_toggle_like(handle), 1);
        assert_eq!(cadence_is_liked(handle, 1), 1);
        let favorites = read_json(cadence_favorites(handle));
        assert_eq!(favorites[0]["id"], 1);
        assert!(favorites[0]["addedAt"].is_i64());
        cadence_close(handle);
    }

    #[test]
    fn ffi_volume_and_mute() {
        let (_dir, handle, _guard) = ffi_engine("ffi-volume");
        assert_eq!(cadence_set_volume(handle, 250), 1);
        assert_eq!(read_json(cadence_session_state(handle)), serde_json::Value::Null);
        cadence_play(handle, track_json(1).as_ptr());
        assert_eq!(read_json(cadence_session_state(handle))["volume"], 100);
        cadence_toggle_mute(handle);
        assert_eq!(read_json(cadence_session_state(handle))["volume"], 0);
        cadence_toggle_mute(handle);
        assert_eq!(read_json(cadence_session_state(handle))["volume"], 100);
        cadence_close(handle);
    }

    #[test]
    fn ffi_next_previous_use_catalog() {
        let (_dir, handle, _guard) = ffi_engine("ffi-next");
        seed(handle, 3);
        assert_eq!(cadence_play_id(handle, 1), 1);
        assert_eq!(cadence_previous(handle), 1);
        assert_eq!(cadence_is_current(handle, 3), 1);
        assert_eq!(cadence_next(handle), 1);
        assert_eq!(cadence_is_current(handle, 2), 1);

        assert_eq!(cadence_play_id(handle, 99), 0);
        assert!(last_error().contains("not found"));

        let recent = read_json(cadence_recently_played(handle, 2));
        assert_eq!(recent.as_array().unwrap().len(), 2);
        assert_eq!(recent[0]["id"], 2);
        cadence_close(handle);
    }

    #[test]
    fn ffi_command_is_consumed() {
        let (_dir, handle, _guard) = ffi_engine("ffi-command");
        seed(handle, 2);
        assert_eq!(cadence_command(handle, c(r#"{"action":"play_id","id":2}"#).as_ptr()), 1);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        while cadence_is_current(handle, 2) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(cadence_is_current(handle, 2), 1);

        assert_eq!(cadence_command(handle, c(r#"{"action":"dance"}"#).as_ptr()), 0);
        cadence_close(handle);
    }

    #[test]
    fn ffi_session_survives_reopen() {
        let (_dir, handle, _guard) = ffi_engine("ffi-reopen");
        cadence_play(handle, track_json(8).as_ptr());
        cadence_seek(handle, 42.0);
        cadence_toggle_repeat(handle);
        cadence_close(handle);

        let handle = reopen("ffi-reopen");
        let state = read_json(cadence_session_state(handle));
        assert_eq!(state["track"]["id"], 8);
        assert_eq!(state["position"], 42.0);
        assert_eq!(state["repeat"], true);
        assert_eq!(state["playing"], true);
        cadence_close(handle);
    }

    // -------------------------------------------------------------------
    // Effects and settings
    // -------------------------------------------------------------------

    #[test]
    fn ffi_probe_missing_file_fails() {
        let (_dir, handle, _guard) = ffi_engine("ffi-probe");
        assert_eq!(cadence_probe_duration(handle, c("/nope/missing.mp3").as_ptr()), -1);
        assert!(last_error().contains("cannot open"));
        cadence_close(handle);
    }

    #[test]
    fn ffi_import_skips_non_audio() {
        let (dir, handle, _guard) = ffi_engine("ffi-import");
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, b"not audio").unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir(&media).unwrap();
        std::fs::write(media.join("Intro.flac"), b"fake").unwrap();

        assert!(cadence_import_file(handle, c(notes.to_str().unwrap()).as_ptr()).is_null());
        assert_eq!(cadence_import_dir(handle, c(media.to_str().unwrap()).as_ptr()), 1);
        let list = read_json(cadence_catalog_list(handle));
        assert_eq!(list[0]["title"], "Intro");
        cadence_close(handle);
    }

    #[test]
    fn ffi_configure_validates() {
        let (_dir, handle, _guard) = ffi_engine("ffi-configure");
        assert_eq!(cadence_configure(handle, c(r#"{"recent_cap": 10}"#).as_ptr()), 1);
        assert_eq!(cadence_configure(handle, c(r#"{"heartbeat_ms": 0}"#).as_ptr()), 0);
        assert!(last_error().contains("invalid settings"));
        cadence_close(handle);
    }
}
