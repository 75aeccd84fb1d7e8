//! cadence CLI: music player powered by the cadence engine.
//!
//! Every invocation is a fresh process, so `play` and `resume` restore the
//! saved session before doing anything else. Control commands are written
//! to the command scroll and picked up by the running player.
//!
//! Commands:
//!   cadence play <file|id>      Play a file (imported on the fly) or catalog id
//!   cadence resume              Continue the saved session
//!   cadence play-album <id>     Play an album from its first song
//!   cadence pause | toggle | stop | next | prev
//!   cadence seek <seconds>      Seek the running player
//!   cadence volume <0-100>      Set volume
//!   cadence mute                Toggle mute
//!   cadence shuffle | repeat    Toggle shuffle / repeat
//!   cadence like                Toggle favorite on the current track
//!   cadence now                 Show the current session
//!   cadence import <dir>        Scan a directory into the catalog
//!   cadence list                List the catalog
//!   cadence search <query>      Search the catalog
//!   cadence remove <id>         Remove a track from the catalog
//!   cadence albums              List albums
//!   cadence album <id>          Show an album's tracks
//!   cadence favorites           List favorites
//!   cadence recent [limit]      Recently played
//!   cadence probe <source>      Detect a source's duration

use std::sync::Arc;
use std::time::Duration;

use cadence_core::collections::{Albums, Catalog, Favorites, RecentlyPlayed};
use cadence_core::effects::{import, probe};
use cadence_core::{paths, Engine, EngineConfig, PlaybackCommand, PlaybackSession, Track, TrackId};
use nine_s_shell::Shell;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return;
    }

    // 9S root defaults to ~/.cadence
    if std::env::var("NINE_S_ROOT").is_err() {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        let root = format!("{}/.cadence", home);
        std::fs::create_dir_all(&root).ok();
        std::env::set_var("NINE_S_ROOT", &root);
    }

    let shell = match Shell::open("cadence", &[]) {
        Ok(shell) => shell,
        Err(e) => {
            eprintln!("failed to open 9S shell: {}", e);
            std::process::exit(1);
        }
    };

    let rest = &args[1..];
    log::debug!("cadence: {} {:?}", args[0], rest);
    match args[0].as_str() {
        "play" => cmd_play(shell, rest),
        "resume" => cmd_resume(shell),
        "play-album" => cmd_play_album(shell, rest),
        "pause" => send(&shell, PlaybackCommand::Pause),
        "toggle" => send(&shell, PlaybackCommand::TogglePlay),
        "stop" => send(&shell, PlaybackCommand::Stop),
        "next" => send(&shell, PlaybackCommand::Next),
        "prev" => send(&shell, PlaybackCommand::Previous),
        "seek" => cmd_seek(&shell, rest),
        "volume" => cmd_volume(&shell, rest),
        "mute" => send(&shell, PlaybackCommand::ToggleMute),
        "shuffle" => send(&shell, PlaybackCommand::ToggleShuffle),
        "repeat" => send(&shell, PlaybackCommand::ToggleRepeat),
        "like" => send(&shell, PlaybackCommand::ToggleLike),
        "now" => cmd_now(&shell),
        "import" => cmd_import(shell, rest),
        "list" => cmd_list(shell),
        "search" => cmd_search(shell, rest),
        "remove" => cmd_remove(shell, rest),
        "albums" => cmd_albums(shell),
        "album" => cmd_album(shell, rest),
        "favorites" => cmd_favorites(shell),
        "recent" => cmd_recent(shell, rest),
        "probe" => cmd_probe(&shell, rest),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
        }
    }
}

// ---------------------------------------------------------------------------
// Player commands
// ---------------------------------------------------------------------------

fn cmd_play(shell: Shell, args: &[String]) {
    if args.is_empty() {
        eprintln!("usage: cadence play <file|id>");
        return;
    }
    let engine = Engine::new(shell);
    engine.start();

    let target = &args[0];
    let track = match target.parse::<u64>() {
        Ok(id) => engine.catalog().get(TrackId(id)),
        Err(_) => track_for_file(&engine, target),
    };
    match track {
        Some(track) => {
            engine.play(track);
            show_progress(&engine);
        }
        None => eprintln!("nothing to play for: {}", target),
    }
    engine.shutdown();
}

fn cmd_resume(shell: Shell) {
    let engine = Engine::new(shell);
    engine.start();
    if engine.session_state().is_none() {
        println!("no saved session");
    } else {
        engine.resume();
        show_progress(&engine);
    }
    engine.shutdown();
}

fn cmd_play_album(shell: Shell, args: &[String]) {
    let id = match args.first().and_then(|s| s.parse::<u64>().ok()) {
        Some(id) => id,
        None => {
            eprintln!("usage: cadence play-album <id>");
            return;
        }
    };
    let engine = Engine::new(shell);
    engine.start();
    match engine.play_album(id) {
        Ok(()) => show_progress(&engine),
        Err(e) => eprintln!("{}", e),
    }
    engine.shutdown();
}

/// Catalog track for `file`, importing it first if needed.
fn track_for_file(engine: &Engine, file: &str) -> Option<Track> {
    let abs = std::fs::canonicalize(file).ok()?;
    let source = abs.to_string_lossy();
    if let Some(track) = engine.catalog().find_by_source(&source) {
        return Some(track);
    }
    match engine.import_file(&source) {
        Ok(track) => track,
        Err(e) => {
            eprintln!("import failed: {}", e);
            None
        }
    }
}

/// Block printing progress until playback stops.
fn show_progress(engine: &Engine) {
    loop {
        std::thread::sleep(Duration::from_millis(250));
        let session = match engine.session_state() {
            Some(session) => session,
            None => break,
        };
        print_progress(&session);
        if !session.playing {
            break;
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// Control commands
// ---------------------------------------------------------------------------

fn send(shell: &Shell, cmd: PlaybackCommand) {
    if let Err(e) = shell.put(paths::PLAYER_COMMAND, cmd.to_value()) {
        eprintln!("command failed: {}", e);
    }
}

fn cmd_seek(shell: &Shell, args: &[String]) {
    match args.first().map(|s| s.parse::<f64>()) {
        Some(Ok(secs)) if secs.is_finite() => send(shell, PlaybackCommand::Seek { position: secs }),
        _ => eprintln!("usage: cadence seek <seconds>"),
    }
}

fn cmd_volume(shell: &Shell, args: &[String]) {
    match args.first().map(|s| s.parse::<u32>()) {
        Some(Ok(v)) => send(
            shell,
            PlaybackCommand::SetVolume {
                volume: v.min(100) as u8,
            },
        ),
        _ => eprintln!("usage: cadence volume <0-100>"),
    }
}

fn cmd_now(shell: &Shell) {
    let session = shell
        .get(paths::PLAYER_NOW)
        .ok()
        .flatten()
        .and_then(|scroll| serde_json::from_value::<PlaybackSession>(scroll.data).ok());
    let session = match session {
        Some(s) if s.track.is_some() => s,
        _ => {
            println!("nothing playing");
            return;
        }
    };
    if let Some(track) = &session.track {
        println!("{} - {}", track.title, track.artist);
    }
    println!(
        "  {} / {}  {}  vol: {}%{}{}",
        fmt_time(session.position),
        fmt_time(session.duration),
        if session.playing { "playing" } else { "paused" },
        session.volume,
        if session.shuffle { "  shuffle" } else { "" },
        if session.repeat { "  repeat" } else { "" },
    );
    if let Some(error) = &session.error {
        println!("  degraded: {}", error);
    }
}

// ---------------------------------------------------------------------------
// Catalog commands
// ---------------------------------------------------------------------------

fn cmd_import(shell: Shell, args: &[String]) {
    if args.is_empty() {
        eprintln!("usage: cadence import <dir>");
        return;
    }
    let catalog = Catalog::new(Arc::new(shell));
    let imported = import::scan_directory(&catalog, &args[0]);
    println!("imported {} tracks, catalog: {} tracks", imported, catalog.list().len());
}

fn cmd_list(shell: Shell) {
    let tracks = Catalog::new(Arc::new(shell)).list();
    if tracks.is_empty() {
        println!("catalog is empty");
        return;
    }
    print_tracks(&tracks);
}

fn cmd_search(shell: Shell, args: &[String]) {
    if args.is_empty() {
        eprintln!("usage: cadence search <query>");
        return;
    }
    let results = Catalog::new(Arc::new(shell)).search(&args.join(" "));
    if results.is_empty() {
        println!("no results");
        return;
    }
    print_tracks(&results);
}

fn cmd_remove(shell: Shell, args: &[String]) {
    let id = match args.first().and_then(|s| s.parse::<u64>().ok()) {
        Some(id) => TrackId(id),
        None => {
            eprintln!("usage: cadence remove <id>");
            return;
        }
    };
    match Catalog::new(Arc::new(shell)).remove(id) {
        Ok(()) => println!("removed {}", id),
        Err(e) => eprintln!("{}", e),
    }
}

fn cmd_albums(shell: Shell) {
    let albums = Albums::new(Arc::new(shell)).list();
    if albums.is_empty() {
        println!("no albums");
        return;
    }
    for album in &albums {
        println!(
            "{:>4}  {} - {}  ({} songs)",
            album.id,
            album.name,
            if album.artist.is_empty() { "?" } else { &album.artist },
            album.songs.len(),
        );
    }
}

fn cmd_album(shell: Shell, args: &[String]) {
    let id = match args.first().and_then(|s| s.parse::<u64>().ok()) {
        Some(id) => id,
        None => {
            eprintln!("usage: cadence album <id>");
            return;
        }
    };
    let shell = Arc::new(shell);
    let albums = Albums::new(Arc::clone(&shell));
    let album = match albums.get(id) {
        Some(album) => album,
        None => {
            eprintln!("album {} not found", id);
            return;
        }
    };
    println!("{}{}", album.name, album.year.map(|y| format!(" ({})", y)).unwrap_or_default());
    print_tracks(&albums.tracks(id, &Catalog::new(shell)));
}

fn cmd_favorites(shell: Shell) {
    let favorites = Favorites::new(Arc::new(shell)).list();
    if favorites.is_empty() {
        println!("no favorites");
        return;
    }
    for entry in &favorites {
        print_track(&entry.track);
    }
}

fn cmd_recent(shell: Shell, args: &[String]) {
    let limit = args.first().and_then(|s| s.parse().ok()).unwrap_or(10);
    let entries = RecentlyPlayed::new(Arc::new(shell)).list(limit);
    if entries.is_empty() {
        println!("nothing played yet");
        return;
    }
    for entry in &entries {
        print_track(&entry.track);
    }
}

fn cmd_probe(shell: &Shell, args: &[String]) {
    if args.is_empty() {
        eprintln!("usage: cadence probe <source>");
        return;
    }
    let config = EngineConfig::load(shell);
    match probe::probe_duration(&args[0], Duration::from_millis(config.probe_timeout_ms)) {
        Ok(seconds) => println!("{}", fmt_time(seconds as f64)),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_tracks(tracks: &[Track]) {
    for track in tracks {
        print_track(track);
    }
}

fn print_track(track: &Track) {
    println!(
        "{:>4}  {} - {}  ({})",
        track.id,
        track.title,
        if track.artist.is_empty() { "?" } else { &track.artist },
        fmt_time(track.duration as f64),
    );
}

fn print_progress(session: &PlaybackSession) {
    let (title, artist) = session
        .track
        .as_ref()
        .map(|t| (t.title.as_str(), t.artist.as_str()))
        .unwrap_or(("Unknown", ""));
    let bar_width = 30;
    let filled = if session.duration > 0.0 {
        ((session.position / session.duration).min(1.0) * bar_width as f64) as usize
    } else {
        0
    };
    let empty = bar_width - filled;

    print!(
        "\r  {} -- {}  [{}{}] {} / {}  vol: {}%    ",
        title,
        artist,
        "=".repeat(filled),
        " ".repeat(empty),
        fmt_time(session.position),
        fmt_time(session.duration),
        session.volume,
    );
    use std::io::Write;
    std::io::stdout().flush().ok();
}

fn fmt_time(seconds: f64) -> String {
    let secs = seconds.max(0.0) as u64;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn print_usage() {
    println!("cadence - CLI music player");
    println!();
    println!("usage: cadence <command> [args]");
    println!();
    println!("player:");
    println!("  play <file|id>         Play a file or catalog track");
    println!("  resume                 Continue the saved session");
    println!("  play-album <id>        Play an album from its first song");
    println!();
    println!("control (sent to the running player):");
    println!("  pause | toggle | stop  Pause, toggle or stop playback");
    println!("  next | prev            Next / previous track");
    println!("  seek <seconds>         Seek to position");
    println!("  volume <0-100>         Set volume");
    println!("  mute                   Toggle mute");
    println!("  shuffle | repeat       Toggle shuffle / repeat");
    println!("  like                   Toggle favorite on the current track");
    println!();
    println!("catalog:");
    println!("  now                    Show the current session");
    println!("  import <dir>           Scan a directory into the catalog");
    println!("  list                   List the catalog");
    println!("  search <query>         Search the catalog");
    println!("  remove <id>            Remove a track");
    println!("  albums                 List albums");
    println!("  album <id>             Show an album's tracks");
    println!("  favorites              List favorites");
    println!("  recent [limit]         Recently played");
    println!("  probe <source>         Detect a source's duration");
}
