//! Catalog import: turn audio files on disk into catalog tracks.
//!
//! Tags come from lofty; the first embedded picture is stored base64 at
//! `/cadence/art/{id}`. Files already in the catalog (same source path) are
//! skipped, so re-scanning a directory is cheap.

use std::collections::HashSet;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use lofty::prelude::*;
use lofty::probe::Probe;

use crate::collections::Catalog;
use crate::error::Result;
use crate::models::Track;
use crate::paths;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "aac", "ogg", "wav", "opus", "aiff"];

const MAX_SCAN_DEPTH: usize = 32;

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Import one file. `Ok(None)` when it is not audio or already cataloged.
pub fn import_file(catalog: &Catalog, file_path: &str) -> Result<Option<Track>> {
    if catalog.find_by_source(file_path).is_some() {
        return Ok(None);
    }
    import_new(catalog, file_path)
}

fn import_new(catalog: &Catalog, file_path: &str) -> Result<Option<Track>> {
    let path = Path::new(file_path);
    if !path.is_file() || !is_audio_file(path) {
        return Ok(None);
    }

    let id = catalog.next_id();
    let mut track = read_tags(path, Track::new(id.0, "", file_path));

    let art = read_cover(path);
    if art.is_some() {
        track.cover = Some(paths::art_path(id.0));
    }
    catalog.add(&track)?;
    if let Some((data, mime)) = art {
        if let Err(e) = catalog.set_art(id, &data, &mime) {
            log::warn!("cadence: storing cover for {} failed: {}", file_path, e);
        }
    }
    log::debug!("cadence: imported {} as track {}", file_path, id);
    Ok(Some(track))
}

/// Import every audio file under `dir`, recursively. Returns the count.
pub fn scan_directory(catalog: &Catalog, dir: &str) -> usize {
    let mut known: HashSet<String> = catalog.list().into_iter().map(|t| t.audio).collect();
    scan(catalog, Path::new(dir), 0, &mut known)
}

fn scan(catalog: &Catalog, dir: &Path, depth: usize, known: &mut HashSet<String>) -> usize {
    if depth > MAX_SCAN_DEPTH {
        log::warn!("cadence: scan depth limit reached at {}", dir.display());
        return 0;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("cadence: cannot scan {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    let mut count = 0;
    for path in paths {
        let is_symlink = std::fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if path.is_dir() {
            if !is_symlink {
                count += scan(catalog, &path, depth + 1, known);
            }
            continue;
        }
        let Some(source) = path.to_str() else { continue };
        if known.contains(source) {
            continue;
        }
        match import_new(catalog, source) {
            Ok(Some(track)) => {
                known.insert(track.audio);
                count += 1;
            }
            Ok(None) => {}
            Err(e) => log::warn!("cadence: import of {} failed: {}", source, e),
        }
    }
    count
}

/// Fill title, artist, album and duration from tags. The file stem stands
/// in for a missing title.
fn read_tags(path: &Path, mut track: Track) -> Track {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string();

    let tagged = match Probe::open(path).and_then(|p| p.read()) {
        Ok(t) => t,
        Err(e) => {
            log::debug!("cadence: no readable tags in {}: {}", path.display(), e);
            track.title = stem;
            return track;
        }
    };

    track.duration = tagged.properties().duration().as_secs() as u32;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
    track.title = tag.and_then(|t| t.title().map(|s| s.to_string())).unwrap_or(stem);
    track.artist = tag
        .and_then(|t| t.artist().map(|s| s.to_string()))
        .unwrap_or_default();
    track.album = tag.and_then(|t| t.album().map(|s| s.to_string()));
    track
}

/// First embedded picture as (base64, mime type).
fn read_cover(path: &Path) -> Option<(String, String)> {
    let tagged = Probe::open(path).ok()?.read().ok()?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    let picture = tag.pictures().first()?;
    let mime = picture
        .mime_type()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string());
    Some((STANDARD.encode(picture.data()), mime))
}
