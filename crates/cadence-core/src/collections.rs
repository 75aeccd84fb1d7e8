//! Durable collections: the catalog, albums, favorites and recently-played.
//!
//! Each is read-modify-write against the whole scroll, last writer wins.
//! Malformed data reads as empty.

use std::sync::Arc;

use nine_s_shell::Shell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Track, TrackId};
use crate::paths;

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn read_items<T: DeserializeOwned>(shell: &Shell, path: &str) -> Vec<T> {
    let data = match shell.get(path) {
        Ok(Some(scroll)) => scroll.data,
        Ok(None) => return Vec::new(),
        Err(e) => {
            log::warn!("cadence: reading {} failed: {}", path, e);
            return Vec::new();
        }
    };
    let items = data.get("items").cloned().unwrap_or_default();
    if items.is_null() {
        return Vec::new();
    }
    serde_json::from_value(items).unwrap_or_else(|e| {
        log::warn!("cadence: malformed collection at {}, treating as empty: {}", path, e);
        Vec::new()
    })
}

fn write_items<T: Serialize>(shell: &Shell, path: &str, items: &[T]) -> Result<()> {
    shell.put(path, serde_json::json!({ "items": items }))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Track catalog at `/cadence/catalog/{id}`. Sole owner of tracks.
#[derive(Clone)]
pub struct Catalog {
    shell: Arc<Shell>,
}

impl Catalog {
    pub fn new(shell: Arc<Shell>) -> Self {
        Self { shell }
    }

    pub fn add(&self, track: &Track) -> Result<()> {
        let value = serde_json::to_value(track).map_err(|e| Error::Storage(e.to_string()))?;
        self.shell.put(&paths::catalog_path(track.id.0), value)?;
        Ok(())
    }

    /// One past the highest id ever stored, deleted tracks included.
    pub fn next_id(&self) -> TrackId {
        let max = self
            .shell
            .all(paths::CATALOG_PREFIX)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| paths::id_from_path(p))
            .max()
            .unwrap_or(0);
        TrackId(max + 1)
    }

    pub fn get(&self, id: TrackId) -> Option<Track> {
        let scroll = self.shell.get(&paths::catalog_path(id.0)).ok()??;
        if scroll.metadata.deleted == Some(true) {
            return None;
        }
        serde_json::from_value(scroll.data).ok()
    }

    /// Live tracks ordered by id.
    pub fn list(&self) -> Vec<Track> {
        let mut tracks: Vec<Track> = self
            .shell
            .all(paths::CATALOG_PREFIX)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|path| {
                let scroll = self.shell.get(&path).ok()??;
                if scroll.metadata.deleted == Some(true) {
                    return None;
                }
                match serde_json::from_value::<Track>(scroll.data) {
                    Ok(track) => Some(track),
                    Err(e) => {
                        log::warn!("cadence: skipping malformed track at {}: {}", path, e);
                        None
                    }
                }
            })
            .collect();
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    /// Soft delete.
    pub fn remove(&self, id: TrackId) -> Result<()> {
        match self.shell.get(&paths::catalog_path(id.0))? {
            Some(mut scroll) if scroll.metadata.deleted != Some(true) => {
                scroll.metadata.deleted = Some(true);
                self.shell.put_scroll(scroll)?;
                Ok(())
            }
            _ => Err(Error::TrackNotFound(id)),
        }
    }

    /// Case-insensitive substring match over title, artist and album.
    pub fn search(&self, query: &str) -> Vec<Track> {
        let q = query.to_lowercase();
        self.list()
            .into_iter()
            .filter(|t| {
                [Some(&t.title), Some(&t.artist), t.album.as_ref()]
                    .iter()
                    .flatten()
                    .any(|field| field.to_lowercase().contains(&q))
            })
            .collect()
    }

    pub fn find_by_source(&self, audio: &str) -> Option<Track> {
        self.list().into_iter().find(|t| t.audio == audio)
    }

    /// Store cover art for a track at `/cadence/art/{id}`.
    pub fn set_art(&self, id: TrackId, base64: &str, mime_type: &str) -> Result<()> {
        self.shell.put(
            &paths::art_path(id.0),
            serde_json::json!({ "data": base64, "mime_type": mime_type }),
        )?;
        Ok(())
    }

    pub fn art(&self, id: TrackId) -> Option<serde_json::Value> {
        self.shell
            .get(&paths::art_path(id.0))
            .ok()
            .flatten()
            .map(|s| s.data)
    }
}

// ---------------------------------------------------------------------------
// Albums
// ---------------------------------------------------------------------------

/// Song reference inside an album. The catalog owns the track itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumSong {
    pub id: TrackId,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub artist: String,
    /// Cover image URL or path.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub songs: Vec<AlbumSong>,
}

/// Album list at `/cadence/albums`, ordered by id.
#[derive(Clone)]
pub struct Albums {
    shell: Arc<Shell>,
}

impl Albums {
    pub fn new(shell: Arc<Shell>) -> Self {
        Self { shell }
    }

    pub fn list(&self) -> Vec<Album> {
        read_items(&self.shell, paths::ALBUMS)
    }

    pub fn get(&self, id: u64) -> Option<Album> {
        self.list().into_iter().find(|a| a.id == id)
    }

    /// Insert or replace by id.
    pub fn save(&self, album: &Album) -> Result<()> {
        let mut items = self.list();
        match items.iter_mut().find(|a| a.id == album.id) {
            Some(existing) => *existing = album.clone(),
            None => items.push(album.clone()),
        }
        items.sort_by_key(|a| a.id);
        write_items(&self.shell, paths::ALBUMS, &items)
    }

    /// Returns false if no album had `id`.
    pub fn remove(&self, id: u64) -> Result<bool> {
        let mut items = self.list();
        let before = items.len();
        items.retain(|a| a.id != id);
        if items.len() == before {
            return Ok(false);
        }
        write_items(&self.shell, paths::ALBUMS, &items)?;
        Ok(true)
    }

    /// The album's songs resolved through the catalog, in album order.
    /// Songs missing from the catalog are skipped.
    pub fn tracks(&self, id: u64, catalog: &Catalog) -> Vec<Track> {
        self.get(id)
            .map(|album| album.songs.iter().filter_map(|s| catalog.get(s.id)).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Favorites
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteEntry {
    #[serde(flatten)]
    pub track: Track,
    /// Unix millis.
    #[serde(default)]
    pub added_at: i64,
}

#[derive(Clone)]
pub struct Favorites {
    shell: Arc<Shell>,
}

impl Favorites {
    pub fn new(shell: Arc<Shell>) -> Self {
        Self { shell }
    }

    pub fn list(&self) -> Vec<FavoriteEntry> {
        read_items(&self.shell, paths::FAVORITES)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.list().iter().any(|f| f.track.id == id)
    }

    /// Append `track`. Returns false if it was already a favorite.
    pub fn add(&self, track: &Track) -> Result<bool> {
        let mut items = self.list();
        if items.iter().any(|f| f.track.id == track.id) {
            return Ok(false);
        }
        items.push(FavoriteEntry {
            track: track.clone(),
            added_at: now_ms(),
        });
        write_items(&self.shell, paths::FAVORITES, &items)?;
        Ok(true)
    }

    /// Returns false if it was not a favorite.
    pub fn remove(&self, id: TrackId) -> Result<bool> {
        let mut items = self.list();
        let before = items.len();
        items.retain(|f| f.track.id != id);
        if items.len() == before {
            return Ok(false);
        }
        write_items(&self.shell, paths::FAVORITES, &items)?;
        Ok(true)
    }

    /// Flip membership. Returns the new state.
    pub fn toggle(&self, track: &Track) -> Result<bool> {
        if self.remove(track.id)? {
            Ok(false)
        } else {
            self.add(track)
        }
    }
}

// ---------------------------------------------------------------------------
// Recently played
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEntry {
    #[serde(flatten)]
    pub track: Track,
    /// Unix millis.
    #[serde(default)]
    pub played_at: i64,
}

#[derive(Clone)]
pub struct RecentlyPlayed {
    shell: Arc<Shell>,
}

impl RecentlyPlayed {
    pub fn new(shell: Arc<Shell>) -> Self {
        Self { shell }
    }

    /// Most recent first.
    pub fn list(&self, limit: usize) -> Vec<RecentEntry> {
        let mut items: Vec<RecentEntry> = read_items(&self.shell, paths::RECENTLY_PLAYED);
        items.truncate(limit);
        items
    }

    /// Move `track` to the front, keeping at most `cap` entries.
    pub(crate) fn record(&self, track: &Track, cap: usize) -> Result<()> {
        let mut items: Vec<RecentEntry> = read_items(&self.shell, paths::RECENTLY_PLAYED);
        items.retain(|e| e.track.id != track.id);
        items.insert(
            0,
            RecentEntry {
                track: track.clone(),
                played_at: now_ms(),
            },
        );
        items.truncate(cap);
        write_items(&self.shell, paths::RECENTLY_PLAYED, &items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_shell;

    fn track(id: u64, title: &str) -> Track {
        Track::new(id, title, format!("/music/{}.mp3", id)).with_artist("Artist")
    }

    #[test]
    fn catalog_lists_in_id_order_and_hides_removed() {
        let fx = temp_shell("collections-catalog");
        let catalog = Catalog::new(fx.shell.clone());
        for (id, title) in [(3, "C"), (1, "A"), (2, "B")] {
            catalog.add(&track(id, title)).unwrap();
        }
        assert_eq!(
            catalog.list().iter().map(|t| t.id.0).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        catalog.remove(TrackId(2)).unwrap();
        assert!(catalog.get(TrackId(2)).is_none());
        assert_eq!(catalog.list().len(), 2);
        assert_eq!(catalog.next_id(), TrackId(4));
        assert!(matches!(catalog.remove(TrackId(2)), Err(Error::TrackNotFound(_))));
    }

    #[test]
    fn catalog_search_and_source_lookup() {
        let fx = temp_shell("collections-search");
        let catalog = Catalog::new(fx.shell.clone());
        let mut t = track(1, "Midnight City");
        t.album = Some("Hurry Up".into());
        catalog.add(&t).unwrap();
        catalog.add(&track(2, "Daylight")).unwrap();

        assert_eq!(catalog.search("MIDNIGHT").len(), 1);
        assert_eq!(catalog.search("hurry").len(), 1);
        assert_eq!(catalog.search("artist").len(), 2);
        assert_eq!(catalog.find_by_source("/music/2.mp3").unwrap().id, TrackId(2));
    }

    #[test]
    fn favorites_add_is_idempotent() {
        let fx = temp_shell("collections-favorites");
        let favorites = Favorites::new(fx.shell.clone());
        let t = track(5, "Fav");

        assert!(favorites.add(&t).unwrap());
        assert!(!favorites.add(&t).unwrap());
        assert_eq!(favorites.list().len(), 1);
        assert!(favorites.list()[0].added_at > 0);
        assert!(favorites.contains(TrackId(5)));

        assert!(!favorites.toggle(&t).unwrap());
        assert!(!favorites.contains(TrackId(5)));
        assert!(favorites.toggle(&t).unwrap());
    }

    #[test]
    fn favorites_store_flattened_tracks() {
        let fx = temp_shell("collections-favorites-shape");
        let favorites = Favorites::new(fx.shell.clone());
        favorites.add(&track(5, "Fav")).unwrap();
        let data = fx.shell.get(paths::FAVORITES).unwrap().unwrap().data;
        assert_eq!(data["items"][0]["id"], 5);
        assert_eq!(data["items"][0]["title"], "Fav");
        assert!(data["items"][0]["addedAt"].is_i64());
    }

    #[test]
    fn recently_played_dedupes_and_caps() {
        let fx = temp_shell("collections-recent");
        let recent = RecentlyPlayed::new(fx.shell.clone());
        for id in 1..=5 {
            recent.record(&track(id, "t"), 3).unwrap();
        }
        recent.record(&track(4, "t"), 3).unwrap();

        let ids: Vec<u64> = recent.list(10).iter().map(|e| e.track.id.0).collect();
        assert_eq!(ids, vec![4, 5, 3]);
        assert_eq!(recent.list(1).len(), 1);
    }

    #[test]
    fn malformed_collection_reads_empty() {
        let fx = temp_shell("collections-malformed");
        fx.shell
            .put(paths::FAVORITES, serde_json::json!({"items": "nope"}))
            .unwrap();
        let favorites = Favorites::new(fx.shell.clone());
        assert!(favorites.list().is_empty());
        assert!(favorites.add(&track(1, "t")).unwrap());
    }

    #[test]
    fn albums_resolve_songs_through_catalog() {
        let fx = temp_shell("collections-albums");
        let catalog = Catalog::new(fx.shell.clone());
        catalog.add(&track(1, "One")).unwrap();
        catalog.add(&track(5, "Five")).unwrap();

        let albums = Albums::new(fx.shell.clone());
        let album = Album {
            id: 2,
            name: "Singles".into(),
            artist: "Artist".into(),
            image: None,
            year: Some(2025),
            description: None,
            songs: [5, 9, 1]
                .iter()
                .map(|&id| AlbumSong {
                    id: TrackId(id),
                    name: String::new(),
                })
                .collect(),
        };
        albums.save(&album).unwrap();

        let ids: Vec<u64> = albums.tracks(2, &catalog).iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![5, 1]);
        assert!(albums.tracks(7, &catalog).is_empty());
    }

    #[test]
    fn album_save_replaces_by_id_and_remove_reports_absence() {
        let fx = temp_shell("collections-albums-upsert");
        let albums = Albums::new(fx.shell.clone());
        let mut album: Album = serde_json::from_value(serde_json::json!({
            "id": 3,
            "name": "Kho Bau",
            "songs": [{ "id": 2, "name": "Kho Bau" }]
        }))
        .unwrap();
        albums.save(&album).unwrap();
        album.name = "Kho Bau (Deluxe)".into();
        albums.save(&album).unwrap();

        assert_eq!(albums.list().len(), 1);
        assert_eq!(albums.get(3).unwrap().name, "Kho Bau (Deluxe)");
        assert!(albums.remove(3).unwrap());
        assert!(!albums.remove(3).unwrap());
        assert!(albums.list().is_empty());
    }

    #[test]
    fn malformed_albums_read_as_empty() {
        let fx = temp_shell("collections-albums-garbage");
        fx.shell
            .put(paths::ALBUMS, serde_json::json!({ "items": "nope" }))
            .unwrap();
        assert!(Albums::new(fx.shell.clone()).list().is_empty());
    }
}
