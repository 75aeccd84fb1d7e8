//! Cadence path conventions over 9S.
//!
//! Every durable key the player reads or writes lives here. Collaborators
//! agree on these paths instead of on function calls.

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// Durable snapshot of the playback session, restored on the next start.
pub const PLAYER_SESSION: &str = "/cadence/player/session";

/// Standalone volume, the fallback when no session snapshot exists.
pub const PLAYER_VOLUME: &str = "/cadence/player/volume";

/// Live session, rewritten on every mutation. Subscribers watch this.
pub const PLAYER_NOW: &str = "/cadence/player/now";

/// Commands written by collaborators, consumed by the command loop.
pub const PLAYER_COMMAND: &str = "/cadence/player/command";

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub fn catalog_path(id: u64) -> String {
    format!("/cadence/catalog/{}", id)
}

pub const CATALOG_PREFIX: &str = "/cadence/catalog";

pub fn art_path(id: u64) -> String {
    format!("/cadence/art/{}", id)
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

pub const FAVORITES: &str = "/cadence/favorites";
pub const RECENTLY_PLAYED: &str = "/cadence/recently-played";
pub const ALBUMS: &str = "/cadence/albums";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

pub const SETTINGS_PLAYER: &str = "/cadence/settings/player";

// ---------------------------------------------------------------------------
// Watch patterns
// ---------------------------------------------------------------------------

pub const WATCH_PLAYER: &str = "/cadence/player/now";
pub const WATCH_CATALOG: &str = "/cadence/catalog/**";
pub const WATCH_FAVORITES: &str = "/cadence/favorites";
pub const WATCH_ALL: &str = "/cadence/**";

/// Extract the numeric id from a catalog path.
///
/// `"/cadence/catalog/42"` → `Some(42)`
pub fn id_from_path(path: &str) -> Option<u64> {
    path.rsplit('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_path_roundtrips_id() {
        assert_eq!(catalog_path(7), "/cadence/catalog/7");
        assert_eq!(id_from_path(&catalog_path(7)), Some(7));
    }

    #[test]
    fn id_from_path_rejects_non_numeric() {
        assert_eq!(id_from_path("/cadence/catalog/abc"), None);
        assert_eq!(id_from_path(""), None);
    }
}
