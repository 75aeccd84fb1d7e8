//! Track selection for next / previous / end-of-track.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::{Track, TrackId};

/// Random next track.
///
/// Candidates exclude the current and the last track. With nothing left,
/// only the current one is excluded; with still nothing left (a single
/// track), every track is a candidate.
pub fn pick_next<'a, R: Rng + ?Sized>(
    tracks: &'a [Track],
    current: Option<TrackId>,
    last: Option<TrackId>,
    rng: &mut R,
) -> Option<&'a Track> {
    let not_current = |t: &&Track| Some(t.id) != current;

    let mut candidates: Vec<&Track> = tracks
        .iter()
        .filter(not_current)
        .filter(|t| Some(t.id) != last)
        .collect();
    if candidates.is_empty() {
        candidates = tracks.iter().filter(not_current).collect();
    }
    if candidates.is_empty() {
        candidates = tracks.iter().collect();
    }
    candidates.choose(rng).copied()
}

/// Previous track: random under shuffle, otherwise the one before the
/// current in catalog order, wrapping to the end.
pub fn pick_previous<'a, R: Rng + ?Sized>(
    tracks: &'a [Track],
    current: Option<TrackId>,
    shuffle: bool,
    rng: &mut R,
) -> Option<&'a Track> {
    if shuffle {
        return tracks.choose(rng);
    }
    if tracks.is_empty() {
        return None;
    }
    let index = match position_of(tracks, current) {
        Some(0) | None => tracks.len() - 1,
        Some(i) => i - 1,
    };
    tracks.get(index)
}

/// Track after the current in catalog order, wrapping. Starts at the first
/// track when the current one is not in the catalog.
pub fn next_in_order(tracks: &[Track], current: Option<TrackId>) -> Option<&Track> {
    if tracks.is_empty() {
        return None;
    }
    let index = match position_of(tracks, current) {
        Some(i) => (i + 1) % tracks.len(),
        None => 0,
    };
    tracks.get(index)
}

fn position_of(tracks: &[Track], id: Option<TrackId>) -> Option<usize> {
    let id = id?;
    tracks.iter().position(|t| t.id == id)
}
