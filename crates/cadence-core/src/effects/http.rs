//! URL sources.
//!
//! Responses are wrapped in symphonia's `ReadOnlySource`, so URL streams
//! cannot seek backwards. The fetch itself is behind the `http` feature.

#[cfg(feature = "http")]
use symphonia::core::io::MediaSourceStream;

use super::probe::ProbeError;

/// Fetch `url` as a symphonia stream.
#[cfg(feature = "http")]
pub fn open_url(url: &str) -> Result<MediaSourceStream, ProbeError> {
    let response = ureq::get(url).call().map_err(|e| ProbeError::Open {
        source_uri: url.to_string(),
        reason: e.to_string(),
    })?;
    let reader = response.into_body().into_reader();
    let source = symphonia::core::io::ReadOnlySource::new(reader);
    Ok(MediaSourceStream::new(Box::new(source), Default::default()))
}

#[cfg(not(feature = "http"))]
pub fn open_url(url: &str) -> Result<symphonia::core::io::MediaSourceStream, ProbeError> {
    Err(ProbeError::HttpDisabled(url.to_string()))
}

/// Lowercased extension of the last path segment, query and fragment ignored.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

pub fn is_http_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_ignores_query_and_fragment() {
        assert_eq!(extension_from_url("https://cdn.test/a/song.MP3?sig=1#t=3"), Some("mp3".into()));
        assert_eq!(extension_from_url("https://cdn.test/a/track.flac"), Some("flac".into()));
    }

    #[test]
    fn extension_absent() {
        assert_eq!(extension_from_url("https://cdn.test/stream"), None);
        assert_eq!(extension_from_url("https://cdn.test/.hidden"), None);
    }

    #[test]
    fn http_scheme_detection() {
        assert!(is_http_url("https://cdn.test/a.mp3"));
        assert!(is_http_url("http://cdn.test/a.mp3"));
        assert!(!is_http_url("/music/a.mp3"));
        assert!(!is_http_url("a.mp3"));
    }

    #[cfg(not(feature = "http"))]
    #[test]
    fn urls_need_http_feature() {
        assert!(matches!(open_url("https://cdn.test/a.mp3"), Err(ProbeError::HttpDisabled(_))));
    }
}
