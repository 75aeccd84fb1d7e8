//! Duration probing.
//!
//! `probe_duration` reads container metadata with symphonia and, when the
//! container does not state a frame count, sums packet durations. It is the
//! only operation in the crate with a timeout.
//!
//! `DurationDetector` sits behind an editable source field: it waits for the
//! input to settle, probes the final value, and reports back once.

use std::fs::File;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::http;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("audio source is empty")]
    EmptySource,
    #[error("cannot open {source_uri}: {reason}")]
    Open { source_uri: String, reason: String },
    #[error("unsupported or corrupt audio: {0}")]
    Unsupported(String),
    #[error("could not determine duration of {0}")]
    Unknown(String),
    #[error("probing {source_uri} timed out after {timeout_ms} ms")]
    Timeout { source_uri: String, timeout_ms: u64 },
    #[error("URL sources need the `http` feature: {0}")]
    HttpDisabled(String),
}

/// Stream parameters of a source's default track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub sample_rate: u32,
    pub channels: u32,
    /// Seconds, when the container states it.
    pub duration: Option<f64>,
}

/// Open `source` (path or URL) with an extension hint.
pub(crate) fn open_stream(source: &str) -> Result<(MediaSourceStream, Hint), ProbeError> {
    if source.trim().is_empty() {
        return Err(ProbeError::EmptySource);
    }
    let mut hint = Hint::new();
    if http::is_http_url(source) {
        if let Some(ext) = http::extension_from_url(source) {
            hint.with_extension(&ext);
        }
        return Ok((http::open_url(source)?, hint));
    }

    let path = Path::new(source);
    let file = File::open(path).map_err(|e| ProbeError::Open {
        source_uri: source.to_string(),
        reason: e.to_string(),
    })?;
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    Ok((MediaSourceStream::new(Box::new(file), Default::default()), hint))
}

/// Open `source` and hand back its demuxer.
pub(crate) fn open_format(source: &str) -> Result<Box<dyn FormatReader>, ProbeError> {
    let (mss, hint) = open_stream(source)?;
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| ProbeError::Unsupported(e.to_string()))?;
    Ok(probed.format)
}

/// Container-level parameters, without decoding.
pub fn probe_info(source: &str) -> Result<MediaInfo, ProbeError> {
    let format = open_format(source)?;
    let track = format
        .default_track()
        .ok_or_else(|| ProbeError::Unsupported(format!("{}: no audio track", source)))?;
    let params = &track.codec_params;
    let sample_rate = params.sample_rate.unwrap_or(44100);
    let duration = match (params.n_frames, params.time_base) {
        (Some(frames), Some(tb)) => {
            let t = tb.calc_time(frames);
            Some(t.seconds as f64 + t.frac)
        }
        (Some(frames), None) => Some(frames as f64 / sample_rate as f64),
        _ => None,
    };
    Ok(MediaInfo {
        sample_rate,
        channels: params.channels.map(|c| c.count() as u32).unwrap_or(2),
        duration,
    })
}

/// Whole seconds of `source`, reading packet timestamps if the container
/// does not say.
fn measure_duration(source: &str) -> Result<u32, ProbeError> {
    if let Some(seconds) = probe_info(source)?.duration {
        return Ok(seconds.round() as u32);
    }

    let mut format = open_format(source)?;
    let (track_id, time_base) = match format.default_track() {
        Some(track) => (track.id, track.codec_params.time_base),
        None => return Err(ProbeError::Unknown(source.to_string())),
    };
    let time_base = time_base.ok_or_else(|| ProbeError::Unknown(source.to_string()))?;

    let mut end_ts = 0u64;
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() == track_id {
            end_ts = end_ts.max(packet.ts() + packet.dur());
        }
    }
    if end_ts == 0 {
        return Err(ProbeError::Unknown(source.to_string()));
    }
    let t = time_base.calc_time(end_ts);
    Ok((t.seconds as f64 + t.frac).round() as u32)
}

/// Duration of `source` in whole seconds, failing after `timeout`.
///
/// A timed-out probe thread is left to finish on its own.
pub fn probe_duration(source: &str, timeout: Duration) -> Result<u32, ProbeError> {
    let owned = source.to_string();
    run_with_timeout(source, timeout, move || measure_duration(&owned))
}

fn run_with_timeout<T: Send + 'static>(
    source: &str,
    timeout: Duration,
    work: impl FnOnce() -> Result<T, ProbeError> + Send + 'static,
) -> Result<T, ProbeError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(work());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout {
            source_uri: source.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

// ---------------------------------------------------------------------------
// Debounced detection
// ---------------------------------------------------------------------------

pub type Prober = Arc<dyn Fn(&str) -> Result<u32, ProbeError> + Send + Sync>;
pub type DetectCallback = Box<dyn Fn(&str, Result<u32, ProbeError>) + Send>;

/// Probes the last source typed into a field once input goes quiet.
///
/// Every `input` restarts the debounce window. Only the value standing at
/// the end of the window is probed. Dropping the detector stops its worker.
pub struct DurationDetector {
    tx: Sender<String>,
}

impl DurationDetector {
    pub fn new(debounce: Duration, timeout: Duration, on_result: DetectCallback) -> Self {
        Self::with_prober(
            debounce,
            timeout,
            Arc::new(|source: &str| measure_duration(source)),
            on_result,
        )
    }

    /// Use a custom prober. `timeout` still bounds each call.
    pub fn with_prober(
        debounce: Duration,
        timeout: Duration,
        prober: Prober,
        on_result: DetectCallback,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<String>();
        thread::spawn(move || {
            while let Ok(mut source) = rx.recv() {
                loop {
                    match rx.recv_timeout(debounce) {
                        Ok(newer) => source = newer,
                        Err(RecvTimeoutError::Timeout) => break,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
                let source = source.trim().to_string();
                if source.is_empty() {
                    continue;
                }
                let prober = Arc::clone(&prober);
                let owned = source.clone();
                let result = run_with_timeout(&source, timeout, move || prober(&owned));
                if let Err(e) = &result {
                    log::warn!("cadence: duration detection failed: {}", e);
                }
                on_result(&source, result);
            }
        });
        Self { tx }
    }

    /// Report the field's current value.
    pub fn input(&self, source: &str) {
        let _ = self.tx.send(source.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn missing_file_is_an_open_error() {
        let err = probe_duration("/definitely/not/here.mp3", Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, ProbeError::Open { .. }));
    }

    #[test]
    fn empty_source_is_rejected() {
        assert!(matches!(probe_info("  "), Err(ProbeError::EmptySource)));
    }

    #[test]
    fn garbage_file_is_unsupported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let err = probe_duration(path.to_str().unwrap(), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ProbeError::Unsupported(_) | ProbeError::Unknown(_)));
    }

    #[test]
    fn slow_probe_times_out() {
        let result = run_with_timeout("slow.mp3", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok::<u32, ProbeError>(1)
        });
        assert!(matches!(result, Err(ProbeError::Timeout { timeout_ms: 20, .. })));
    }

    #[test]
    fn detector_probes_only_settled_input() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let prober: Prober = Arc::new(move |source: &str| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok::<u32, ProbeError>(source.len() as u32)
        });
        let (tx, rx) = mpsc::channel();
        let detector = DurationDetector::with_prober(
            Duration::from_millis(50),
            Duration::from_secs(1),
            prober,
            Box::new(move |source, result| {
                let _ = tx.send((source.to_string(), result.ok()));
            }),
        );

        for partial in ["a", "ab", "abc.mp3"] {
            detector.input(partial);
            thread::sleep(Duration::from_millis(5));
        }

        let (source, seconds) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(source, "abc.mp3");
        assert_eq!(seconds, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detector_reports_timeout() {
        let prober: Prober = Arc::new(|_: &str| {
            thread::sleep(Duration::from_millis(300));
            Ok::<u32, ProbeError>(1)
        });
        let (tx, rx) = mpsc::channel();
        let detector = DurationDetector::with_prober(
            Duration::from_millis(10),
            Duration::from_millis(30),
            prober,
            Box::new(move |_, result| {
                let _ = tx.send(result.is_err());
            }),
        );
        detector.input("slow.mp3");
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }
}
