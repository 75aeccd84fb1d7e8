//! Native audio resources: symphonia decode, cpal output.
//!
//! Each [`NativeResource`] owns a decoder thread, started at creation so the
//! source buffers ahead of playback, and an output thread holding the cpal
//! stream, started on the first `play`. Samples travel through a bounded
//! ring. Position counts frames the device has consumed, not frames decoded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::{SeekMode, SeekTo};
use symphonia::core::units::Time;

use super::probe::{self, MediaInfo};
use crate::resource::{
    AudioResource, Listener, ListenerId, Listeners, ReadyState, ResourceError, ResourceEvent,
    ResourceFactory, ResourceId,
};

/// Seconds of audio the ring holds.
const RING_SECONDS: usize = 4;
/// Seconds buffered before the resource reports `EnoughData`.
const READY_SECONDS: f64 = 0.5;

/// Creates a [`NativeResource`] per source. Sources are probed up front so
/// a missing or undecodable file fails creation instead of playback.
#[derive(Debug, Default)]
pub struct NativeFactory;

impl NativeFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceFactory for NativeFactory {
    fn create(&self, source: &str) -> Result<Arc<dyn AudioResource>, ResourceError> {
        let info = probe::probe_info(source).map_err(|e| ResourceError::Unavailable {
            source_uri: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(NativeResource::open(source, info)))
    }
}

pub struct NativeResource {
    id: ResourceId,
    source: String,
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    output_started: AtomicBool,
}

/// State shared with the decoder and output threads.
struct Shared {
    id: ResourceId,
    playing: AtomicBool,
    /// Decoder reached the end of the stream.
    drained: AtomicBool,
    ended: AtomicBool,
    released: AtomicBool,
    /// 0..=100
    volume: AtomicU32,
    ready: AtomicU8,
    /// Source parameters.
    source_rate: AtomicU32,
    channels: AtomicU32,
    /// Rate of the samples in the ring (device rate after resampling).
    ring_rate: AtomicU32,
    played_frames: AtomicU64,
    duration_ms: AtomicU64,
    /// Pending seek target, seconds.
    seek_to: Mutex<Option<f64>>,
    ring: Mutex<SampleRing>,
    failure: Mutex<Option<String>>,
    listeners: Listeners,
}

impl Shared {
    fn emit(&self, event: ResourceEvent) {
        self.listeners.emit(self.id, &event);
    }

    fn fail(&self, reason: String) {
        log::error!("cadence: resource {} failed: {}", self.id, reason);
        self.playing.store(false, Ordering::SeqCst);
        *self.failure.lock() = Some(reason.clone());
        self.emit(ResourceEvent::Failed(reason));
    }

    fn set_ready(&self, state: ReadyState) {
        let previous = self.ready.swap(state as u8, Ordering::SeqCst);
        if previous < state as u8 {
            self.emit(ResourceEvent::Ready(state));
        }
    }

    fn position(&self) -> f64 {
        let rate = self.ring_rate.load(Ordering::SeqCst).max(1);
        self.played_frames.load(Ordering::SeqCst) as f64 / rate as f64
    }
}

impl NativeResource {
    /// Start buffering `source`. Playback waits for [`AudioResource::play`].
    pub fn open(source: &str, info: MediaInfo) -> Self {
        let id = ResourceId::next();
        let channels = info.channels.max(1);
        let shared = Arc::new(Shared {
            id,
            playing: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            released: AtomicBool::new(false),
            volume: AtomicU32::new(100),
            ready: AtomicU8::new(ReadyState::Metadata as u8),
            source_rate: AtomicU32::new(info.sample_rate),
            channels: AtomicU32::new(channels),
            ring_rate: AtomicU32::new(info.sample_rate),
            played_frames: AtomicU64::new(0),
            duration_ms: AtomicU64::new(info.duration.map(|d| (d * 1000.0) as u64).unwrap_or(0)),
            seek_to: Mutex::new(None),
            ring: Mutex::new(SampleRing::with_capacity(
                info.sample_rate.max(8000) as usize * channels as usize * RING_SECONDS,
            )),
            failure: Mutex::new(None),
            listeners: Listeners::new(),
        });

        let decoder_shared = Arc::clone(&shared);
        let path = source.to_string();
        let decoder = thread::spawn(move || {
            if let Err(reason) = decode(&path, &decoder_shared) {
                decoder_shared.fail(format!("decode: {}", reason));
            }
        });

        Self {
            id,
            source: source.to_string(),
            shared,
            threads: Mutex::new(vec![decoder]),
            output_started: AtomicBool::new(false),
        }
    }

    fn start_output(&self) {
        if self.output_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.threads.lock().push(thread::spawn(move || {
            if let Err(reason) = run_output(&shared) {
                shared.fail(format!("output: {}", reason));
            }
        }));
    }
}

impl AudioResource for NativeResource {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn play(&self) -> Result<(), ResourceError> {
        if self.shared.released.load(Ordering::SeqCst) {
            return Err(ResourceError::TornDown(self.id));
        }
        if let Some(reason) = self.shared.failure.lock().clone() {
            return Err(ResourceError::Rejected(reason));
        }
        if self.shared.ended.swap(false, Ordering::SeqCst) {
            *self.shared.seek_to.lock() = Some(0.0);
        }
        if self.shared.playing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.start_output();
        self.shared.emit(ResourceEvent::Playing);
        Ok(())
    }

    fn pause(&self) -> Result<(), ResourceError> {
        if self.shared.playing.swap(false, Ordering::SeqCst) {
            self.shared.emit(ResourceEvent::Paused);
        }
        Ok(())
    }

    fn seek(&self, position: f64) -> Result<(), ResourceError> {
        if self.shared.released.load(Ordering::SeqCst) {
            return Ok(());
        }
        let position = position.max(0.0);
        let rate = self.shared.ring_rate.load(Ordering::SeqCst) as f64;
        self.shared
            .played_frames
            .store((position * rate) as u64, Ordering::SeqCst);
        self.shared.ended.store(false, Ordering::SeqCst);
        *self.shared.seek_to.lock() = Some(position);
        Ok(())
    }

    fn set_volume(&self, volume: u8) {
        self.shared.volume.store(volume.min(100) as u32, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::SeqCst)
    }

    fn position(&self) -> f64 {
        self.shared.position()
    }

    fn duration(&self) -> Option<f64> {
        match self.shared.duration_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms as f64 / 1000.0),
        }
    }

    fn ready_state(&self) -> ReadyState {
        match self.shared.ready.load(Ordering::SeqCst) {
            0 => ReadyState::Nothing,
            1 => ReadyState::Metadata,
            2 => ReadyState::CurrentData,
            3 => ReadyState::FutureData,
            _ => ReadyState::EnoughData,
        }
    }

    fn error(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    fn subscribe(&self, listener: Listener) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.shared.listeners.remove(id)
    }

    fn release(&self) {
        if self.shared.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.playing.store(false, Ordering::SeqCst);
        self.shared.ring.lock().clear();

        let current = thread::current().id();
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        log::debug!("cadence: released resource {} ({})", self.id, self.source);
    }
}

impl Drop for NativeResource {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Decoder thread
// ---------------------------------------------------------------------------

fn decode(source: &str, shared: &Shared) -> Result<(), String> {
    let mut format = probe::open_format(source).map_err(|e| e.to_string())?;
    let track = format.default_track().ok_or("no default track")?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| e.to_string())?;

    let source_rate = params.sample_rate.unwrap_or(44100);
    let channels = params.channels.map(|c| c.count() as u32).unwrap_or(2).max(1);
    let ring_rate = device_rate(source_rate);
    shared.source_rate.store(source_rate, Ordering::SeqCst);
    shared.channels.store(channels, Ordering::SeqCst);
    shared.ring_rate.store(ring_rate, Ordering::SeqCst);

    let mut resampler = Resampler::new(source_rate, ring_rate, channels as usize);
    if resampler.is_active() {
        log::info!("cadence: resampling {} Hz to {} Hz for {}", source_rate, ring_rate, shared.id);
    }
    let ready_samples = (READY_SECONDS * ring_rate as f64) as usize * channels as usize;

    while !shared.released.load(Ordering::SeqCst) {
        if let Some(target) = shared.seek_to.lock().take() {
            let time = Time::new(target.trunc() as u64, target.fract());
            match format.seek(SeekMode::Accurate, SeekTo::Time { time, track_id: Some(track_id) }) {
                Ok(_) => {
                    decoder.reset();
                    resampler.reset();
                    shared.ring.lock().clear();
                    shared.drained.store(false, Ordering::SeqCst);
                }
                Err(e) => log::warn!("cadence: seek on {} failed: {}", shared.id, e),
            }
        }

        if shared.drained.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                shared.drained.store(true, Ordering::SeqCst);
                shared.set_ready(ReadyState::EnoughData);
                continue;
            }
            Err(e) => return Err(e.to_string()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                log::debug!("cadence: skipping bad packet in {}: {}", shared.id, e);
                continue;
            }
            Err(e) => return Err(e.to_string()),
        };
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buf.copy_interleaved_ref(decoded);
        let samples = resampler.process(buf.samples());

        let mut offset = 0;
        while offset < samples.len() {
            if shared.released.load(Ordering::SeqCst) || shared.seek_to.lock().is_some() {
                break;
            }
            let buffered = {
                let mut ring = shared.ring.lock();
                offset += ring.push(&samples[offset..]);
                ring.len()
            };
            if buffered >= ready_samples {
                shared.set_ready(ReadyState::EnoughData);
            }
            if offset < samples.len() {
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output thread
// ---------------------------------------------------------------------------

fn run_output(shared: &Arc<Shared>) -> Result<(), String> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or("no output device")?;

    let rate = shared.ring_rate.load(Ordering::SeqCst);
    let ring_channels = shared.channels.load(Ordering::SeqCst).max(1) as u16;
    let config = output_config(&device, rate, ring_channels)?;
    let out_channels = config.channels.max(1);

    let cb = Arc::clone(shared);
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !cb.playing.load(Ordering::SeqCst) {
                    data.fill(0.0);
                    return;
                }
                let frames = data.len() / out_channels as usize;
                let pulled = if ring_channels == out_channels {
                    cb.ring.lock().pull(data)
                } else {
                    scratch.resize(frames * ring_channels as usize, 0.0);
                    let n = cb.ring.lock().pull(&mut scratch);
                    remix(&scratch, ring_channels as usize, data, out_channels as usize);
                    n
                };
                cb.played_frames
                    .fetch_add((pulled / ring_channels as usize) as u64, Ordering::SeqCst);
                let gain = cb.volume.load(Ordering::SeqCst) as f32 / 100.0;
                data.iter_mut().for_each(|s| *s *= gain);
            },
            |err| log::error!("cadence: output stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())?;
    stream.play().map_err(|e| e.to_string())?;

    while !shared.released.load(Ordering::SeqCst) {
        let finished = shared.drained.load(Ordering::SeqCst)
            && shared.ring.lock().is_empty()
            && shared.seek_to.lock().is_none();
        if finished && shared.playing.swap(false, Ordering::SeqCst) {
            shared.ended.store(true, Ordering::SeqCst);
            shared.emit(ResourceEvent::Ended);
        }
        thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

/// Track rate and channels when the device takes them as f32, otherwise the
/// device default.
fn output_config(device: &cpal::Device, rate: u32, channels: u16) -> Result<cpal::StreamConfig, String> {
    let exact = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|c| {
                c.sample_format() == cpal::SampleFormat::F32
                    && c.channels() == channels
                    && (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&rate)
            })
        })
        .unwrap_or(false);
    if exact {
        return Ok(cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        });
    }
    let fallback = device.default_output_config().map_err(|e| e.to_string())?;
    if fallback.sample_format() != cpal::SampleFormat::F32 {
        return Err(format!("device wants {:?}, not f32", fallback.sample_format()));
    }
    Ok(fallback.config())
}

/// Rate the output will run at for a source of `source_rate`.
fn device_rate(source_rate: u32) -> u32 {
    let Some(device) = cpal::default_host().default_output_device() else {
        return source_rate;
    };
    let supported = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|c| (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&source_rate))
        })
        .unwrap_or(false);
    if supported {
        return source_rate;
    }
    device
        .default_output_config()
        .map(|c| c.sample_rate().0)
        .unwrap_or(source_rate)
}

// ---------------------------------------------------------------------------
// Sample plumbing
// ---------------------------------------------------------------------------

/// Bounded FIFO of interleaved samples.
struct SampleRing {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SampleRing {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append as much of `input` as fits. Returns how many were taken.
    fn push(&mut self, input: &[f32]) -> usize {
        let room = self.capacity - self.samples.len();
        let taken = room.min(input.len());
        self.samples.extend(&input[..taken]);
        taken
    }

    /// Fill `out`, padding with silence. Returns how many were real samples.
    fn pull(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.samples.len());
        for (dst, src) in out.iter_mut().zip(self.samples.drain(..n)) {
            *dst = src;
        }
        out[n..].fill(0.0);
        n
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Linear-interpolating rate converter for interleaved frames.
///
/// Keeps the last input frame so interpolation is continuous across
/// packet boundaries.
struct Resampler {
    /// Input frames advanced per output frame.
    step: f64,
    /// Read position relative to `last`: 0.0 is `last`, 1.0 the first new frame.
    cursor: f64,
    channels: usize,
    last: Option<Vec<f32>>,
}

impl Resampler {
    fn new(from: u32, to: u32, channels: usize) -> Self {
        Self {
            step: from as f64 / to.max(1) as f64,
            cursor: 0.0,
            channels: channels.max(1),
            last: None,
        }
    }

    fn is_active(&self) -> bool {
        (self.step - 1.0).abs() > 1e-3
    }

    fn reset(&mut self) {
        self.cursor = 0.0;
        self.last = None;
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if !self.is_active() {
            return input.to_vec();
        }
        let ch = self.channels;
        let frames: Vec<&[f32]> = input.chunks_exact(ch).collect();
        if frames.is_empty() {
            return Vec::new();
        }

        // Index 0 is the carried frame (or the first frame on a fresh start).
        let carried = self.last.take().unwrap_or_else(|| frames[0].to_vec());
        let frame = |i: usize| -> &[f32] {
            if i == 0 {
                &carried
            } else {
                frames[i - 1]
            }
        };
        let available = frames.len() + 1;

        let mut out = Vec::with_capacity((frames.len() as f64 / self.step) as usize * ch + ch);
        while self.cursor + 1.0 < available as f64 {
            let i = self.cursor as usize;
            let t = (self.cursor - i as f64) as f32;
            let (a, b) = (frame(i), frame(i + 1));
            out.extend(a.iter().zip(b).map(|(x, y)| x + (y - x) * t));
            self.cursor += self.step;
        }

        self.cursor -= frames.len() as f64;
        self.last = frames.last().map(|f| f.to_vec());
        out
    }
}

/// Convert interleaved `src` with `src_ch` channels into `dst` with `dst_ch`.
///
/// Mono is copied to every output channel, a mono output averages the
/// input, anything else maps channel to channel and pads with silence.
fn remix(src: &[f32], src_ch: usize, dst: &mut [f32], dst_ch: usize) {
    for (out, input) in dst.chunks_exact_mut(dst_ch).zip(src.chunks(src_ch)) {
        match (input.len(), out.len()) {
            (1, _) => out.fill(input[0]),
            (n, 1) => out[0] = input.iter().sum::<f32>() / n as f32,
            _ => {
                for (c, sample) in out.iter_mut().enumerate() {
                    *sample = input.get(c).copied().unwrap_or(0.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_takes_only_what_fits() {
        let mut ring = SampleRing::with_capacity(4);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(ring.push(&[4.0, 5.0]), 1);
        let mut out = [9.0f32; 6];
        assert_eq!(ring.pull(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_preserves_order_across_partial_pulls() {
        let mut ring = SampleRing::with_capacity(8);
        ring.push(&[1.0, 2.0, 3.0]);
        let mut two = [0.0f32; 2];
        ring.pull(&mut two);
        ring.push(&[4.0]);
        let mut rest = [0.0f32; 2];
        assert_eq!(ring.pull(&mut rest), 2);
        assert_eq!(rest, [3.0, 4.0]);
    }

    #[test]
    fn resampler_is_identity_at_equal_rates() {
        let mut rs = Resampler::new(48000, 48000, 2);
        assert!(!rs.is_active());
        assert_eq!(rs.process(&[0.1, 0.2, 0.3, 0.4]), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn resampler_doubles_frames_when_upsampling() {
        let mut rs = Resampler::new(22050, 44100, 1);
        let first = rs.process(&[0.0, 1.0, 2.0, 3.0]);
        let second = rs.process(&[4.0, 5.0, 6.0, 7.0]);
        // The fresh start repeats the first frame once, then ramps.
        assert_eq!(&first[..4], &[0.0, 0.0, 0.0, 0.5]);
        assert_eq!(second.len(), 8);
        assert!(second.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn resampler_halves_frames_when_downsampling() {
        let mut rs = Resampler::new(96000, 48000, 1);
        let input: Vec<f32> = (0..96).map(|i| i as f32).collect();
        let out = rs.process(&input);
        assert!(out.len() >= 47 && out.len() <= 49);
    }

    #[test]
    fn remix_mono_to_stereo_and_back() {
        let mut stereo = [0.0f32; 4];
        remix(&[0.5, -0.5], 1, &mut stereo, 2);
        assert_eq!(stereo, [0.5, 0.5, -0.5, -0.5]);

        let mut mono = [0.0f32; 2];
        remix(&[1.0, 3.0, -1.0, 1.0], 2, &mut mono, 1);
        assert_eq!(mono, [2.0, 0.0]);
    }

    #[test]
    fn remix_pads_extra_channels() {
        let mut quad = [9.0f32; 4];
        remix(&[1.0, 2.0], 2, &mut quad, 4);
        assert_eq!(quad, [1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn factory_rejects_missing_file() {
        let err = NativeFactory::new().create("/nonexistent/a.mp3").unwrap_err();
        assert!(matches!(err, ResourceError::Unavailable { .. }));
    }
}
