//! Acoustic feature extraction for catalog builds.
//!
//! Audio is decoded with symphonia, down-mixed to mono and summarized over
//! short-time frames: RMS, zero-crossing rate, spectral centroid and rolloff,
//! a 12-bin chroma profile, mel-cepstral coefficients and a tempo estimate from
//! the autocorrelation of the spectral-flux onset envelope.

use crate::music::MusicFeatures;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

const LOG_TARGET: &str = "music::extract";

pub const DEFAULT_EXCERPT: Duration = Duration::from_secs(30);
const FRAME_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;
const ROLLOFF_FRACTION: f64 = 0.85;
const N_MELS: usize = 40;
const N_MFCC: usize = 13;
const MIN_PITCH_HZ: f64 = 27.5;
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;
const TEMPO_PRIOR_BPM: f64 = 120.0;
const LOG_FLOOR: f64 = 1e-10;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("failed to open audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode audio: {0}")]
    Decode(String),

    #[error("no decodable audio track")]
    NoAudioTrack,

    #[error("audio too short to analyze ({samples} samples)")]
    TooShort { samples: usize },

    #[error("invalid audio: {0}")]
    InvalidAudio(String),
}

impl From<SymphoniaError> for ExtractError {
    fn from(e: SymphoniaError) -> Self {
        match e {
            SymphoniaError::IoError(io) => ExtractError::Io(io),
            other => ExtractError::Decode(other.to_string()),
        }
    }
}

/// Produces the acoustic summary of one audio file.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<MusicFeatures, ExtractError>;
}

#[derive(Clone, Debug)]
pub struct SymphoniaFeatureExtractor {
    excerpt: Duration,
}

impl SymphoniaFeatureExtractor {
    pub fn new() -> Self {
        Self {
            excerpt: DEFAULT_EXCERPT,
        }
    }

    /// Only the first `excerpt` of each file is analyzed.
    pub fn with_excerpt(mut self, excerpt: Duration) -> Self {
        self.excerpt = excerpt;
        self
    }
}

impl Default for SymphoniaFeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for SymphoniaFeatureExtractor {
    fn extract(&self, path: &Path) -> Result<MusicFeatures, ExtractError> {
        let (samples, sample_rate) = decode_excerpt(path, self.excerpt)?;
        summarize(&samples, sample_rate)
    }
}

/// Decodes up to `excerpt` of `path` into mono samples and returns them with the
/// sample rate.
pub fn decode_excerpt(path: &Path, excerpt: Duration) -> Result<(Vec<f32>, u32), ExtractError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(ExtractError::NoAudioTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut mono = Vec::new();
    let mut limit = usize::MAX;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(target: LOG_TARGET, path = %path.display(), "skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        if limit == usize::MAX && sample_rate > 0 {
            limit = (excerpt.as_secs_f64() * f64::from(sample_rate)) as usize;
        }

        let channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        mono.extend(
            buf.samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );

        if mono.len() >= limit {
            mono.truncate(limit);
            break;
        }
    }

    if sample_rate == 0 {
        return Err(ExtractError::InvalidAudio("unknown sample rate".into()));
    }
    debug!(
        target: LOG_TARGET,
        path = %path.display(),
        sample_rate,
        samples = mono.len(),
        "decoded excerpt"
    );
    Ok((mono, sample_rate))
}

/// Computes the feature summary of mono PCM.
pub fn summarize(samples: &[f32], sample_rate: u32) -> Result<MusicFeatures, ExtractError> {
    if sample_rate == 0 {
        return Err(ExtractError::InvalidAudio("sample rate is zero".into()));
    }
    if samples.len() < FRAME_SIZE {
        return Err(ExtractError::TooShort {
            samples: samples.len(),
        });
    }

    let sr = f64::from(sample_rate);
    let bins = FRAME_SIZE / 2 + 1;
    let bin_hz = sr / FRAME_SIZE as f64;
    let window = hann(FRAME_SIZE);
    let mel = mel_filterbank(bins, bin_hz, sr / 2.0);
    let pitch_classes: Vec<Option<usize>> =
        (0..bins).map(|k| pitch_class(k as f64 * bin_hz)).collect();

    let fft = FftPlanner::<f32>::new().plan_fft_forward(FRAME_SIZE);
    let mut spectrum = vec![Complex::new(0.0f32, 0.0); FRAME_SIZE];

    let mut sums = MusicFeatures::default();
    let mut frames = 0usize;
    let mut onset_envelope = Vec::new();
    let mut prev_mag: Option<Vec<f64>> = None;

    for start in (0..=samples.len() - FRAME_SIZE).step_by(HOP_SIZE) {
        let frame = &samples[start..start + FRAME_SIZE];
        frames += 1;

        let power_sum: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        sums.energy_mean += (power_sum / FRAME_SIZE as f64).sqrt();
        let crossings = frame
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        sums.zcr_mean += crossings as f64 / FRAME_SIZE as f64;

        for (slot, (&s, &w)) in spectrum.iter_mut().zip(frame.iter().zip(window.iter())) {
            *slot = Complex::new(s * w, 0.0);
        }
        fft.process(&mut spectrum);
        let mag: Vec<f64> = spectrum[..bins].iter().map(|c| f64::from(c.norm())).collect();

        let total: f64 = mag.iter().sum();
        if total > LOG_FLOOR {
            let weighted: f64 = mag.iter().enumerate().map(|(k, m)| k as f64 * bin_hz * m).sum();
            sums.spectral_centroid_mean += weighted / total;

            let threshold = ROLLOFF_FRACTION * total;
            let mut cumulative = 0.0;
            let rolloff_bin = mag
                .iter()
                .position(|m| {
                    cumulative += m;
                    cumulative >= threshold
                })
                .unwrap_or(bins - 1);
            sums.spectral_rolloff_mean += rolloff_bin as f64 * bin_hz;
        }

        let power: Vec<f64> = mag.iter().map(|m| m * m).collect();
        sums.chroma_mean += chroma_frame_mean(&power, &pitch_classes);
        sums.mfcc_mean += mfcc_frame_mean(&power, &mel);

        if let Some(prev) = &prev_mag {
            let flux: f64 = mag.iter().zip(prev).map(|(m, p)| (m - p).max(0.0)).sum();
            onset_envelope.push(flux);
        }
        prev_mag = Some(mag);
    }

    let n = frames as f64;
    Ok(MusicFeatures {
        tempo: estimate_tempo(&onset_envelope, sr / HOP_SIZE as f64),
        spectral_centroid_mean: sums.spectral_centroid_mean / n,
        spectral_rolloff_mean: sums.spectral_rolloff_mean / n,
        zcr_mean: sums.zcr_mean / n,
        mfcc_mean: sums.mfcc_mean / n,
        chroma_mean: sums.chroma_mean / n,
        energy_mean: sums.energy_mean / n,
    })
}

fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / len as f64).cos()) as f32)
        .collect()
}

fn pitch_class(freq_hz: f64) -> Option<usize> {
    if freq_hz < MIN_PITCH_HZ {
        return None;
    }
    let midi = 69.0 + 12.0 * (freq_hz / 440.0).log2();
    Some((midi.round() as i64).rem_euclid(12) as usize)
}

/// Per-frame chroma, max-normalized, averaged over the 12 classes.
fn chroma_frame_mean(power: &[f64], pitch_classes: &[Option<usize>]) -> f64 {
    let mut chroma = [0.0f64; 12];
    for (p, pc) in power.iter().zip(pitch_classes) {
        if let Some(pc) = pc {
            chroma[*pc] += p;
        }
    }
    let max = chroma.iter().copied().fold(0.0, f64::max);
    if max <= LOG_FLOOR {
        return 0.0;
    }
    chroma.iter().map(|c| c / max).sum::<f64>() / 12.0
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters, `N_MELS` rows of `bins` weights.
fn mel_filterbank(bins: usize, bin_hz: f64, nyquist: f64) -> Vec<Vec<f64>> {
    let max_mel = hz_to_mel(nyquist);
    let edges: Vec<f64> = (0..N_MELS + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (N_MELS + 1) as f64))
        .collect();

    (0..N_MELS)
        .map(|m| {
            let (lo, mid, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            (0..bins)
                .map(|k| {
                    let f = k as f64 * bin_hz;
                    if f <= lo || f >= hi {
                        0.0
                    } else if f <= mid {
                        (f - lo) / (mid - lo)
                    } else {
                        (hi - f) / (hi - mid)
                    }
                })
                .collect()
        })
        .collect()
}

/// Mean of the first `N_MFCC` orthonormal DCT-II coefficients of the log-mel spectrum.
fn mfcc_frame_mean(power: &[f64], mel: &[Vec<f64>]) -> f64 {
    let log_mel: Vec<f64> = mel
        .iter()
        .map(|filter| {
            let energy: f64 = filter.iter().zip(power).map(|(w, p)| w * p).sum();
            10.0 * energy.max(LOG_FLOOR).log10()
        })
        .collect();

    let n = log_mel.len() as f64;
    let coeff_sum: f64 = (0..N_MFCC)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            let sum: f64 = log_mel
                .iter()
                .enumerate()
                .map(|(i, x)| x * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                .sum();
            scale * sum
        })
        .sum();
    coeff_sum / N_MFCC as f64
}

/// Picks the autocorrelation lag of the onset envelope with the best score,
/// weighted by a log-normal prior around 120 BPM. Returns 0 when no
/// periodicity is found.
fn estimate_tempo(onset_envelope: &[f64], frame_rate: f64) -> f64 {
    if onset_envelope.len() < 2 {
        return 0.0;
    }
    let mean = onset_envelope.iter().sum::<f64>() / onset_envelope.len() as f64;
    let centered: Vec<f64> = onset_envelope.iter().map(|v| v - mean).collect();

    let min_lag = ((frame_rate * 60.0 / MAX_BPM).ceil() as usize).max(1);
    let max_lag = ((frame_rate * 60.0 / MIN_BPM).floor() as usize).min(centered.len() - 1);

    let mut best: Option<(f64, usize)> = None;
    for lag in min_lag..=max_lag {
        let acf: f64 = centered
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| a * b)
            .sum();
        if acf <= 0.0 {
            continue;
        }
        let bpm = 60.0 * frame_rate / lag as f64;
        let prior = (-0.5 * (bpm / TEMPO_PRIOR_BPM).log2().powi(2)).exp();
        let score = acf * prior;
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, lag));
        }
    }

    best.map_or(0.0, |(_, lag)| 60.0 * frame_rate / lag as f64)
}
