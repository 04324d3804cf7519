//! Descriptor feature extraction.
//!
//! Every per-frame series (cepstral, spectral, chroma, energy) is reduced to
//! its mean and standard deviation over time, so clips of any length produce
//! the same fixed-shape [`FeatureSet`]. Tempo is a single global estimate.

use crate::audio::{AudioClip, ANALYSIS_SAMPLE_RATE, MAX_ANALYSIS_SECS};
use crate::dsp::{self, PadMode, Stft};
use crate::emotion::FeatureSummary;
use crate::{NavarasaError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

pub const N_MFCC: usize = 20;
pub const N_CHROMA: usize = 12;
pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;
/// Length of [`FeatureSet::to_vector`].
pub const FEATURE_VECTOR_LEN: usize = 2 * N_MFCC + 6 + 1 + 2 * N_CHROMA + 2;

const N_MELS: usize = 128;
const TOP_DB: f32 = 80.0;
const ROLLOFF_PERCENT: f32 = 0.85;
const CHROMA_MIN_HZ: f32 = 32.7;
const MIN_BPM: f64 = 30.0;
const MAX_BPM: f64 = 300.0;
const PRIOR_BPM: f64 = 120.0;
const ONSET_SMOOTHING_FRAMES: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub mfccs_mean: Vec<f64>,
    pub mfccs_std: Vec<f64>,
    pub spectral_centroid_mean: f64,
    pub spectral_centroid_std: f64,
    pub spectral_rolloff_mean: f64,
    pub spectral_rolloff_std: f64,
    pub zcr_mean: f64,
    pub zcr_std: f64,
    /// Global tempo estimate in BPM; 0 when no periodic onsets were found.
    pub tempo: f64,
    pub chroma_mean: Vec<f64>,
    pub chroma_std: Vec<f64>,
    pub rms_mean: f64,
    pub rms_std: f64,
}

impl FeatureSet {
    /// Reject non-finite scalars and vectors of the wrong arity.
    pub fn validate(&self) -> Result<()> {
        let vectors: [(&str, &[f64], usize); 4] = [
            ("mfccs_mean", &self.mfccs_mean, N_MFCC),
            ("mfccs_std", &self.mfccs_std, N_MFCC),
            ("chroma_mean", &self.chroma_mean, N_CHROMA),
            ("chroma_std", &self.chroma_std, N_CHROMA),
        ];
        for (name, values, arity) in vectors {
            if values.len() != arity {
                return Err(NavarasaError::FeatureExtraction(format!(
                    "{name} has {} values, expected {arity}",
                    values.len()
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(NavarasaError::FeatureExtraction(format!(
                    "{name} contains a non-finite value"
                )));
            }
        }
        let scalars = [
            ("spectral_centroid_mean", self.spectral_centroid_mean),
            ("spectral_centroid_std", self.spectral_centroid_std),
            ("spectral_rolloff_mean", self.spectral_rolloff_mean),
            ("spectral_rolloff_std", self.spectral_rolloff_std),
            ("zcr_mean", self.zcr_mean),
            ("zcr_std", self.zcr_std),
            ("tempo", self.tempo),
            ("rms_mean", self.rms_mean),
            ("rms_std", self.rms_std),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(NavarasaError::FeatureExtraction(format!(
                    "{name} is not finite ({value})"
                )));
            }
        }
        Ok(())
    }

    /// Flat descriptor in a fixed order, for model-based consumers.
    pub fn to_vector(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(FEATURE_VECTOR_LEN);
        v.extend_from_slice(&self.mfccs_mean);
        v.extend_from_slice(&self.mfccs_std);
        v.push(self.spectral_centroid_mean);
        v.push(self.spectral_centroid_std);
        v.push(self.spectral_rolloff_mean);
        v.push(self.spectral_rolloff_std);
        v.push(self.zcr_mean);
        v.push(self.zcr_std);
        v.push(self.tempo);
        v.extend_from_slice(&self.chroma_mean);
        v.extend_from_slice(&self.chroma_std);
        v.push(self.rms_mean);
        v.push(self.rms_std);
        v
    }

    /// Population variance across the mean cepstral coefficients (timbral diversity).
    pub fn mfcc_variance(&self) -> f64 {
        if self.mfccs_mean.is_empty() {
            return 0.0;
        }
        let n = self.mfccs_mean.len() as f64;
        let mean = self.mfccs_mean.iter().sum::<f64>() / n;
        self.mfccs_mean.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n
    }

    pub fn summary(&self) -> FeatureSummary {
        FeatureSummary {
            tempo: self.tempo,
            energy: self.rms_mean,
            brightness: self.spectral_centroid_mean,
        }
    }
}

/// Stateless extractor; holds only precomputed analysis tables, so one
/// instance can serve concurrent requests.
#[derive(Debug)]
pub struct FeatureExtractor {
    stft: Stft,
    mel_fb: Array2<f32>,
    chroma_fb: Array2<f32>,
    freqs: Vec<f32>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        let stft = Stft::new(N_FFT, HOP_LENGTH);
        let sr = ANALYSIS_SAMPLE_RATE;
        Self {
            mel_fb: dsp::mel_filterbank(sr, N_FFT, N_MELS, 0.0, sr as f32 / 2.0),
            chroma_fb: chroma_filterbank(sr, N_FFT),
            freqs: stft.bin_frequencies(sr),
            stft,
        }
    }

    pub fn extract(&self, clip: &AudioClip) -> Result<FeatureSet> {
        let clip = clip.prepared(ANALYSIS_SAMPLE_RATE, MAX_ANALYSIS_SECS);
        let y = clip.samples();

        let magnitude = self.stft.magnitude(y);
        let power = magnitude.mapv(|m| m * m);
        let mel_db = dsp::power_to_db(
            &dsp::apply_filterbank(&power, &self.mel_fb),
            1.0,
            Some(TOP_DB),
        );

        // cepstral coefficients per frame, reduced to moments over time
        let n_frames = mel_db.nrows();
        let mut mfcc = Array2::<f32>::zeros((n_frames, N_MFCC));
        for (t, row) in mel_db.axis_iter(Axis(0)).enumerate() {
            let coeffs = dsp::dct_ii(&row.to_vec(), N_MFCC);
            for (k, c) in coeffs.into_iter().enumerate() {
                mfcc[[t, k]] = c;
            }
        }
        let (mfccs_mean, mfccs_std) = dsp::mean_std_over_time(&mfcc);

        let centroid: Vec<f32> = magnitude
            .axis_iter(Axis(0))
            .map(|frame| spectral_centroid(frame.as_slice().unwrap_or(&[]), &self.freqs))
            .collect();
        let rolloff: Vec<f32> = magnitude
            .axis_iter(Axis(0))
            .map(|frame| spectral_rolloff(frame.as_slice().unwrap_or(&[]), &self.freqs))
            .collect();

        let padded = dsp::pad_center(y, N_FFT / 2, PadMode::Zeros);
        let n_frames_time = dsp::frame_count(y.len(), HOP_LENGTH);
        let zcr: Vec<f32> = dsp::frames(&padded, n_frames_time, N_FFT, HOP_LENGTH)
            .map(zero_crossing_rate)
            .collect();
        let rms: Vec<f32> = dsp::frames(&padded, n_frames_time, N_FFT, HOP_LENGTH)
            .map(frame_rms)
            .collect();

        let chroma = chroma_frames(&power, &self.chroma_fb);
        let (chroma_mean, chroma_std) = dsp::mean_std_over_time(&chroma);

        let tempo = estimate_tempo(&mel_db, ANALYSIS_SAMPLE_RATE, HOP_LENGTH);

        let (spectral_centroid_mean, spectral_centroid_std) = dsp::mean_std(&centroid);
        let (spectral_rolloff_mean, spectral_rolloff_std) = dsp::mean_std(&rolloff);
        let (zcr_mean, zcr_std) = dsp::mean_std(&zcr);
        let (rms_mean, rms_std) = dsp::mean_std(&rms);

        let features = FeatureSet {
            mfccs_mean: mfccs_mean.iter().map(|v| *v as f64).collect(),
            mfccs_std: mfccs_std.iter().map(|v| *v as f64).collect(),
            spectral_centroid_mean,
            spectral_centroid_std,
            spectral_rolloff_mean,
            spectral_rolloff_std,
            zcr_mean,
            zcr_std,
            tempo,
            chroma_mean: chroma_mean.iter().map(|v| *v as f64).collect(),
            chroma_std: chroma_std.iter().map(|v| *v as f64).collect(),
            rms_mean,
            rms_std,
        };
        features.validate()?;
        Ok(features)
    }
}

fn spectral_centroid(frame: &[f32], freqs: &[f32]) -> f32 {
    let total: f32 = frame.iter().sum();
    if total <= f32::EPSILON {
        return 0.0;
    }
    frame.iter().zip(freqs).map(|(m, f)| m * f).sum::<f32>() / total
}

fn spectral_rolloff(frame: &[f32], freqs: &[f32]) -> f32 {
    let total: f32 = frame.iter().sum();
    if total <= f32::EPSILON {
        return 0.0;
    }
    let threshold = ROLLOFF_PERCENT * total;
    let mut acc = 0.0f32;
    for (m, f) in frame.iter().zip(freqs) {
        acc += m;
        if acc >= threshold {
            return *f;
        }
    }
    freqs.last().copied().unwrap_or(0.0)
}

fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / frame.len() as f32
}

fn frame_rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

/// Hard assignment of every FFT bin above C1 to its nearest pitch class (C = 0).
fn chroma_filterbank(sr: u32, n_fft: usize) -> Array2<f32> {
    let bins = n_fft / 2 + 1;
    let mut fb = Array2::<f32>::zeros((N_CHROMA, bins));
    for k in 1..bins {
        let f = k as f32 * sr as f32 / n_fft as f32;
        if f < CHROMA_MIN_HZ {
            continue;
        }
        let midi = 69.0 + 12.0 * (f / 440.0).log2();
        let pitch_class = (midi.round() as i64).rem_euclid(N_CHROMA as i64) as usize;
        fb[[pitch_class, k]] = 1.0;
    }
    fb
}

/// Pitch-class energy per frame, each frame scaled so its loudest class is 1.
fn chroma_frames(power: &Array2<f32>, chroma_fb: &Array2<f32>) -> Array2<f32> {
    let mut chroma = dsp::apply_filterbank(power, chroma_fb);
    for mut row in chroma.axis_iter_mut(Axis(0)) {
        let peak = row.iter().copied().fold(0.0f32, f32::max);
        if peak > f32::EPSILON {
            row.mapv_inplace(|v| v / peak);
        }
    }
    chroma
}

/// Global tempo from the autocorrelation of an onset-strength envelope.
///
/// The envelope is the mean positive first difference of the dB mel
/// spectrogram, smoothed with a small Gaussian so onsets quantized to
/// neighbouring frames still line up. Each autocorrelation peak between 30
/// and 300 BPM is refined to a fractional lag and weighted by a log-normal
/// prior centered on 120 BPM (one octave deviation).
pub fn estimate_tempo(mel_db: &Array2<f32>, sample_rate: u32, hop: usize) -> f64 {
    let n = mel_db.nrows();
    if n < 3 {
        return 0.0;
    }
    let mut envelope = vec![0.0f64; n];
    for t in 1..n {
        let prev = mel_db.row(t - 1);
        let cur = mel_db.row(t);
        let rise: f32 = cur
            .iter()
            .zip(prev.iter())
            .map(|(c, p)| (c - p).max(0.0))
            .sum();
        envelope[t] = rise as f64 / mel_db.ncols().max(1) as f64;
    }
    let mut envelope = gaussian_smooth(&envelope, ONSET_SMOOTHING_FRAMES);
    let mean = envelope.iter().sum::<f64>() / n as f64;
    envelope.iter_mut().for_each(|v| *v -= mean);
    if envelope.iter().all(|v| v.abs() < 1e-9) {
        return 0.0;
    }

    let frame_rate = sample_rate as f64 / hop as f64;
    let min_lag = (60.0 * frame_rate / MAX_BPM).ceil().max(1.0) as usize;
    let max_lag = ((60.0 * frame_rate / MIN_BPM).floor() as usize).min(n - 1);
    if min_lag > max_lag {
        return 0.0;
    }
    // Biased estimate: longer lags overlap less, which favours the shortest
    // of several equally periodic candidates.
    let ac: Vec<f64> = (0..=(max_lag + 1).min(n - 1))
        .map(|lag| {
            envelope[..n - lag]
                .iter()
                .zip(&envelope[lag..])
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / n as f64
        })
        .collect();

    let mut best: Option<(f64, f64)> = None;
    for lag in min_lag..=max_lag {
        let (left, mid) = (ac[lag - 1], ac[lag]);
        let right = ac.get(lag + 1).copied();
        if mid <= 0.0 || mid < left || right.map_or(false, |r| mid < r) {
            continue;
        }
        let (offset, height) = match right {
            Some(r) => parabolic_peak(left, mid, r),
            None => (0.0, mid),
        };
        let bpm = 60.0 * frame_rate / (lag as f64 + offset);
        let prior = (-0.5 * (bpm / PRIOR_BPM).log2().powi(2)).exp();
        let weighted = height * prior;
        if weighted > best.map_or(0.0, |(_, w)| w) {
            best = Some((bpm, weighted));
        }
    }
    best.map_or(0.0, |(bpm, _)| bpm)
}

/// Vertex of the parabola through three equally spaced samples, as
/// (offset from the middle sample in [-0.5, 0.5], height).
fn parabolic_peak(left: f64, mid: f64, right: f64) -> (f64, f64) {
    let curvature = left - 2.0 * mid + right;
    if curvature.abs() < f64::EPSILON {
        return (0.0, mid);
    }
    let offset = (0.5 * (left - right) / curvature).clamp(-0.5, 0.5);
    (offset, mid - 0.25 * (left - right) * offset)
}

/// Gaussian moving average; edge weights are renormalized so the mean is kept.
fn gaussian_smooth(x: &[f64], sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let n = x.len() as isize;
    (0..n)
        .map(|t| {
            let (mut acc, mut norm) = (0.0, 0.0);
            for (k, w) in (-radius..=radius).zip(&kernel) {
                let i = t + k;
                if (0..n).contains(&i) {
                    acc += w * x[i as usize];
                    norm += w;
                }
            }
            acc / norm
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = ANALYSIS_SAMPLE_RATE;

    fn sine(freq: f32, secs: f32, amp: f32) -> AudioClip {
        let n = (secs * SR as f32) as usize;
        let samples = (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect();
        AudioClip::new(samples, SR).unwrap()
    }

    fn click_track(period_samples: usize, secs: f32) -> AudioClip {
        let n = (secs * SR as f32) as usize;
        let mut samples = vec![0.0f32; n];
        let mut start = 0;
        while start < n {
            for (i, s) in samples[start..(start + 256).min(n)].iter_mut().enumerate() {
                *s = 0.8 * (-(i as f32) / 40.0).exp() * if i % 2 == 0 { 1.0 } else { -1.0 };
            }
            start += period_samples;
        }
        AudioClip::new(samples, SR).unwrap()
    }

    #[test]
    fn sine_descriptors_match_tone() {
        let features = FeatureExtractor::new().extract(&sine(440.0, 3.0, 0.5)).unwrap();
        assert!(
            (features.spectral_centroid_mean - 440.0).abs() < 120.0,
            "centroid {}",
            features.spectral_centroid_mean
        );
        // two crossings per period
        let expected_zcr = 2.0 * 440.0 / SR as f64;
        assert!((features.zcr_mean - expected_zcr).abs() < 0.01, "zcr {}", features.zcr_mean);
        assert!((features.rms_mean - 0.5 / 2f64.sqrt()).abs() < 0.03, "rms {}", features.rms_mean);
        let strongest = features
            .chroma_mean
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (i, v)| if *v > acc.1 { (i, *v) } else { acc })
            .0;
        assert_eq!(strongest, 9, "A should dominate: {:?}", features.chroma_mean);
    }

    #[test]
    fn brighter_tone_has_higher_centroid_and_rolloff() {
        let extractor = FeatureExtractor::new();
        let low = extractor.extract(&sine(300.0, 2.0, 0.5)).unwrap();
        let high = extractor.extract(&sine(4000.0, 2.0, 0.5)).unwrap();
        assert!(high.spectral_centroid_mean > low.spectral_centroid_mean);
        assert!(high.spectral_rolloff_mean > low.spectral_rolloff_mean);
    }

    #[test]
    fn arity_is_independent_of_clip_length() {
        let extractor = FeatureExtractor::new();
        let short = extractor.extract(&sine(220.0, 5.0, 0.3)).unwrap();
        let long = extractor.extract(&sine(220.0, 25.0, 0.3)).unwrap();
        for fs in [&short, &long] {
            assert_eq!(fs.mfccs_mean.len(), N_MFCC);
            assert_eq!(fs.mfccs_std.len(), N_MFCC);
            assert_eq!(fs.chroma_mean.len(), N_CHROMA);
            assert_eq!(fs.chroma_std.len(), N_CHROMA);
            assert_eq!(fs.to_vector().len(), FEATURE_VECTOR_LEN);
        }
    }

    #[test]
    fn silence_yields_finite_features_and_no_tempo() {
        let clip = AudioClip::new(vec![0.0; SR as usize * 2], SR).unwrap();
        let features = FeatureExtractor::new().extract(&clip).unwrap();
        assert!(features.validate().is_ok());
        assert_eq!(features.tempo, 0.0);
        assert_eq!(features.rms_mean, 0.0);
        assert_eq!(features.spectral_centroid_mean, 0.0);
    }

    #[test]
    fn very_short_clip_still_extracts() {
        let clip = AudioClip::new(vec![0.1, -0.1, 0.2], SR).unwrap();
        let features = FeatureExtractor::new().extract(&clip).unwrap();
        assert_eq!(features.mfccs_mean.len(), N_MFCC);
    }

    #[test]
    fn click_track_tempo_across_common_range() {
        let extractor = FeatureExtractor::new();
        for bpm in (60..=170).step_by(10).chain([72, 117, 140, 148]) {
            let period = (60.0 * SR as f64 / bpm as f64).round() as usize;
            let expected = 60.0 * SR as f64 / period as f64;
            let tempo = extractor.extract(&click_track(period, 10.0)).unwrap().tempo;
            assert!(
                (tempo - expected).abs() <= 0.04 * expected,
                "{bpm} BPM click track estimated at {tempo}"
            );
        }
    }

    #[test]
    fn parabolic_peak_finds_vertex() {
        // samples of -(x - 0.25)^2 at x = -1, 0, 1
        let (offset, height) = parabolic_peak(-1.5625, -0.0625, -0.5625);
        assert!((offset - 0.25).abs() < 1e-12);
        assert!(height.abs() < 1e-12);
        assert_eq!(parabolic_peak(1.0, 1.0, 1.0), (0.0, 1.0));
    }

    #[test]
    fn smoothing_keeps_constant_signals() {
        let flat = gaussian_smooth(&[2.0; 10], ONSET_SMOOTHING_FRAMES);
        assert!(flat.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn extraction_is_deterministic() {
        let clip = click_track(20 * HOP_LENGTH, 4.0);
        let extractor = FeatureExtractor::new();
        assert_eq!(extractor.extract(&clip).unwrap(), extractor.extract(&clip).unwrap());
    }

    #[test]
    fn validate_rejects_non_finite_and_bad_arity() {
        let clip = sine(440.0, 1.0, 0.5);
        let mut features = FeatureExtractor::new().extract(&clip).unwrap();
        features.tempo = f64::NAN;
        assert!(matches!(
            features.validate(),
            Err(NavarasaError::FeatureExtraction(_))
        ));
        features.tempo = 120.0;
        features.chroma_std.pop();
        assert!(matches!(
            features.validate(),
            Err(NavarasaError::FeatureExtraction(_))
        ));
    }

    #[test]
    fn mfcc_variance_is_population_variance() {
        let clip = sine(440.0, 1.0, 0.5);
        let mut features = FeatureExtractor::new().extract(&clip).unwrap();
        features.mfccs_mean = vec![1.0, 3.0];
        assert!((features.mfcc_variance() - 1.0).abs() < 1e-12);
    }
}
