//! Short-time spectral analysis shared by the feature extractor and the
//! classifier frontend.

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Periodic Hann window.
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / len as f32).cos())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    Reflect,
    Zeros,
}

/// Pad `pad` samples on both sides so frame `t` is centered on sample `t * hop`.
/// Reflect padding needs more than `pad` samples; shorter input falls back to zeros.
pub fn pad_center(samples: &[f32], pad: usize, mode: PadMode) -> Vec<f32> {
    let n = samples.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    if mode == PadMode::Reflect && n > pad {
        out.extend((1..=pad).rev().map(|i| samples[i]));
        out.extend_from_slice(samples);
        out.extend((0..pad).map(|i| samples[n - 2 - i]));
    } else {
        out.resize(pad, 0.0);
        out.extend_from_slice(samples);
        out.resize(n + 2 * pad, 0.0);
    }
    out
}

/// Number of centered frames produced for a signal of `len` samples.
pub fn frame_count(len: usize, hop: usize) -> usize {
    1 + len / hop
}

/// Iterate centered frames of `frame_len` samples over an already padded signal.
pub fn frames<'a>(
    padded: &'a [f32],
    n_frames: usize,
    frame_len: usize,
    hop: usize,
) -> impl Iterator<Item = &'a [f32]> + 'a {
    (0..n_frames).filter_map(move |t| padded.get(t * hop..t * hop + frame_len))
}

/// Centered short-time Fourier transform producing `frames x (n_fft / 2 + 1)` magnitudes.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("n_fft", &self.n_fft)
            .field("hop", &self.hop)
            .finish()
    }
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);
        Self {
            n_fft,
            hop,
            window: hann_window(n_fft),
            fft,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Frequency (Hz) of every bin.
    pub fn bin_frequencies(&self, sample_rate: u32) -> Vec<f32> {
        (0..self.n_bins())
            .map(|k| k as f32 * sample_rate as f32 / self.n_fft as f32)
            .collect()
    }

    pub fn magnitude(&self, samples: &[f32]) -> Array2<f32> {
        let padded = pad_center(samples, self.n_fft / 2, PadMode::Reflect);
        let n_frames = frame_count(samples.len(), self.hop);
        let bins = self.n_bins();
        let rows: Vec<Vec<f32>> = (0..n_frames)
            .into_par_iter()
            .map(|t| {
                let start = t * self.hop;
                let mut buf: Vec<Complex<f32>> = (0..self.n_fft)
                    .map(|i| Complex {
                        re: padded.get(start + i).copied().unwrap_or(0.0) * self.window[i],
                        im: 0.0,
                    })
                    .collect();
                self.fft.process(&mut buf);
                buf[..bins].iter().map(|c| c.norm()).collect()
            })
            .collect();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((n_frames, bins), flat)
            .unwrap_or_else(|_| Array2::zeros((n_frames, bins)))
    }

    pub fn power(&self, samples: &[f32]) -> Array2<f32> {
        self.magnitude(samples).mapv(|m| m * m)
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(m: f32) -> f32 {
    700.0 * (10f32.powf(m / 2595.0) - 1.0)
}

/// Triangular mel filterbank (`n_mels x (n_fft / 2 + 1)`), each filter area-normalized.
pub fn mel_filterbank(sr: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Array2<f32> {
    let bins = n_fft / 2 + 1;
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax.min(sr as f32 / 2.0));
    let hz_points: Vec<f32> = (0..(n_mels + 2))
        .map(|i| mel_to_hz(mel_min + (i as f32) * (mel_max - mel_min) / (n_mels + 1) as f32))
        .collect();
    let bin_hz = sr as f32 / n_fft as f32;
    let mut fb = Array2::<f32>::zeros((n_mels, bins));
    for m in 0..n_mels {
        let (lo, center, hi) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        let norm = 2.0 / (hi - lo).max(f32::EPSILON);
        for k in 0..bins {
            let f = k as f32 * bin_hz;
            let rising = (f - lo) / (center - lo).max(f32::EPSILON);
            let falling = (hi - f) / (hi - center).max(f32::EPSILON);
            let w = rising.min(falling).max(0.0);
            if w > 0.0 {
                fb[[m, k]] = w * norm;
            }
        }
    }
    fb
}

/// Project a `frames x bins` power spectrogram onto `filterbank` (`bands x bins`).
pub fn apply_filterbank(power: &Array2<f32>, filterbank: &Array2<f32>) -> Array2<f32> {
    power.dot(&filterbank.t())
}

/// Convert power to decibels relative to `reference`, clipping to `top_db` below the peak.
pub fn power_to_db(power: &Array2<f32>, reference: f32, top_db: Option<f32>) -> Array2<f32> {
    const AMIN: f32 = 1e-10;
    let ref_db = 10.0 * reference.abs().max(AMIN).log10();
    let mut db = power.mapv(|p| 10.0 * p.max(AMIN).log10() - ref_db);
    if let Some(top) = top_db {
        let peak = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - top;
        db.mapv_inplace(|v| v.max(floor));
    }
    db
}

/// Orthonormal DCT-II of `input`, first `n_out` coefficients.
pub fn dct_ii(input: &[f32], n_out: usize) -> Vec<f32> {
    let n = input.len() as f32;
    (0..n_out)
        .map(|k| {
            let sum: f32 = input
                .iter()
                .enumerate()
                .map(|(i, x)| x * (std::f32::consts::PI * k as f32 * (i as f32 + 0.5) / n).cos())
                .sum();
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            sum * scale
        })
        .collect()
}

/// Per-column mean and population standard deviation over the time axis (rows).
pub fn mean_std_over_time(matrix: &Array2<f32>) -> (Array1<f32>, Array1<f32>) {
    let cols = matrix.ncols();
    let mean = matrix
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(cols));
    let std = if matrix.nrows() > 0 {
        matrix.std_axis(Axis(0), 0.0)
    } else {
        Array1::zeros(cols)
    };
    (mean, std)
}

/// Mean and population standard deviation of a scalar series.
pub fn mean_std(values: &[f32]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| (*v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}
