//! Trained-classifier tier: a CNN over a standardized log-mel spectrogram.

use crate::audio::{AudioClip, ANALYSIS_SAMPLE_RATE, MAX_ANALYSIS_SECS};
use crate::cascade::{EmotionPredictor, PredictorInput, PredictorKind};
use crate::config::PredictorConfig;
use crate::dsp::{self, Stft};
use crate::emotion::{EmotionLabel, ScoreDistribution};
use crate::features::{HOP_LENGTH, N_FFT};
use crate::runtime::{self, TensorModel};
use crate::scoring::format_scores;
use crate::{NavarasaError, Result};
use ndarray::{s, Array2, Array3};
use ndarray_stats::QuantileExt;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

pub const CLASSIFIER_N_MELS: usize = 128;
pub const CLASSIFIER_FMAX: f32 = 8000.0;
/// Frames in a 30 s window at hop 512: `int(22050 / 512 * 30)`.
pub const CLASSIFIER_FRAMES: usize = 1291;
const TOP_DB: f32 = 80.0;

/// Maps classifier output indices to labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<EmotionLabel>,
}

impl LabelEncoder {
    /// Requires each of the nine labels exactly once.
    pub fn new(classes: Vec<EmotionLabel>) -> Result<Self> {
        let unique: HashSet<EmotionLabel> = classes.iter().copied().collect();
        if classes.len() != EmotionLabel::COUNT || unique.len() != EmotionLabel::COUNT {
            return Err(NavarasaError::Invalid(format!(
                "label encoder needs the {} emotion labels once each, got {:?}",
                EmotionLabel::COUNT,
                classes.iter().map(|l| l.as_str()).collect::<Vec<_>>()
            )));
        }
        Ok(Self { classes })
    }

    /// Read a JSON array of label strings in output-index order.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let names: Vec<String> = serde_json::from_str(&text)?;
        let classes = names
            .iter()
            .map(|n| n.parse::<EmotionLabel>())
            .collect::<Result<Vec<_>>>()?;
        Self::new(classes)
    }

    /// Sorted label names, the order a fitted scikit-style encoder produces.
    pub fn alphabetical() -> Self {
        let mut classes = EmotionLabel::ALL.to_vec();
        classes.sort_by_key(|l| l.as_str());
        Self { classes }
    }

    pub fn classes(&self) -> &[EmotionLabel] {
        &self.classes
    }
}

pub struct NeuralPredictor {
    model: Box<dyn TensorModel>,
    labels: LabelEncoder,
    stft: Stft,
    mel_fb: Array2<f32>,
}

impl std::fmt::Debug for NeuralPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuralPredictor")
            .field("model", &self.model.model_name())
            .field("labels", &self.labels)
            .finish()
    }
}

impl NeuralPredictor {
    pub fn new(model: Box<dyn TensorModel>, labels: LabelEncoder) -> Self {
        Self {
            model,
            labels,
            stft: Stft::new(N_FFT, HOP_LENGTH),
            mel_fb: dsp::mel_filterbank(
                ANALYSIS_SAMPLE_RATE,
                N_FFT,
                CLASSIFIER_N_MELS,
                0.0,
                CLASSIFIER_FMAX,
            ),
        }
    }

    /// Cheap check: runtime compiled in and both artifacts present.
    pub fn is_available(config: &PredictorConfig) -> bool {
        runtime::runtime_available()
            && config.classifier_model_path().is_file()
            && config.classifier_labels_path().is_file()
    }

    pub fn load(config: &PredictorConfig) -> Result<Self> {
        let model_path = config.classifier_model_path();
        let labels_path = config.classifier_labels_path();
        for p in [&model_path, &labels_path] {
            if !p.is_file() {
                return Err(NavarasaError::PredictorUnavailable(format!(
                    "missing {}",
                    p.display()
                )));
            }
        }
        let labels = LabelEncoder::from_path(&labels_path).map_err(|e| {
            NavarasaError::PredictorUnavailable(format!("{}: {e}", labels_path.display()))
        })?;
        let model = runtime::load_onnx(&model_path, &[1, CLASSIFIER_N_MELS, CLASSIFIER_FRAMES])?;
        Ok(Self::new(model, labels))
    }

    /// `[1, 128, 1291]` standardized dB mel spectrogram, zero padded or cropped in time.
    pub fn classifier_input(&self, clip: &AudioClip) -> Result<Array3<f32>> {
        let clip = clip.prepared(ANALYSIS_SAMPLE_RATE, MAX_ANALYSIS_SECS);
        let power = self.stft.power(clip.samples());
        let mel = dsp::apply_filterbank(&power, &self.mel_fb);
        let peak = *mel
            .max()
            .map_err(|e| NavarasaError::FeatureExtraction(format!("mel spectrogram: {e}")))?;
        let mut db = dsp::power_to_db(&mel, peak, Some(TOP_DB));

        let mean = db.mean().unwrap_or(0.0);
        let std = db.std(0.0);
        if std > 1e-8 {
            db.mapv_inplace(|v| (v - mean) / std);
        } else {
            db.mapv_inplace(|v| v - mean);
        }

        let frames = db.nrows().min(CLASSIFIER_FRAMES);
        let mut input = Array3::<f32>::zeros((1, CLASSIFIER_N_MELS, CLASSIFIER_FRAMES));
        input
            .slice_mut(s![0, .., ..frames])
            .assign(&db.slice(s![..frames, ..]).t());
        Ok(input)
    }
}

impl EmotionPredictor for NeuralPredictor {
    fn kind(&self) -> PredictorKind {
        PredictorKind::Neural
    }

    fn predict(&self, input: &PredictorInput<'_>) -> Result<ScoreDistribution> {
        let tensor = self.classifier_input(input.clip)?;
        let output = self.model.run(tensor.into_dyn())?;
        let probs: Vec<f32> = output.iter().copied().collect();
        if probs.len() != self.labels.classes().len() {
            return Err(NavarasaError::Runtime(format!(
                "classifier produced {} outputs for {} labels",
                probs.len(),
                self.labels.classes().len()
            )));
        }
        let mut raw = [0.0f64; EmotionLabel::COUNT];
        for (label, p) in self.labels.classes().iter().zip(&probs) {
            let p = *p as f64;
            if !p.is_finite() || p < 0.0 {
                return Err(NavarasaError::Runtime(format!(
                    "classifier produced invalid probability {p} for {label}"
                )));
            }
            raw[label.index()] = p;
        }
        if raw.iter().sum::<f64>() <= 0.0 {
            return Err(NavarasaError::Runtime(
                "classifier probabilities sum to zero".into(),
            ));
        }
        let distribution = ScoreDistribution::from_raw(raw)?;
        debug!("classifier top: {}", format_scores(distribution.top(5).into_iter()));
        Ok(distribution)
    }
}
