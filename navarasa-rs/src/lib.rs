//! navarasa Rust core library
//!
//! Classifies a short music clip into one of the nine Navarasa emotions.
//! A [`Cascade`] looks, once per process, for the best predictor that can run
//! here (trained classifier, embedding hybrid, rule-based scorer) and the
//! [`EmotionAnalyzer`] facade runs the selected predictor over decoded clips.

pub mod analyzer;
pub mod audio;
pub mod cascade;
pub mod config;
pub mod dsp;
pub mod emotion;
pub mod features;
pub mod hybrid;
pub mod neural;
pub mod runtime;
pub mod scoring;

pub use analyzer::{expand_audio_files, EmotionAnalyzer, FileFeatures, FilePrediction};
pub use audio::{AudioClip, ANALYSIS_SAMPLE_RATE, MAX_ANALYSIS_SECS};
pub use cascade::{Cascade, EmotionPredictor, Predictor, PredictorInput, PredictorKind};
pub use config::PredictorConfig;
pub use emotion::{EmotionLabel, FeatureSummary, PredictionResult, ScoreDistribution};
pub use features::{FeatureExtractor, FeatureSet};
pub use hybrid::{ClassMap, HybridPredictor};
pub use neural::{LabelEncoder, NeuralPredictor};
pub use runtime::TensorModel;
pub use scoring::RuleBasedScorer;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SUPPORTED_EXTS: &[&str] = &[".wav", ".mp3", ".flac", ".ogg", ".m4a"];

#[derive(Debug, Error)]
pub enum NavarasaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid argument: {0}")]
    Invalid(String),
    #[error("Audio decode failed: {0}")]
    Decode(String),
    #[error("Feature extraction failed: {0}")]
    FeatureExtraction(String),
    /// Only produced while the cascade resolves; never escapes [`Cascade`].
    #[error("Predictor unavailable: {0}")]
    PredictorUnavailable(String),
    #[error("Model runtime error: {0}")]
    Runtime(String),
    #[error("Prediction failed in {predictor} predictor")]
    Prediction {
        predictor: PredictorKind,
        #[source]
        source: Box<NavarasaError>,
    },
    #[error("Failed to analyze {}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: Box<NavarasaError>,
    },
}

impl NavarasaError {
    /// Attach the file being processed, keeping `self` as the source.
    pub fn in_file(path: &Path, source: NavarasaError) -> Self {
        NavarasaError::File {
            path: path.to_path_buf(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, NavarasaError>;

/// Predict with the process-wide cascade (built from [`PredictorConfig::from_env`]).
pub fn predict(clip: &AudioClip) -> Result<PredictionResult> {
    EmotionAnalyzer::shared().predict(clip)
}

/// Extract the descriptor feature set of a clip. Pure; safe to call concurrently.
pub fn extract_features(clip: &AudioClip) -> Result<FeatureSet> {
    EmotionAnalyzer::shared().extract_features(clip)
}
