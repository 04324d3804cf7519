//! Prediction facade: decode, extract descriptors, run the selected predictor.

use crate::audio::AudioClip;
use crate::cascade::{self, Cascade, EmotionPredictor, PredictorInput, PredictorKind};
use crate::config::PredictorConfig;
use crate::emotion::PredictionResult;
use crate::features::{FeatureExtractor, FeatureSet};
use crate::{NavarasaError, Result, SUPPORTED_EXTS};
use lazy_static::lazy_static;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePrediction {
    pub file: PathBuf,
    pub result: PredictionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFeatures {
    pub file: PathBuf,
    pub features: FeatureSet,
}

#[derive(Debug)]
pub struct EmotionAnalyzer {
    cascade: Arc<Cascade>,
    extractor: FeatureExtractor,
}

lazy_static! {
    static ref SHARED: EmotionAnalyzer = EmotionAnalyzer::with_cascade(cascade::global());
}

impl Default for EmotionAnalyzer {
    /// Uses the process-wide cascade.
    fn default() -> Self {
        Self::with_cascade(cascade::global())
    }
}

impl EmotionAnalyzer {
    /// An analyzer with its own cascade over `config`.
    pub fn new(config: PredictorConfig) -> Self {
        Self::with_cascade(Arc::new(Cascade::new(config)))
    }

    pub fn with_cascade(cascade: Arc<Cascade>) -> Self {
        Self {
            cascade,
            extractor: FeatureExtractor::new(),
        }
    }

    pub fn shared() -> &'static EmotionAnalyzer {
        &SHARED
    }

    /// Resolves the cascade if nothing has been predicted yet.
    pub fn predictor_kind(&self) -> PredictorKind {
        self.cascade.kind()
    }

    pub fn extract_features(&self, clip: &AudioClip) -> Result<FeatureSet> {
        self.extractor.extract(clip)
    }

    /// Run the selected predictor. A failing predictor is reported as
    /// [`NavarasaError::Prediction`]; there is no fallback to a lower tier.
    pub fn predict(&self, clip: &AudioClip) -> Result<PredictionResult> {
        let features = self.extract_features(clip)?;
        let summary = features.summary();
        debug!(
            tempo = summary.tempo,
            energy = summary.energy,
            brightness = summary.brightness,
            "features"
        );
        let predictor = self.cascade.predictor();
        let input = PredictorInput {
            clip,
            features: &features,
        };
        let distribution = predictor
            .predict(&input)
            .map_err(|e| NavarasaError::Prediction {
                predictor: predictor.kind(),
                source: Box::new(e),
            })?;
        let result = PredictionResult::new(&distribution, summary);
        info!(
            predictor = %predictor.kind(),
            "{} ({:.1}%)",
            result.primary_emotion,
            result.confidence * 100.0
        );
        Ok(result)
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<PredictionResult> {
        self.predict(&AudioClip::decode(bytes)?)
    }

    /// Decode and predict one file. Any failure is wrapped in [`NavarasaError::File`].
    pub fn predict_file(&self, path: &Path) -> Result<PredictionResult> {
        AudioClip::from_path(path)
            .and_then(|clip| self.predict(&clip))
            .map_err(|e| NavarasaError::in_file(path, e))
    }

    pub fn extract_file(&self, path: &Path) -> Result<FeatureSet> {
        AudioClip::from_path(path)
            .and_then(|clip| self.extract_features(&clip))
            .map_err(|e| NavarasaError::in_file(path, e))
    }

    /// Expand files and directories, then predict every supported file in parallel.
    /// The first failure aborts the batch.
    pub fn predict_paths(&self, paths: Vec<PathBuf>) -> Result<Vec<FilePrediction>> {
        let files = expand_audio_files(paths)?;
        files
            .into_par_iter()
            .map(|file| {
                let result = self.predict_file(&file)?;
                Ok(FilePrediction { file, result })
            })
            .collect()
    }

    pub fn extract_paths(&self, paths: Vec<PathBuf>) -> Result<Vec<FileFeatures>> {
        let files = expand_audio_files(paths)?;
        files
            .into_par_iter()
            .map(|file| {
                let features = self.extract_file(&file)?;
                Ok(FileFeatures { file, features })
            })
            .collect()
    }
}

/// Recursively expand audio files from provided paths
pub fn expand_audio_files(inputs: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for p in inputs {
        if p.is_file() {
            if is_supported(&p) {
                out.push(p);
            }
        } else if p.is_dir() {
            for entry in WalkDir::new(&p).sort_by_file_name() {
                let e = entry.map_err(|e| NavarasaError::Invalid(e.to_string()))?;
                if e.file_type().is_file() && is_supported(e.path()) {
                    out.push(e.path().to_path_buf());
                }
            }
        } else {
            return Err(NavarasaError::Invalid(format!(
                "Path not found: {}",
                p.display()
            )));
        }
    }
    Ok(out)
}

pub fn is_supported(p: &Path) -> bool {
    p.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = format!(".{}", ext).to_lowercase();
            SUPPORTED_EXTS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
