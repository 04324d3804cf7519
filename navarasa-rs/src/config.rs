//! Where the predictor artifacts live and how the hybrid tier is tuned.

use crate::{NavarasaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL_DIR: &str = "models";
pub const DEFAULT_CLASSIFIER_MODEL: &str = "navarasa_cnn.onnx";
pub const DEFAULT_CLASSIFIER_LABELS: &str = "navarasa_cnn_labels.json";
pub const DEFAULT_EMBEDDING_MODEL: &str = "yamnet.onnx";
pub const DEFAULT_EMBEDDING_CLASS_MAP: &str = "yamnet_class_map.csv";
pub const DEFAULT_CONTEXT_WEIGHT: f64 = 0.3;

/// Cascade configuration. Unset artifact paths resolve to their default file
/// name inside `model_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub model_dir: PathBuf,
    pub classifier_model: Option<PathBuf>,
    /// JSON array of label strings in classifier output order.
    pub classifier_labels: Option<PathBuf>,
    pub embedding_model: Option<PathBuf>,
    /// CSV with `index,mid,display_name` rows.
    pub embedding_class_map: Option<PathBuf>,
    pub context_weight: f64,
    pub disable_neural: bool,
    pub disable_hybrid: bool,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            classifier_model: None,
            classifier_labels: None,
            embedding_model: None,
            embedding_class_map: None,
            context_weight: DEFAULT_CONTEXT_WEIGHT,
            disable_neural: false,
            disable_hybrid: false,
        }
    }
}

impl PredictorConfig {
    pub fn with_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            ..Self::default()
        }
    }

    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `NAVARASA_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let path = |key: &str| var(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        if let Some(dir) = path("NAVARASA_MODEL_DIR") {
            self.model_dir = dir;
        }
        if let Some(p) = path("NAVARASA_CLASSIFIER_MODEL") {
            self.classifier_model = Some(p);
        }
        if let Some(p) = path("NAVARASA_CLASSIFIER_LABELS") {
            self.classifier_labels = Some(p);
        }
        if let Some(p) = path("NAVARASA_EMBEDDING_MODEL") {
            self.embedding_model = Some(p);
        }
        if let Some(p) = path("NAVARASA_EMBEDDING_CLASS_MAP") {
            self.embedding_class_map = Some(p);
        }
        if let Some(raw) = var("NAVARASA_CONTEXT_WEIGHT") {
            match raw.trim().parse::<f64>() {
                Ok(w) if w.is_finite() && w >= 0.0 => self.context_weight = w,
                _ => tracing::warn!("ignoring NAVARASA_CONTEXT_WEIGHT={raw:?}"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.context_weight.is_finite() || self.context_weight < 0.0 {
            return Err(NavarasaError::Invalid(format!(
                "context_weight must be a non-negative number, got {}",
                self.context_weight
            )));
        }
        Ok(())
    }

    fn resolve(&self, explicit: &Option<PathBuf>, default_name: &str) -> PathBuf {
        explicit
            .clone()
            .unwrap_or_else(|| self.model_dir.join(default_name))
    }

    pub fn classifier_model_path(&self) -> PathBuf {
        self.resolve(&self.classifier_model, DEFAULT_CLASSIFIER_MODEL)
    }

    pub fn classifier_labels_path(&self) -> PathBuf {
        self.resolve(&self.classifier_labels, DEFAULT_CLASSIFIER_LABELS)
    }

    pub fn embedding_model_path(&self) -> PathBuf {
        self.resolve(&self.embedding_model, DEFAULT_EMBEDDING_MODEL)
    }

    pub fn embedding_class_map_path(&self) -> PathBuf {
        self.resolve(&self.embedding_class_map, DEFAULT_EMBEDDING_CLASS_MAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_resolve_inside_model_dir() {
        let cfg = PredictorConfig::with_model_dir("/opt/navarasa");
        assert_eq!(
            cfg.classifier_model_path(),
            PathBuf::from("/opt/navarasa/navarasa_cnn.onnx")
        );
        assert_eq!(
            cfg.embedding_class_map_path(),
            PathBuf::from("/opt/navarasa/yamnet_class_map.csv")
        );
        assert_eq!(cfg.context_weight, 0.3);
        assert!(!cfg.disable_neural && !cfg.disable_hybrid);
    }

    #[test]
    fn explicit_paths_win() {
        let cfg = PredictorConfig {
            embedding_model: Some(PathBuf::from("elsewhere/yam.onnx")),
            ..PredictorConfig::default()
        };
        assert_eq!(cfg.embedding_model_path(), PathBuf::from("elsewhere/yam.onnx"));
        assert_eq!(cfg.classifier_labels_path(), PathBuf::from("models/navarasa_cnn_labels.json"));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("NAVARASA_MODEL_DIR", "/srv/models"),
            ("NAVARASA_CLASSIFIER_MODEL", "/srv/cnn.onnx"),
            ("NAVARASA_CONTEXT_WEIGHT", "0.5"),
        ]
        .into_iter()
        .collect();
        let mut cfg = PredictorConfig::default();
        cfg.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(cfg.classifier_model_path(), PathBuf::from("/srv/cnn.onnx"));
        assert_eq!(cfg.embedding_model_path(), PathBuf::from("/srv/models/yamnet.onnx"));
        assert_eq!(cfg.context_weight, 0.5);
    }

    #[test]
    fn bad_context_weight_from_env_is_ignored() {
        let mut cfg = PredictorConfig::default();
        cfg.apply_env(|k| (k == "NAVARASA_CONTEXT_WEIGHT").then(|| "lots".to_string()));
        assert_eq!(cfg.context_weight, DEFAULT_CONTEXT_WEIGHT);
    }

    #[test]
    fn load_reads_partial_json_and_defaults_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("navarasa.json");
        std::fs::write(&path, r#"{ "model_dir": "m", "disable_hybrid": true }"#).unwrap();
        let cfg = PredictorConfig::load(&path).unwrap();
        assert_eq!(cfg.model_dir, PathBuf::from("m"));
        assert!(cfg.disable_hybrid);
        assert_eq!(cfg.context_weight, DEFAULT_CONTEXT_WEIGHT);

        let missing = PredictorConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(missing, PredictorConfig::default());
    }

    #[test]
    fn load_rejects_negative_weight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "context_weight": -1.0 }"#).unwrap();
        assert!(matches!(
            PredictorConfig::load(&path),
            Err(NavarasaError::Invalid(_))
        ));
    }
}
