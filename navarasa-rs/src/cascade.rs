//! Predictor selection.
//!
//! The first usable tier wins, in order: trained classifier, embedding hybrid,
//! rule-based scorer. Selection happens at most once per [`Cascade`]; a tier
//! that cannot load is logged and skipped, and the rule-based tier always
//! loads, so selection itself never fails.

use crate::audio::AudioClip;
use crate::config::PredictorConfig;
use crate::emotion::ScoreDistribution;
use crate::features::FeatureSet;
use crate::hybrid::HybridPredictor;
use crate::neural::NeuralPredictor;
use crate::scoring::RuleBasedScorer;
use crate::Result;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    Neural,
    Hybrid,
    RuleBased,
}

impl PredictorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictorKind::Neural => "neural",
            PredictorKind::Hybrid => "hybrid",
            PredictorKind::RuleBased => "rule_based",
        }
    }
}

impl fmt::Display for PredictorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a predictor gets to look at: the clip and its already extracted descriptors.
#[derive(Debug, Clone, Copy)]
pub struct PredictorInput<'a> {
    pub clip: &'a AudioClip,
    pub features: &'a FeatureSet,
}

/// A strategy that turns a clip into a full distribution over the nine labels.
pub trait EmotionPredictor: Send + Sync {
    fn kind(&self) -> PredictorKind;
    fn predict(&self, input: &PredictorInput<'_>) -> Result<ScoreDistribution>;
}

/// The selected tier.
#[derive(Debug)]
pub enum Predictor {
    Neural(NeuralPredictor),
    Hybrid(HybridPredictor),
    RuleBased(RuleBasedScorer),
}

impl Predictor {
    /// Try the tiers in order and keep the first one that loads.
    pub fn resolve(config: &PredictorConfig) -> Self {
        if config.disable_neural {
            info!("neural predictor disabled by configuration");
        } else if NeuralPredictor::is_available(config) {
            match NeuralPredictor::load(config) {
                Ok(p) => {
                    info!("using neural predictor ({:?})", p);
                    return Predictor::Neural(p);
                }
                Err(e) => warn!("neural predictor failed to load: {e}"),
            }
        } else {
            info!(
                "neural predictor unavailable (needs {} and {})",
                config.classifier_model_path().display(),
                config.classifier_labels_path().display()
            );
        }

        if config.disable_hybrid {
            info!("hybrid predictor disabled by configuration");
        } else if HybridPredictor::is_available(config) {
            match HybridPredictor::load(config) {
                Ok(p) => {
                    info!("using hybrid predictor ({:?})", p);
                    return Predictor::Hybrid(p);
                }
                Err(e) => warn!("hybrid predictor failed to load: {e}"),
            }
        } else {
            info!(
                "hybrid predictor unavailable (needs {} and {})",
                config.embedding_model_path().display(),
                config.embedding_class_map_path().display()
            );
        }

        info!("using rule-based predictor");
        Predictor::RuleBased(RuleBasedScorer::new())
    }

    fn inner(&self) -> &dyn EmotionPredictor {
        match self {
            Predictor::Neural(p) => p,
            Predictor::Hybrid(p) => p,
            Predictor::RuleBased(p) => p,
        }
    }
}

impl EmotionPredictor for Predictor {
    fn kind(&self) -> PredictorKind {
        self.inner().kind()
    }

    fn predict(&self, input: &PredictorInput<'_>) -> Result<ScoreDistribution> {
        self.inner().predict(input)
    }
}

/// Lazily selects a [`Predictor`] once; every later call sees the same one.
#[derive(Debug)]
pub struct Cascade {
    config: PredictorConfig,
    selected: OnceLock<Predictor>,
}

impl Cascade {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            selected: OnceLock::new(),
        }
    }

    /// A cascade whose selection is already made.
    pub fn with_predictor(config: PredictorConfig, predictor: Predictor) -> Self {
        Self {
            config,
            selected: OnceLock::from(predictor),
        }
    }

    /// Resolve on first use. Concurrent first callers block until the single
    /// resolution finishes.
    pub fn predictor(&self) -> &Predictor {
        self.selected.get_or_init(|| Predictor::resolve(&self.config))
    }

    pub fn kind(&self) -> PredictorKind {
        self.predictor().kind()
    }

    pub fn is_resolved(&self) -> bool {
        self.selected.get().is_some()
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }
}

lazy_static! {
    static ref GLOBAL: Arc<Cascade> = Arc::new(Cascade::new(PredictorConfig::from_env()));
}

/// Process-wide cascade configured from the environment.
pub fn global() -> Arc<Cascade> {
    Arc::clone(&GLOBAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid::ClassMap;
    use crate::neural::LabelEncoder;
    use crate::runtime::testing::CannedModel;

    #[test]
    fn empty_model_dir_falls_back_to_rule_based() {
        let dir = tempfile::tempdir().unwrap();
        let cascade = Cascade::new(PredictorConfig::with_model_dir(dir.path()));
        assert!(!cascade.is_resolved());
        assert_eq!(cascade.kind(), PredictorKind::RuleBased);
        assert!(cascade.is_resolved());
    }

    #[test]
    fn unloadable_artifacts_fall_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("navarasa_cnn.onnx"), b"not a model").unwrap();
        std::fs::write(dir.path().join("navarasa_cnn_labels.json"), b"[]").unwrap();
        std::fs::write(dir.path().join("yamnet.onnx"), b"not a model").unwrap();
        std::fs::write(dir.path().join("yamnet_class_map.csv"), b"index,mid,display_name\n").unwrap();
        let cascade = Cascade::new(PredictorConfig::with_model_dir(dir.path()));
        assert_eq!(cascade.kind(), PredictorKind::RuleBased);
    }

    #[test]
    fn disable_flags_skip_tiers() {
        let cfg = PredictorConfig {
            disable_neural: true,
            disable_hybrid: true,
            ..PredictorConfig::default()
        };
        assert!(matches!(Predictor::resolve(&cfg), Predictor::RuleBased(_)));
    }

    #[test]
    fn selection_happens_once_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let cascade = Arc::new(Cascade::new(PredictorConfig::with_model_dir(dir.path())));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&cascade);
                std::thread::spawn(move || c.predictor() as *const Predictor as usize)
            })
            .collect();
        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn preset_predictor_is_kept() {
        let neural = NeuralPredictor::new(
            Box::new(CannedModel::new(vec![0.1; 9], vec![1, 9])),
            LabelEncoder::alphabetical(),
        );
        let cascade = Cascade::with_predictor(PredictorConfig::default(), Predictor::Neural(neural));
        assert!(cascade.is_resolved());
        assert_eq!(cascade.kind(), PredictorKind::Neural);

        let hybrid = HybridPredictor::new(
            Box::new(CannedModel::new(vec![0.0; 2], vec![1, 2])),
            ClassMap::new(vec!["Music".into(), "Silence".into()]),
            0.3,
        );
        assert_eq!(Predictor::Hybrid(hybrid).kind(), PredictorKind::Hybrid);
    }

    #[test]
    fn kind_names() {
        assert_eq!(PredictorKind::RuleBased.to_string(), "rule_based");
        assert_eq!(
            serde_json::to_value(PredictorKind::Neural).unwrap(),
            serde_json::json!("neural")
        );
    }

    #[test]
    fn global_handle_is_shared() {
        assert!(Arc::ptr_eq(&global(), &global()));
    }
}
