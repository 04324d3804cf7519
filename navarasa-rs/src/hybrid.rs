//! Hybrid tier: descriptor thresholds plus sound-event context from an
//! embedding model (YAMNet-style class scores over 0.96 s frames).
//!
//! The descriptor thresholds here are tuned separately from
//! [`crate::scoring`] and floor each emotion with `max(0.01, score)` instead of
//! an additive floor.

use crate::audio::{AudioClip, MAX_ANALYSIS_SECS};
use crate::cascade::{EmotionPredictor, PredictorInput, PredictorKind};
use crate::config::PredictorConfig;
use crate::emotion::{EmotionLabel, ScoreDistribution};
use crate::runtime::{self, TensorModel};
use crate::scoring::{format_scores, ScoringInputs, SCORE_FLOOR};
use crate::{NavarasaError, Result};
use ndarray::{Array1, Axis, Ix2};
use std::path::Path;
use tracing::debug;

pub const EMBEDDING_SAMPLE_RATE: u32 = 16_000;
/// 0.96 s analysis window.
pub const EMBEDDING_WINDOW: usize = 15_600;
/// 0.48 s hop.
pub const EMBEDDING_HOP: usize = 7_680;
/// Fixed 30 s waveform input; shorter clips are zero padded.
pub const EMBEDDING_INPUT_LEN: usize = 480_000;

/// Sound-event classes that hint at each emotion. Matched against class display names.
pub const EMOTION_KEYWORDS: [(EmotionLabel, &[&str]); EmotionLabel::COUNT] = [
    (
        EmotionLabel::Hasya,
        &[
            "music",
            "happy_music",
            "pop_music",
            "upbeat",
            "dance_music",
            "disco",
            "laughter",
            "giggle",
            "child_speech",
            "celebration",
        ],
    ),
    (
        EmotionLabel::Karuna,
        &["sad_music", "crying", "sobbing", "sigh", "rain", "melancholy", "lonely"],
    ),
    (
        EmotionLabel::Raudra,
        &["angry_music", "heavy_metal", "rock_music", "shout", "scream", "roar", "thunder"],
    ),
    (
        EmotionLabel::Veera,
        &["march", "drum", "battle_cry", "trumpet", "powerful_music", "epic_music"],
    ),
    (
        EmotionLabel::Bhayanaka,
        &["scary_music", "horror", "suspense", "scream", "gasp", "wind", "howl"],
    ),
    (
        EmotionLabel::Shanta,
        &[
            "calm_music",
            "meditation_music",
            "ambient_music",
            "silence",
            "bird",
            "stream",
            "classical_music",
        ],
    ),
    (
        EmotionLabel::Shringara,
        &["romantic_music", "slow_music", "jazz", "saxophone", "violin", "piano"],
    ),
    (
        EmotionLabel::Adbhuta,
        &["ethereal_music", "electronic_music", "synthesizer", "bells", "chime", "mystical"],
    ),
    (
        EmotionLabel::Bibhatsa,
        &["dissonant", "noise", "industrial", "grinding", "harsh"],
    ),
];

fn normalize_name(s: &str) -> String {
    s.trim().to_lowercase().replace('_', " ")
}

/// Whole display name, or one of its `,` / `/` separated parts, equals the keyword.
fn name_matches(display_name: &str, keyword: &str) -> bool {
    let name = normalize_name(display_name);
    let keyword = normalize_name(keyword);
    name == keyword
        || name
            .split(|c: char| c == ',' || c == '/')
            .any(|part| part.trim() == keyword)
}

/// Display names of the embedding model's output classes, by output index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMap {
    names: Vec<String>,
}

impl ClassMap {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Parse `index,mid,display_name` rows. A header row and blank lines are skipped;
    /// display names may be double-quoted and contain commas.
    pub fn parse_csv(text: &str) -> Result<Self> {
        let mut rows: Vec<(usize, String)> = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(3, ',');
            let index = parts.next().unwrap_or("").trim();
            let _mid = parts.next();
            let name = parts.next().map(str::trim).ok_or_else(|| {
                NavarasaError::Invalid(format!("class map line {}: expected 3 columns", lineno + 1))
            })?;
            let Ok(index) = index.parse::<usize>() else {
                if rows.is_empty() {
                    continue; // header
                }
                return Err(NavarasaError::Invalid(format!(
                    "class map line {}: bad index {index:?}",
                    lineno + 1
                )));
            };
            let name = name
                .strip_prefix('"')
                .and_then(|n| n.strip_suffix('"'))
                .unwrap_or(name)
                .replace("\"\"", "\"");
            rows.push((index, name));
        }
        rows.sort_by_key(|(i, _)| *i);
        if rows.iter().enumerate().any(|(pos, (i, _))| pos != *i) {
            return Err(NavarasaError::Invalid(
                "class map indices must run 0..n without gaps".into(),
            ));
        }
        if rows.is_empty() {
            return Err(NavarasaError::Invalid("class map is empty".into()));
        }
        Ok(Self::new(rows.into_iter().map(|(_, n)| n).collect()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::parse_csv(&std::fs::read_to_string(path)?)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Indices of classes whose names match any of `keywords`.
    pub fn matching(&self, keywords: &[&str]) -> Vec<usize> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, name)| keywords.iter().any(|k| name_matches(name, k)))
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct HybridPredictor {
    embedder: Box<dyn TensorModel>,
    class_map: ClassMap,
    emotion_classes: [Vec<usize>; EmotionLabel::COUNT],
    context_weight: f64,
}

impl std::fmt::Debug for HybridPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridPredictor")
            .field("embedder", &self.embedder.model_name())
            .field("classes", &self.class_map.len())
            .field("context_weight", &self.context_weight)
            .finish()
    }
}

impl HybridPredictor {
    pub fn new(embedder: Box<dyn TensorModel>, class_map: ClassMap, context_weight: f64) -> Self {
        let mut emotion_classes: [Vec<usize>; EmotionLabel::COUNT] = Default::default();
        for (label, keywords) in EMOTION_KEYWORDS {
            emotion_classes[label.index()] = class_map.matching(keywords);
        }
        Self {
            embedder,
            class_map,
            emotion_classes,
            context_weight,
        }
    }

    pub fn is_available(config: &PredictorConfig) -> bool {
        runtime::runtime_available()
            && config.embedding_model_path().is_file()
            && config.embedding_class_map_path().is_file()
    }

    pub fn load(config: &PredictorConfig) -> Result<Self> {
        let model_path = config.embedding_model_path();
        let map_path = config.embedding_class_map_path();
        for p in [&model_path, &map_path] {
            if !p.is_file() {
                return Err(NavarasaError::PredictorUnavailable(format!(
                    "missing {}",
                    p.display()
                )));
            }
        }
        let class_map = ClassMap::from_path(&map_path).map_err(|e| {
            NavarasaError::PredictorUnavailable(format!("{}: {e}", map_path.display()))
        })?;
        let embedder = runtime::load_onnx(&model_path, &[EMBEDDING_INPUT_LEN])?;
        Ok(Self::new(embedder, class_map, config.context_weight))
    }

    /// Descriptor-threshold scores indexed by [`EmotionLabel::index`], before context and flooring.
    pub fn feature_scores(inputs: &ScoringInputs) -> [f64; EmotionLabel::COUNT] {
        let (t, e, b, zcr) = (inputs.tempo, inputs.energy, inputs.brightness, inputs.zcr);
        let within = |x: f64, lo: f64, hi: f64| (lo..=hi).contains(&x);
        let capped = |x: f64| x.min(1.0);
        let mut s = [0.0; EmotionLabel::COUNT];

        let k = &mut s[EmotionLabel::Karuna.index()];
        if t < 90.0 {
            *k += 0.35 * (1.0 - t / 90.0);
        }
        if e < 0.08 {
            *k += 0.40 * (1.0 - e / 0.08);
        }
        if b < 1800.0 {
            *k += 0.25 * (1.0 - b / 1800.0);
        }

        let h = &mut s[EmotionLabel::Hasya.index()];
        if t > 120.0 {
            *h += 0.40 * capped((t - 120.0) / 80.0);
        }
        if e > 0.10 {
            *h += 0.40 * capped((e - 0.10) / 0.15);
        }
        if b > 2500.0 {
            *h += 0.20 * capped((b - 2500.0) / 2000.0);
        }

        let sh = &mut s[EmotionLabel::Shanta.index()];
        if within(t, 60.0, 95.0) {
            *sh += 0.40 * (1.0 - (t - 77.5).abs() / 17.5);
        }
        if within(e, 0.03, 0.09) {
            *sh += 0.35;
        }
        if b < 2000.0 {
            *sh += 0.25;
        }

        let r = &mut s[EmotionLabel::Raudra.index()];
        if e > 0.15 {
            *r += 0.50 * capped((e - 0.15) / 0.10);
        }
        if zcr > 0.10 {
            *r += 0.35 * capped((zcr - 0.10) / 0.08);
        }
        if t > 140.0 && b > 3000.0 {
            *r += 0.15;
        }

        let v = &mut s[EmotionLabel::Veera.index()];
        if within(t, 115.0, 145.0) {
            *v += 0.45 * (1.0 - (t - 130.0).abs() / 15.0);
        }
        if within(e, 0.11, 0.18) {
            *v += 0.40;
        }
        if within(b, 2200.0, 3200.0) {
            *v += 0.15;
        }

        let sr = &mut s[EmotionLabel::Shringara.index()];
        if within(t, 85.0, 115.0) {
            *sr += 0.35;
        }
        if within(e, 0.05, 0.11) {
            *sr += 0.35;
        }
        if within(b, 1500.0, 2500.0) {
            *sr += 0.30;
        }

        let bh = &mut s[EmotionLabel::Bhayanaka.index()];
        if zcr > 0.11 {
            *bh += 0.40 * capped((zcr - 0.11) / 0.07);
        }
        if b > 3000.0 || b < 1000.0 {
            *bh += 0.30;
        }
        if e < 0.05 || e > 0.16 {
            *bh += 0.30;
        }

        let a = &mut s[EmotionLabel::Adbhuta.index()];
        if b > 3200.0 {
            *a += 0.40 * capped((b - 3200.0) / 1500.0);
        }
        if within(t, 100.0, 130.0) {
            *a += 0.30;
        }
        if within(e, 0.08, 0.13) {
            *a += 0.30;
        }

        let bi = &mut s[EmotionLabel::Bibhatsa.index()];
        if zcr > 0.13 {
            *bi += 0.40 * capped((zcr - 0.13) / 0.05);
        }
        if b > 3800.0 {
            *bi += 0.35;
        }
        if e > 0.17 {
            *bi += 0.25;
        }

        s
    }

    /// Per-emotion context in `[0, 1]`: the strongest averaged class score among
    /// the emotion's keyword classes.
    pub fn embedding_context(&self, clip: &AudioClip) -> Result<[f64; EmotionLabel::COUNT]> {
        let clip = clip.prepared(EMBEDDING_SAMPLE_RATE, MAX_ANALYSIS_SECS);
        let real_len = clip.samples().len().min(EMBEDDING_INPUT_LEN);
        let mut waveform = Array1::<f32>::zeros(EMBEDDING_INPUT_LEN);
        waveform
            .slice_mut(ndarray::s![..real_len])
            .assign(&ndarray::ArrayView1::from(&clip.samples()[..real_len]));

        let output = self.embedder.run(waveform.into_dyn())?;
        let scores = output
            .into_dimensionality::<Ix2>()
            .map_err(|e| NavarasaError::Runtime(format!("embedding scores: {e}")))?;
        if scores.ncols() != self.class_map.len() {
            return Err(NavarasaError::Runtime(format!(
                "embedding model produced {} classes, class map lists {}",
                scores.ncols(),
                self.class_map.len()
            )));
        }
        if scores.nrows() == 0 {
            return Err(NavarasaError::Runtime("embedding model produced no frames".into()));
        }
        let real_frames =
            (1 + real_len.saturating_sub(EMBEDDING_WINDOW) / EMBEDDING_HOP).min(scores.nrows());
        let averaged = scores
            .slice(ndarray::s![..real_frames, ..])
            .mean_axis(Axis(0))
            .ok_or_else(|| NavarasaError::Runtime("empty embedding frames".into()))?;

        let mut context = [0.0f64; EmotionLabel::COUNT];
        for label in EmotionLabel::ALL {
            context[label.index()] = self.emotion_classes[label.index()]
                .iter()
                .filter_map(|&c| averaged.get(c).copied())
                .filter(|v| v.is_finite())
                .fold(0.0f64, |acc, v| acc.max((v as f64).clamp(0.0, 1.0)));
        }
        Ok(context)
    }
}

impl EmotionPredictor for HybridPredictor {
    fn kind(&self) -> PredictorKind {
        PredictorKind::Hybrid
    }

    fn predict(&self, input: &PredictorInput<'_>) -> Result<ScoreDistribution> {
        let inputs = ScoringInputs::from_features(input.features);
        let mut scores = Self::feature_scores(&inputs);
        let context = self.embedding_context(input.clip)?;
        debug!(
            "embedding context: {}",
            format_scores(EmotionLabel::ALL.into_iter().zip(context))
        );
        for (score, ctx) in scores.iter_mut().zip(context) {
            *score = (*score + self.context_weight * ctx).max(SCORE_FLOOR);
        }
        debug!("raw scores: {}", format_scores(EmotionLabel::ALL.into_iter().zip(scores)));
        ScoreDistribution::from_raw(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use crate::runtime::testing::{CannedModel, FailingModel};

    const CSV: &str = "index,mid,display_name\n\
0,/m/09x0r,Speech\n\
1,/m/04rlf,Music\n\
2,/m/0463cq4,\"Crying, sobbing\"\n\
3,/m/06j64v,Middle Eastern music\n\
4,/m/05r5wn,Heavy metal\n\
5,/m/0l14jd,Piano\n";

    fn inputs(tempo: f64, energy: f64, brightness: f64, zcr: f64) -> ScoringInputs {
        ScoringInputs {
            tempo,
            energy,
            brightness,
            zcr,
            rolloff: brightness * 2.0,
            mfcc_variance: 60.0,
        }
    }

    fn clip(secs: f32) -> AudioClip {
        let sr = 22_050u32;
        let samples = (0..(secs * sr as f32) as usize)
            .map(|i| 0.2 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sr as f32).sin())
            .collect();
        AudioClip::new(samples, sr).unwrap()
    }

    fn frames(rows: usize, row: &[f32]) -> CannedModel {
        let data = row.iter().copied().cycle().take(rows * row.len()).collect();
        CannedModel::new(data, vec![rows, row.len()])
    }

    #[test]
    fn parses_quoted_class_names() {
        let map = ClassMap::parse_csv(CSV).unwrap();
        assert_eq!(map.len(), 6);
        assert_eq!(map.name(2), Some("Crying, sobbing"));
        assert!(ClassMap::parse_csv("index,mid,display_name\n0,/m/x,A\n2,/m/y,B\n").is_err());
        assert!(ClassMap::parse_csv("index,mid,display_name\n").is_err());
    }

    #[test]
    fn keywords_match_names_and_segments_only() {
        let map = ClassMap::parse_csv(CSV).unwrap();
        assert_eq!(map.matching(&["crying"]), vec![2]);
        assert_eq!(map.matching(&["heavy_metal"]), vec![4]);
        // "music" must not pick up every genre
        assert_eq!(map.matching(&["music"]), vec![1]);
        assert!(map.matching(&["rain"]).is_empty());
    }

    #[test]
    fn feature_scores_follow_bands() {
        let sad = HybridPredictor::feature_scores(&inputs(60.0, 0.02, 1200.0, 0.03));
        let top = EmotionLabel::ALL
            .into_iter()
            .max_by(|a, b| sad[a.index()].total_cmp(&sad[b.index()]))
            .unwrap();
        assert_eq!(top, EmotionLabel::Karuna);

        let heroic = HybridPredictor::feature_scores(&inputs(130.0, 0.14, 2600.0, 0.05));
        assert!((heroic[EmotionLabel::Veera.index()] - (0.45 + 0.40 + 0.15)).abs() < 1e-12);
    }

    #[test]
    fn feature_terms_are_capped() {
        let extreme = HybridPredictor::feature_scores(&inputs(1000.0, 10.0, 50_000.0, 1.0));
        assert!((extreme[EmotionLabel::Hasya.index()] - 1.0).abs() < 1e-12);
        assert!((extreme[EmotionLabel::Raudra.index()] - 1.0).abs() < 1e-12);
        assert!((extreme[EmotionLabel::Bibhatsa.index()] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn context_averages_real_frames_and_takes_keyword_max() {
        // 61 frames cover 30 s; a 2 s clip covers 3 of them
        let row = [0.0, 0.9, 0.6, 0.0, 0.2, 0.4];
        let predictor =
            HybridPredictor::new(Box::new(frames(61, &row)), ClassMap::parse_csv(CSV).unwrap(), 0.3);
        let ctx = predictor.embedding_context(&clip(2.0)).unwrap();
        assert!((ctx[EmotionLabel::Hasya.index()] - 0.9).abs() < 1e-6);
        assert!((ctx[EmotionLabel::Karuna.index()] - 0.6).abs() < 1e-6);
        assert!((ctx[EmotionLabel::Raudra.index()] - 0.2).abs() < 1e-6);
        assert!((ctx[EmotionLabel::Shringara.index()] - 0.4).abs() < 1e-6);
        assert_eq!(ctx[EmotionLabel::Shanta.index()], 0.0);
    }

    #[test]
    fn context_shifts_the_distribution() {
        let clip = clip(2.0);
        let features = FeatureExtractor::new().extract(&clip).unwrap();
        let input = PredictorInput {
            clip: &clip,
            features: &features,
        };
        let map = ClassMap::parse_csv(CSV).unwrap();
        let quiet = HybridPredictor::new(Box::new(frames(61, &[0.0; 6])), map.clone(), 0.3);
        let crying = HybridPredictor::new(
            Box::new(frames(61, &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0])),
            map,
            0.3,
        );
        let base = quiet.predict(&input).unwrap();
        let sad = crying.predict(&input).unwrap();
        assert!((sad.sum() - 1.0).abs() < 1e-9);
        assert!(sad.get(EmotionLabel::Karuna) > base.get(EmotionLabel::Karuna));
        assert!(base.iter().all(|(_, v)| v > 0.0));
    }

    #[test]
    fn class_count_mismatch_is_a_runtime_error() {
        let predictor = HybridPredictor::new(
            Box::new(frames(61, &[0.1; 4])),
            ClassMap::parse_csv(CSV).unwrap(),
            0.3,
        );
        assert!(matches!(
            predictor.embedding_context(&clip(1.0)),
            Err(NavarasaError::Runtime(_))
        ));
    }

    #[test]
    fn embedder_failure_propagates() {
        let predictor =
            HybridPredictor::new(Box::new(FailingModel), ClassMap::parse_csv(CSV).unwrap(), 0.3);
        assert!(matches!(
            predictor.embedding_context(&clip(1.0)),
            Err(NavarasaError::Runtime(_))
        ));
    }

    #[test]
    fn unavailable_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PredictorConfig::with_model_dir(dir.path());
        assert!(!HybridPredictor::is_available(&cfg));
        assert!(matches!(
            HybridPredictor::load(&cfg),
            Err(NavarasaError::PredictorUnavailable(_))
        ));
    }
}
