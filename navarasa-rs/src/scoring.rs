//! Rule-based emotion scoring over descriptor features.
//!
//! Each emotion is scored independently from a common floor by a few band /
//! threshold rules. A rule adds `weight * fraction`, with the fraction clamped
//! to `[0, 1]`, when its feature falls inside or past the emotion's band.

use crate::cascade::{EmotionPredictor, PredictorInput, PredictorKind};
use crate::emotion::{EmotionLabel, ScoreDistribution};
use crate::features::FeatureSet;
use crate::Result;
use tracing::debug;

/// Every emotion starts here, so no label is ever scored exactly zero.
pub const SCORE_FLOOR: f64 = 0.01;

/// The descriptors the rules look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringInputs {
    pub tempo: f64,
    pub energy: f64,
    pub brightness: f64,
    pub zcr: f64,
    pub rolloff: f64,
    pub mfcc_variance: f64,
}

impl ScoringInputs {
    pub fn from_features(features: &FeatureSet) -> Self {
        Self {
            tempo: features.tempo,
            energy: features.rms_mean,
            brightness: features.spectral_centroid_mean,
            zcr: features.zcr_mean,
            rolloff: features.spectral_rolloff_mean,
            mfcc_variance: features.mfcc_variance(),
        }
    }
}

pub(crate) fn unit(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

pub(crate) fn between(x: f64, lo: f64, hi: f64) -> bool {
    lo < x && x < hi
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedScorer;

impl RuleBasedScorer {
    pub fn new() -> Self {
        Self
    }

    /// The terminal cascade tier needs no artifacts.
    pub fn is_available() -> bool {
        true
    }

    /// Un-normalized scores indexed by [`EmotionLabel::index`], floor included.
    pub fn raw_scores(&self, inputs: &ScoringInputs) -> [f64; EmotionLabel::COUNT] {
        let mut scores = [SCORE_FLOOR; EmotionLabel::COUNT];
        for label in EmotionLabel::ALL {
            let rule_score = match label {
                EmotionLabel::Karuna => karuna(inputs),
                EmotionLabel::Hasya => hasya(inputs),
                EmotionLabel::Shanta => shanta(inputs),
                EmotionLabel::Raudra => raudra(inputs),
                EmotionLabel::Veera => veera(inputs),
                EmotionLabel::Shringara => shringara(inputs),
                EmotionLabel::Bhayanaka => bhayanaka(inputs),
                EmotionLabel::Adbhuta => adbhuta(inputs),
                EmotionLabel::Bibhatsa => bibhatsa(inputs),
            };
            scores[label.index()] += rule_score;
        }
        scores
    }

    pub fn score(&self, features: &FeatureSet) -> Result<ScoreDistribution> {
        let inputs = ScoringInputs::from_features(features);
        debug!(
            tempo = inputs.tempo,
            energy = inputs.energy,
            brightness = inputs.brightness,
            rolloff = inputs.rolloff,
            zcr = inputs.zcr,
            mfcc_variance = inputs.mfcc_variance,
            "rule-based scoring inputs"
        );
        let raw = self.raw_scores(&inputs);
        debug!("raw scores: {}", format_scores(EmotionLabel::ALL.into_iter().zip(raw)));
        let distribution = ScoreDistribution::from_raw(raw)?;
        debug!("top: {}", format_scores(distribution.top(3).into_iter()));
        Ok(distribution)
    }
}

impl EmotionPredictor for RuleBasedScorer {
    fn kind(&self) -> PredictorKind {
        PredictorKind::RuleBased
    }

    fn predict(&self, input: &PredictorInput<'_>) -> Result<ScoreDistribution> {
        self.score(input.features)
    }
}

pub(crate) fn format_scores(scores: impl Iterator<Item = (EmotionLabel, f64)>) -> String {
    scores
        .map(|(label, score)| format!("{label}={score:.4}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// low tempo, low energy, dark, steady timbre
fn karuna(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if i.tempo < 90.0 {
        s += 0.4 * unit(1.0 - i.tempo / 90.0);
    }
    if i.energy < 0.08 {
        s += 0.4 * unit(1.0 - i.energy / 0.08);
    }
    if i.brightness < 1800.0 {
        s += 0.3 * unit(1.0 - i.brightness / 1800.0);
    }
    if i.mfcc_variance < 50.0 {
        s += 0.2;
    }
    s
}

// fast, energetic, bright, varied timbre
fn hasya(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if i.tempo > 120.0 {
        s += 0.5 * unit((i.tempo - 120.0) / 80.0);
    }
    if i.energy > 0.10 {
        s += 0.5 * unit((i.energy - 0.10) / 0.15);
    }
    if i.brightness > 2500.0 {
        s += 0.3 * unit((i.brightness - 2500.0) / 2000.0);
    }
    if i.mfcc_variance > 70.0 {
        s += 0.2;
    }
    s
}

fn shanta(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if between(i.tempo, 60.0, 100.0) {
        s += 0.4 * unit(1.0 - (i.tempo - 80.0).abs() / 20.0);
    }
    if between(i.energy, 0.04, 0.09) {
        s += 0.3;
    }
    if i.brightness < 2000.0 {
        s += 0.15;
    }
    s
}

fn raudra(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if i.energy > 0.14 {
        s += 0.6 * unit((i.energy - 0.14) / 0.1);
    }
    if i.zcr > 0.09 {
        s += 0.4 * unit((i.zcr - 0.09) / 0.08);
    }
    if i.brightness > 3000.0 && i.tempo > 130.0 {
        s += 0.3;
    }
    s
}

fn veera(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if between(i.tempo, 115.0, 145.0) {
        s += 0.5 * unit(1.0 - (i.tempo - 130.0).abs() / 15.0);
    }
    if between(i.energy, 0.11, 0.16) {
        s += 0.4;
    }
    if between(i.brightness, 2200.0, 3200.0) {
        s += 0.3;
    }
    s
}

fn shringara(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if between(i.tempo, 90.0, 120.0) {
        s += 0.3;
    }
    if between(i.energy, 0.06, 0.11) {
        s += 0.25;
    }
    if between(i.brightness, 1500.0, 2500.0) {
        s += 0.3;
    }
    s
}

fn bhayanaka(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if i.zcr > 0.10 {
        s += 0.4 * unit(i.zcr / 0.15);
    }
    if i.brightness > 2800.0 {
        s += 0.2;
    }
    if i.energy < 0.07 || i.energy > 0.13 {
        s += 0.15;
    }
    s
}

fn adbhuta(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if i.brightness > 3000.0 {
        s += 0.4 * unit(i.brightness / 4500.0);
    }
    if between(i.tempo, 100.0, 130.0) {
        s += 0.2;
    }
    if between(i.energy, 0.08, 0.12) {
        s += 0.2;
    }
    s
}

fn bibhatsa(i: &ScoringInputs) -> f64 {
    let mut s = 0.0;
    if i.zcr > 0.12 {
        s += 0.35 * unit(i.zcr / 0.18);
    }
    if i.brightness > 3500.0 {
        s += 0.3;
    }
    if i.energy > 0.13 {
        s += 0.2;
    }
    s
}
