//! The Navarasa label set, score distributions and the uniform prediction result.

use crate::{NavarasaError, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Decimal places kept in a presented [`PredictionResult`].
pub const PRESENTATION_DECIMALS: u32 = 4;

/// The nine aesthetic states. Declaration order is the canonical order used
/// for iteration, serialization and argmax tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Shringara,
    Hasya,
    Karuna,
    Raudra,
    Veera,
    Bhayanaka,
    Bibhatsa,
    Adbhuta,
    Shanta,
}

impl EmotionLabel {
    pub const COUNT: usize = 9;

    pub const ALL: [EmotionLabel; Self::COUNT] = [
        EmotionLabel::Shringara,
        EmotionLabel::Hasya,
        EmotionLabel::Karuna,
        EmotionLabel::Raudra,
        EmotionLabel::Veera,
        EmotionLabel::Bhayanaka,
        EmotionLabel::Bibhatsa,
        EmotionLabel::Adbhuta,
        EmotionLabel::Shanta,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Shringara => "shringara",
            EmotionLabel::Hasya => "hasya",
            EmotionLabel::Karuna => "karuna",
            EmotionLabel::Raudra => "raudra",
            EmotionLabel::Veera => "veera",
            EmotionLabel::Bhayanaka => "bhayanaka",
            EmotionLabel::Bibhatsa => "bibhatsa",
            EmotionLabel::Adbhuta => "adbhuta",
            EmotionLabel::Shanta => "shanta",
        }
    }

    /// Everyday English gloss, for display.
    pub fn gloss(self) -> &'static str {
        match self {
            EmotionLabel::Shringara => "romance",
            EmotionLabel::Hasya => "joy",
            EmotionLabel::Karuna => "sadness",
            EmotionLabel::Raudra => "anger",
            EmotionLabel::Veera => "courage",
            EmotionLabel::Bhayanaka => "fear",
            EmotionLabel::Bibhatsa => "disgust",
            EmotionLabel::Adbhuta => "wonder",
            EmotionLabel::Shanta => "peace",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = NavarasaError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        EmotionLabel::ALL
            .into_iter()
            .find(|l| l.as_str() == wanted)
            .ok_or_else(|| NavarasaError::Invalid(format!("unknown emotion label: {s:?}")))
    }
}

/// A complete probability distribution over all nine labels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "HashMap<EmotionLabel, f64>")]
pub struct ScoreDistribution {
    scores: [f64; EmotionLabel::COUNT],
}

impl ScoreDistribution {
    /// Normalize raw non-negative scores (indexed by [`EmotionLabel::index`]) to sum to 1.
    pub fn from_raw(raw: [f64; EmotionLabel::COUNT]) -> Result<Self> {
        if let Some(bad) = raw.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(NavarasaError::Invalid(format!(
                "scores must be finite and non-negative, got {bad}"
            )));
        }
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return Err(NavarasaError::Invalid("scores sum to zero".into()));
        }
        Ok(Self {
            scores: raw.map(|v| v / total),
        })
    }

    pub fn get(&self, label: EmotionLabel) -> f64 {
        self.scores[label.index()]
    }

    /// Labels and scores in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f64)> + '_ {
        EmotionLabel::ALL.into_iter().zip(self.scores.iter().copied())
    }

    pub fn sum(&self) -> f64 {
        self.scores.iter().sum()
    }

    /// Argmax; ties go to the label that comes first in canonical order.
    pub fn primary(&self) -> (EmotionLabel, f64) {
        let mut best = (EmotionLabel::ALL[0], self.scores[0]);
        for (label, score) in self.iter().skip(1) {
            if score > best.1 {
                best = (label, score);
            }
        }
        best
    }

    /// Highest `n` scores, descending; equal scores keep canonical order.
    pub fn top(&self, n: usize) -> Vec<(EmotionLabel, f64)> {
        let mut ranked: Vec<(EmotionLabel, f64)> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        ranked
    }

    pub fn rounded(&self, decimals: u32) -> Self {
        let factor = 10f64.powi(decimals as i32);
        Self {
            scores: self.scores.map(|v| (v * factor).round() / factor),
        }
    }
}

impl TryFrom<HashMap<EmotionLabel, f64>> for ScoreDistribution {
    type Error = NavarasaError;

    fn try_from(map: HashMap<EmotionLabel, f64>) -> Result<Self> {
        let mut scores = [0.0; EmotionLabel::COUNT];
        for label in EmotionLabel::ALL {
            let value = map
                .get(&label)
                .copied()
                .ok_or_else(|| NavarasaError::Invalid(format!("missing score for {label}")))?;
            if !value.is_finite() || value < 0.0 {
                return Err(NavarasaError::Invalid(format!(
                    "invalid score for {label}: {value}"
                )));
            }
            scores[label.index()] = value;
        }
        Ok(Self { scores })
    }
}

impl Serialize for ScoreDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(EmotionLabel::COUNT))?;
        for (label, score) in self.iter() {
            map.serialize_entry(label.as_str(), &score)?;
        }
        map.end()
    }
}

/// Diagnostic descriptors shown next to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    /// BPM
    pub tempo: f64,
    /// Mean RMS energy
    pub energy: f64,
    /// Mean spectral centroid (Hz)
    pub brightness: f64,
}

/// Uniform result shape, whichever predictor produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub emotions: ScoreDistribution,
    pub primary_emotion: EmotionLabel,
    pub confidence: f64,
    pub features: FeatureSummary,
}

impl PredictionResult {
    /// Round the distribution for presentation, then pick the primary label from it.
    pub fn new(distribution: &ScoreDistribution, features: FeatureSummary) -> Self {
        let emotions = distribution.rounded(PRESENTATION_DECIMALS);
        let (primary_emotion, confidence) = emotions.primary();
        Self {
            emotions,
            primary_emotion,
            confidence,
            features,
        }
    }
}
