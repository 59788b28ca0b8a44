mod detector;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use detector::{
    Detection, DetectorError, EmotionDetector, KeywordTextDetector, ProsodyAudioDetector,
    ProsodyFeatures, ProsodyWindow,
};

/// The closed label set every modality is mapped onto.
///
/// Declaration order is also the tie-break precedence for [`EmotionDistribution::dominant`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Happy,
    Neutral,
    Sad,
}

impl Emotion {
    /// All labels in tie-break precedence order.
    pub const ALL: [Emotion; 4] = [Emotion::Angry, Emotion::Happy, Emotion::Neutral, Emotion::Sad];

    pub const fn as_str(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Happy => "happy",
            Emotion::Neutral => "neutral",
            Emotion::Sad => "sad",
        }
    }

    /// Routes a free-form classifier label onto a canonical bucket.
    ///
    /// Matching is a case-insensitive substring test, checked in the order
    /// angry/anger, happy/joy, sad, neutral. Returns `None` for labels that
    /// match none of them.
    pub fn canonicalize(label: &str) -> Option<Emotion> {
        let lower = label.to_lowercase();
        if lower.contains("angry") || lower.contains("anger") {
            Some(Emotion::Angry)
        } else if lower.contains("happy") || lower.contains("joy") {
            Some(Emotion::Happy)
        } else if lower.contains("sad") {
            Some(Emotion::Sad)
        } else if lower.contains("neutral") {
            Some(Emotion::Neutral)
        } else {
            None
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownEmotion(trimmed.to_owned()))
    }
}

/// Where the mass of an unrecognized label goes during normalization.
pub const UNRECOGNIZED_LABEL_SPLIT: [(Emotion, f64); 2] =
    [(Emotion::Neutral, 0.5), (Emotion::Sad, 0.5)];

/// Score assigned to every label when there is no evidence at all.
pub const UNIFORM_SCORE: f64 = 0.25;

/// Scores over the four canonical labels.
///
/// Serialized as a `{label: score}` object; labels missing on input read as 0.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmotionDistribution {
    pub angry: f64,
    pub happy: f64,
    pub neutral: f64,
    pub sad: f64,
}

impl EmotionDistribution {
    pub const fn new(angry: f64, happy: f64, neutral: f64, sad: f64) -> Self {
        Self {
            angry,
            happy,
            neutral,
            sad,
        }
    }

    pub const fn uniform() -> Self {
        Self::new(UNIFORM_SCORE, UNIFORM_SCORE, UNIFORM_SCORE, UNIFORM_SCORE)
    }

    /// All mass on a single label.
    pub fn certain(emotion: Emotion) -> Self {
        let mut d = Self::default();
        d.set(emotion, 1.0);
        d
    }

    /// Canonicalizes arbitrary `(label, score)` pairs into a normalized distribution.
    ///
    /// Synonyms are routed by [`Emotion::canonicalize`], unrecognized labels are
    /// spread by [`UNRECOGNIZED_LABEL_SPLIT`], and negative or non-finite scores
    /// count as zero. Empty or zero-mass input yields [`EmotionDistribution::uniform`].
    pub fn from_labels<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut d = Self::default();
        for (label, score) in scores {
            let score = sanitize(score);
            match Emotion::canonicalize(label.as_ref()) {
                Some(emotion) => d.add(emotion, score),
                None => {
                    for (emotion, share) in UNRECOGNIZED_LABEL_SPLIT {
                        d.add(emotion, score * share);
                    }
                }
            }
        }
        d.normalized()
    }

    pub fn get(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Angry => self.angry,
            Emotion::Happy => self.happy,
            Emotion::Neutral => self.neutral,
            Emotion::Sad => self.sad,
        }
    }

    pub fn set(&mut self, emotion: Emotion, score: f64) {
        *self.slot(emotion) = score;
    }

    fn add(&mut self, emotion: Emotion, score: f64) {
        *self.slot(emotion) += score;
    }

    fn slot(&mut self, emotion: Emotion) -> &mut f64 {
        match emotion {
            Emotion::Angry => &mut self.angry,
            Emotion::Happy => &mut self.happy,
            Emotion::Neutral => &mut self.neutral,
            Emotion::Sad => &mut self.sad,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f64)> + '_ {
        Emotion::ALL.into_iter().map(move |e| (e, self.get(e)))
    }

    pub fn total(&self) -> f64 {
        self.iter().map(|(_, s)| sanitize(s)).sum()
    }

    /// Rescales to unit mass; falls back to uniform when there is no mass.
    pub fn normalized(&self) -> Self {
        let total = self.total();
        if total <= 0.0 || !total.is_finite() {
            return Self::uniform();
        }
        let mut out = Self::default();
        for (emotion, score) in self.iter() {
            out.set(emotion, sanitize(score) / total);
        }
        out
    }

    /// Label with the highest score; ties resolve to the earliest label in [`Emotion::ALL`].
    pub fn dominant(&self) -> Emotion {
        let mut best = Emotion::ALL[0];
        for emotion in Emotion::ALL.into_iter().skip(1) {
            if self.get(emotion) > self.get(best) {
                best = emotion;
            }
        }
        best
    }

    pub(crate) fn scaled_add(&mut self, other: &Self, weight: f64) {
        for (emotion, score) in other.iter() {
            self.add(emotion, weight * score);
        }
    }
}

fn sanitize(score: f64) -> f64 {
    if score.is_finite() && score > 0.0 {
        score
    } else {
        0.0
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Facial,
    Audio,
    Text,
}

impl Modality {
    pub const fn as_str(self) -> &'static str {
        match self {
            Modality::Facial => "facial",
            Modality::Audio => "audio",
            Modality::Text => "text",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_CONFIDENCE: f64 = 1.0;

/// One modality's contribution to a fusion call.
///
/// An absent distribution means the detector did not run or declined to answer,
/// which is not the same thing as an all-neutral answer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModalityReading {
    pub distribution: Option<EmotionDistribution>,
    pub confidence: f64,
}

impl ModalityReading {
    pub fn new(distribution: EmotionDistribution) -> Self {
        Self {
            distribution: Some(distribution),
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn absent() -> Self {
        Self {
            distribution: None,
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

impl Default for ModalityReading {
    fn default() -> Self {
        Self::absent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_close(a: &EmotionDistribution, b: &EmotionDistribution) {
        for e in Emotion::ALL {
            assert!((a.get(e) - b.get(e)).abs() < EPS, "{e}: {} vs {}", a.get(e), b.get(e));
        }
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let once = EmotionDistribution::from_labels([("happy", 3.0), ("sad", 1.0), ("fear", 2.0)]);
        let twice = EmotionDistribution::from_labels(once.iter().map(|(e, s)| (e.as_str(), s)));
        assert_close(&once, &twice);
        assert_close(&once.normalized(), &once);
    }

    #[test]
    fn synonyms_route_to_canonical_labels() {
        let d = EmotionDistribution::from_labels([("Anger", 1.0), ("JOY", 1.0)]);
        assert_close(&d, &EmotionDistribution::new(0.5, 0.5, 0.0, 0.0));
    }

    #[test]
    fn unknown_labels_split_between_neutral_and_sad() {
        let d = EmotionDistribution::from_labels([("surprise", 1.0)]);
        assert_close(&d, &EmotionDistribution::new(0.0, 0.0, 0.5, 0.5));
    }

    #[test]
    fn empty_and_zero_input_become_uniform() {
        let empty: [(&str, f64); 0] = [];
        assert_close(&EmotionDistribution::from_labels(empty), &EmotionDistribution::uniform());
        assert_close(
            &EmotionDistribution::from_labels([("happy", 0.0), ("sad", -2.0)]),
            &EmotionDistribution::uniform(),
        );
    }

    #[test]
    fn partial_input_is_filled_and_sums_to_one() {
        let d = EmotionDistribution::from_labels([("happy", 0.3), ("neutral", 0.1)]);
        assert!((d.total() - 1.0).abs() < EPS);
        assert_eq!(d.angry, 0.0);
        assert_eq!(d.sad, 0.0);
        assert!((d.happy - 0.75).abs() < EPS);
    }

    #[test]
    fn dominant_breaks_ties_by_precedence() {
        assert_eq!(EmotionDistribution::uniform().dominant(), Emotion::Angry);
        assert_eq!(EmotionDistribution::new(0.1, 0.4, 0.4, 0.1).dominant(), Emotion::Happy);
        assert_eq!(EmotionDistribution::new(0.0, 0.2, 0.4, 0.4).dominant(), Emotion::Neutral);
        assert_eq!(EmotionDistribution::new(0.0, 0.0, 0.1, 0.9).dominant(), Emotion::Sad);
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!("Happy".parse::<Emotion>(), Ok(Emotion::Happy));
        assert_eq!(" sad ".parse::<Emotion>(), Ok(Emotion::Sad));
        assert!("joy".parse::<Emotion>().is_err());
    }

    #[test]
    fn serializes_as_label_map_and_tolerates_missing_labels() {
        let json = serde_json::to_value(EmotionDistribution::certain(Emotion::Sad)).unwrap();
        assert_eq!(json["sad"], 1.0);
        assert_eq!(json["happy"], 0.0);

        let d: EmotionDistribution = serde_json::from_str(r#"{"happy": 0.7}"#).unwrap();
        assert_eq!(d, EmotionDistribution::new(0.0, 0.7, 0.0, 0.0));
    }
}
