use crate::emotion::{Emotion, EmotionDistribution, Modality, ModalityReading};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const LOG_TARGET: &str = "emotion::detector";

#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("emotion detection failed: {0}")]
    Failed(String),

    #[error("detector input was empty")]
    EmptyInput,
}

/// Raw answer of a detector: its own dominant label and an unnormalized score map.
///
/// Labels are whatever the detector speaks (e.g. `joy`, `anger`); the fusion
/// stage canonicalizes them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub label: String,
    pub scores: BTreeMap<String, f64>,
}

impl Detection {
    pub fn from_scores<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let scores: BTreeMap<String, f64> =
            scores.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let label = EmotionDistribution::from_labels(scores.iter().map(|(k, v)| (k, *v)))
            .dominant()
            .as_str()
            .to_owned();
        Self { label, scores }
    }

    pub fn distribution(&self) -> EmotionDistribution {
        EmotionDistribution::from_labels(self.scores.iter().map(|(k, v)| (k, *v)))
    }

    pub fn into_reading(self, confidence: f64) -> ModalityReading {
        ModalityReading::new(self.distribution()).with_confidence(confidence)
    }
}

pub trait EmotionDetector: Send + Sync {
    type Input: Send + 'static;

    fn modality(&self) -> Modality;

    fn detect(&self, input: Self::Input) -> BoxFuture<'_, Result<Detection, DetectorError>>;
}

/// Answer of the keyword detector when no keyword matches.
pub const TEXT_NO_SIGNAL: EmotionDistribution = EmotionDistribution::new(0.05, 0.1, 0.8, 0.05);

const TEXT_KEYWORDS: [(Emotion, &[&str]); 4] = [
    (
        Emotion::Angry,
        &["angry", "furious", "mad", "irritated", "annoyed", "hate", "rage"],
    ),
    (
        Emotion::Happy,
        &["happy", "joy", "excited", "great", "awesome", "love", "wonderful"],
    ),
    (
        Emotion::Sad,
        &["sad", "depressed", "unhappy", "miserable", "crying", "hurt"],
    ),
    (Emotion::Neutral, &["okay", "fine", "normal", "alright"]),
];

/// Keyword-count text detector, used when no text model is available.
#[derive(Clone, Debug, Default)]
pub struct KeywordTextDetector;

impl KeywordTextDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, text: &str) -> EmotionDistribution {
        let lower = text.to_lowercase();
        let mut hits = EmotionDistribution::default();
        for (emotion, keywords) in TEXT_KEYWORDS {
            let count = keywords.iter().filter(|k| lower.contains(*k)).count();
            hits.set(emotion, count as f64);
        }
        if hits.total() == 0.0 {
            return TEXT_NO_SIGNAL;
        }
        hits.normalized()
    }
}

impl EmotionDetector for KeywordTextDetector {
    type Input = String;

    fn modality(&self) -> Modality {
        Modality::Text
    }

    fn detect(&self, text: String) -> BoxFuture<'_, Result<Detection, DetectorError>> {
        async move {
            if text.trim().is_empty() {
                return Err(DetectorError::EmptyInput);
            }
            let scores = self.score(&text);
            Ok(Detection::from_scores(
                scores.iter().map(|(e, s)| (e.as_str(), s)),
            ))
        }
        .boxed()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProsodyFeatures {
    pub mean_abs_amplitude: f32,
    pub zero_crossing_rate: f32,
}

impl ProsodyFeatures {
    pub fn from_samples(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self {
                mean_abs_amplitude: 0.0,
                zero_crossing_rate: 0.0,
            };
        }
        let mean_abs_amplitude =
            samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32;
        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        Self {
            mean_abs_amplitude,
            zero_crossing_rate: crossings as f32 / samples.len() as f32,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProsodyWindow {
    pub duration: Duration,
    pub features: ProsodyFeatures,
}

impl ProsodyWindow {
    pub fn from_samples(samples: &[f32], sample_rate_hz: u32) -> Self {
        let secs = if sample_rate_hz == 0 {
            0.0
        } else {
            samples.len() as f64 / f64::from(sample_rate_hz)
        };
        Self {
            duration: Duration::from_secs_f64(secs),
            features: ProsodyFeatures::from_samples(samples),
        }
    }
}

const PROSODY_BASELINE: f64 = 0.1;

/// Energy/zero-crossing heuristic over a recorded voice window.
#[derive(Clone, Debug, Default)]
pub struct ProsodyAudioDetector;

impl ProsodyAudioDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, features: &ProsodyFeatures) -> EmotionDistribution {
        let energy = features.mean_abs_amplitude;
        let zcr = features.zero_crossing_rate;

        let (emotion, peak) = if energy > 0.02 && zcr > 0.1 {
            (Emotion::Angry, 0.75)
        } else if energy > 0.015 {
            (Emotion::Happy, 0.70)
        } else if energy < 0.008 {
            (Emotion::Sad, 0.65)
        } else {
            (Emotion::Neutral, 0.60)
        };

        let mut d = EmotionDistribution::new(
            PROSODY_BASELINE,
            PROSODY_BASELINE,
            PROSODY_BASELINE,
            PROSODY_BASELINE,
        );
        d.set(emotion, peak);
        d.normalized()
    }
}

impl EmotionDetector for ProsodyAudioDetector {
    type Input = ProsodyWindow;

    fn modality(&self) -> Modality {
        Modality::Audio
    }

    fn detect(&self, window: ProsodyWindow) -> BoxFuture<'_, Result<Detection, DetectorError>> {
        async move {
            if window.duration.is_zero() {
                return Err(DetectorError::EmptyInput);
            }
            let scores = self.score(&window.features);
            tracing::debug!(
                target: LOG_TARGET,
                energy = window.features.mean_abs_amplitude,
                zcr = window.features.zero_crossing_rate,
                dominant = %scores.dominant(),
                "prosody scored"
            );
            Ok(Detection::from_scores(
                scores.iter().map(|(e, s)| (e.as_str(), s)),
            ))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(energy: f32, zcr: f32) -> ProsodyWindow {
        ProsodyWindow {
            duration: Duration::from_secs(5),
            features: ProsodyFeatures {
                mean_abs_amplitude: energy,
                zero_crossing_rate: zcr,
            },
        }
    }

    #[tokio::test]
    async fn keyword_detector_counts_hits() {
        let detector = KeywordTextDetector::new();

        let d = detector.detect("I am so happy and excited!".to_owned()).await.unwrap();
        assert_eq!(d.label, "happy");

        let d = detector.detect("I'm furious, I hate this".to_owned()).await.unwrap();
        assert_eq!(d.label, "angry");

        let d = detector.detect("feeling sad and hurt".to_owned()).await.unwrap();
        assert_eq!(d.label, "sad");
    }

    #[tokio::test]
    async fn keyword_detector_without_hits_leans_neutral() {
        let detector = KeywordTextDetector::new();
        let d = detector.detect("the bus was late".to_owned()).await.unwrap();
        assert_eq!(d.label, "neutral");
        let dist = d.distribution();
        for (emotion, score) in TEXT_NO_SIGNAL.iter() {
            assert!((dist.get(emotion) - score).abs() < 1e-9, "{emotion}");
        }
    }

    #[tokio::test]
    async fn keyword_detector_rejects_blank_text() {
        let detector = KeywordTextDetector::new();
        let err = detector.detect("   ".to_owned()).await.unwrap_err();
        assert!(matches!(err, DetectorError::EmptyInput));
    }

    #[tokio::test]
    async fn prosody_thresholds() {
        let detector = ProsodyAudioDetector::new();
        assert_eq!(detector.detect(window(0.03, 0.2)).await.unwrap().label, "angry");
        assert_eq!(detector.detect(window(0.03, 0.05)).await.unwrap().label, "happy");
        assert_eq!(detector.detect(window(0.005, 0.05)).await.unwrap().label, "sad");
        assert_eq!(detector.detect(window(0.01, 0.05)).await.unwrap().label, "neutral");
    }

    #[test]
    fn prosody_scores_sum_to_one() {
        let d = ProsodyAudioDetector::new().score(&window(0.03, 0.2).features);
        assert!((d.total() - 1.0).abs() < 1e-9);
        assert!((d.angry - 0.75 / 1.05).abs() < 1e-9);
    }

    #[test]
    fn prosody_features_from_samples() {
        let samples = [0.5, -0.5, 0.5, -0.5];
        let f = ProsodyFeatures::from_samples(&samples);
        assert!((f.mean_abs_amplitude - 0.5).abs() < 1e-6);
        assert!((f.zero_crossing_rate - 0.75).abs() < 1e-6);

        let w = ProsodyWindow::from_samples(&[0.0; 16_000], 16_000);
        assert_eq!(w.duration, Duration::from_secs(1));
    }

    #[test]
    fn detection_carries_raw_labels() {
        let d = Detection::from_scores([("joy", 0.6), ("anger", 0.2), ("fear", 0.2)]);
        assert_eq!(d.label, "happy");
        let dist = d.distribution();
        assert!((dist.happy - 0.6).abs() < 1e-9);
        assert!((dist.neutral - 0.1).abs() < 1e-9);
        assert!((dist.sad - 0.1).abs() < 1e-9);
    }
}
