//! Combines per-modality emotion readings into one consensus distribution.
//!
//! Absent modalities are replaced by the uniform distribution and still carry
//! their weight, so a missing detector dilutes the result instead of being
//! excluded from it.

use crate::config::ConfigError;
use crate::emotion::{Emotion, EmotionDistribution, Modality, ModalityReading};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

const LOG_TARGET: &str = "fusion";

pub const POLICY_WEIGHTED_AVERAGE: &str = "weighted_average";
pub const POLICY_ATTENTION: &str = "attention";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FusionPolicy {
    /// Static per-modality weights.
    #[default]
    WeightedAverage,
    /// Weights derived per call from the modality confidences.
    Attention,
}

impl FusionPolicy {
    /// Unknown names fall back to [`FusionPolicy::WeightedAverage`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            POLICY_WEIGHTED_AVERAGE => FusionPolicy::WeightedAverage,
            POLICY_ATTENTION => FusionPolicy::Attention,
            other => {
                warn!(target: LOG_TARGET, policy = other, "unknown fusion policy, using weighted_average");
                FusionPolicy::WeightedAverage
            }
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            FusionPolicy::WeightedAverage => POLICY_WEIGHTED_AVERAGE,
            FusionPolicy::Attention => POLICY_ATTENTION,
        }
    }
}

impl fmt::Display for FusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-modality weights, always normalized to unit sum.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct FusionWeights {
    facial: f64,
    audio: f64,
    text: f64,
}

impl FusionWeights {
    pub const DEFAULT: FusionWeights = FusionWeights {
        facial: 0.40,
        audio: 0.35,
        text: 0.25,
    };

    /// Accepts any non-negative finite triple with positive sum and renormalizes it.
    pub fn new(facial: f64, audio: f64, text: f64) -> Result<Self, ConfigError> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        let total = facial + audio + text;
        if !(valid(facial) && valid(audio) && valid(text)) || total <= 0.0 {
            return Err(ConfigError::InvalidWeights {
                facial,
                audio,
                text,
            });
        }
        Ok(Self {
            facial: facial / total,
            audio: audio / total,
            text: text / total,
        })
    }

    /// Attention weights from confidences; `None` when they carry no mass.
    pub fn from_confidences(facial: f64, audio: f64, text: f64) -> Option<Self> {
        let clamp = |c: f64| if c.is_finite() && c > 0.0 { c } else { 0.0 };
        Self::new(clamp(facial), clamp(audio), clamp(text)).ok()
    }

    pub fn get(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Facial => self.facial,
            Modality::Audio => self.audio,
            Modality::Text => self.text,
        }
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct FusedEmotion {
    pub distribution: EmotionDistribution,
    pub dominant: Emotion,
    /// Fused score of the dominant label.
    pub confidence: f64,
}

#[derive(Clone, Debug, Default)]
pub struct FusionEngine {
    policy: FusionPolicy,
    weights: FusionWeights,
}

impl FusionEngine {
    pub fn new(policy: FusionPolicy, weights: FusionWeights) -> Self {
        Self { policy, weights }
    }

    pub fn policy(&self) -> FusionPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: FusionPolicy) {
        self.policy = policy;
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    pub fn set_weights(&mut self, facial: f64, audio: f64, text: f64) -> Result<(), ConfigError> {
        self.weights = FusionWeights::new(facial, audio, text)?;
        Ok(())
    }

    pub fn fuse(
        &self,
        facial: &ModalityReading,
        audio: &ModalityReading,
        text: &ModalityReading,
    ) -> FusedEmotion {
        let weights = match self.policy {
            FusionPolicy::WeightedAverage => self.weights,
            FusionPolicy::Attention => {
                match FusionWeights::from_confidences(
                    facial.confidence,
                    audio.confidence,
                    text.confidence,
                ) {
                    Some(derived) => {
                        debug!(
                            target: LOG_TARGET,
                            facial = derived.facial,
                            audio = derived.audio,
                            text = derived.text,
                            "attention weights"
                        );
                        derived
                    }
                    None => FusionWeights::DEFAULT,
                }
            }
        };
        fuse_weighted(&weights, facial, audio, text)
    }
}

/// Weighted average over the three modalities with explicit weights.
pub fn fuse_weighted(
    weights: &FusionWeights,
    facial: &ModalityReading,
    audio: &ModalityReading,
    text: &ModalityReading,
) -> FusedEmotion {
    let mut sum = EmotionDistribution::default();
    for (modality, reading) in [
        (Modality::Facial, facial),
        (Modality::Audio, audio),
        (Modality::Text, text),
    ] {
        let dist = reading
            .distribution
            .map(|d| d.normalized())
            .unwrap_or_else(EmotionDistribution::uniform);
        sum.scaled_add(&dist, weights.get(modality));
    }

    let distribution = sum.normalized();
    let dominant = distribution.dominant();
    FusedEmotion {
        distribution,
        dominant,
        confidence: distribution.get(dominant),
    }
}
