use crate::emotion::{
    Detection, EmotionDetector, Modality, ModalityReading, ProsodyWindow, DEFAULT_CONFIDENCE,
};
use crate::fusion::{FusedEmotion, FusionEngine};
use crate::recommend::RecommendationEngine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const LOG_TARGET: &str = "session";

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub prefer_catalog: bool,
    pub playlist_len: usize,
}

/// Everything gathered for one session. Any modality may be missing.
#[derive(Clone, Debug, Default)]
pub struct SessionInput {
    /// Facial detections come from an external classifier.
    pub facial: Option<Detection>,
    pub audio: Option<ProsodyWindow>,
    pub text: Option<String>,
    pub facial_confidence: Option<f64>,
    pub audio_confidence: Option<f64>,
    pub text_confidence: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionOutcome {
    pub fused: FusedEmotion,
    pub explanation: String,
    pub song: Option<String>,
    pub playlist: Vec<String>,
}

/// Runs the available detectors one after another, fuses their readings and
/// picks music for the result.
pub struct Session<T, A, R> {
    pub text: T,
    pub audio: A,
    pub fusion: FusionEngine,
    pub recommender: RecommendationEngine<R>,
    pub config: SessionConfig,
}

impl<T, A, R> Session<T, A, R>
where
    T: EmotionDetector<Input = String>,
    A: EmotionDetector<Input = ProsodyWindow>,
    R: Rng,
{
    pub async fn run(&mut self, input: SessionInput) -> SessionOutcome {
        let facial = reading(Modality::Facial, input.facial, input.facial_confidence);
        let audio = match input.audio {
            Some(window) => detect(&self.audio, window).await,
            None => None,
        };
        let audio = reading(Modality::Audio, audio, input.audio_confidence);
        let text = match input.text {
            Some(text) => detect(&self.text, text).await,
            None => None,
        };
        let text = reading(Modality::Text, text, input.text_confidence);

        let fused = self.fusion.fuse(&facial, &audio, &text);
        info!(
            target: LOG_TARGET,
            dominant = %fused.dominant,
            confidence = fused.confidence,
            policy = %self.fusion.policy(),
            "emotions fused"
        );

        let explanation = self.recommender.explain(fused.dominant);
        info!(
            target: LOG_TARGET,
            strategy = %self.recommender.strategy(),
            target_emotion = %self.recommender.target_for(fused.dominant),
            "music target resolved"
        );
        let song = self
            .recommender
            .recommend(fused.dominant, self.config.prefer_catalog);
        let playlist = if self.config.playlist_len > 0 {
            self.recommender.generate_playlist(
                fused.dominant,
                self.config.playlist_len,
                self.config.prefer_catalog,
            )
        } else {
            Vec::new()
        };

        SessionOutcome {
            fused,
            explanation,
            song,
            playlist,
        }
    }
}

async fn detect<D: EmotionDetector>(detector: &D, input: D::Input) -> Option<Detection> {
    match detector.detect(input).await {
        Ok(detection) => Some(detection),
        Err(e) => {
            warn!(target: LOG_TARGET, modality = %detector.modality(), "detector skipped: {e}");
            None
        }
    }
}

fn reading(modality: Modality, detection: Option<Detection>, confidence: Option<f64>) -> ModalityReading {
    let confidence = confidence.unwrap_or(DEFAULT_CONFIDENCE);
    match detection {
        Some(d) => {
            info!(target: LOG_TARGET, %modality, label = %d.label, "modality detected");
            d.into_reading(confidence)
        }
        None => ModalityReading::absent().with_confidence(confidence),
    }
}
