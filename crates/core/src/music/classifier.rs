//! Fixed rule table mapping acoustic features to an emotion distribution.
//!
//! The output profiles are literal constants rather than calibrated values.
//! They are kept as-is so existing catalogs stay comparable; replacing them with
//! a learned model needs its own evaluation data.

use crate::emotion::EmotionDistribution;
use crate::music::MusicFeatures;

pub const HAPPY_PROFILE: EmotionDistribution = EmotionDistribution::new(0.10, 0.70, 0.15, 0.05);
pub const ANGRY_PROFILE: EmotionDistribution = EmotionDistribution::new(0.60, 0.20, 0.10, 0.10);
pub const SAD_PROFILE: EmotionDistribution = EmotionDistribution::new(0.05, 0.05, 0.20, 0.70);
pub const NEUTRAL_PROFILE: EmotionDistribution = EmotionDistribution::new(0.05, 0.20, 0.60, 0.15);

/// First matching rule wins.
pub fn classify(features: &MusicFeatures) -> EmotionDistribution {
    let tempo = features.tempo;
    let energy = features.energy_mean;
    let harmonic = features.chroma_mean;

    if tempo > 120.0 && energy > 0.15 && harmonic > 0.5 {
        HAPPY_PROFILE
    } else if tempo > 110.0 && energy > 0.20 {
        ANGRY_PROFILE
    } else if tempo < 80.0 && energy < 0.12 {
        SAD_PROFILE
    } else {
        NEUTRAL_PROFILE
    }
}
