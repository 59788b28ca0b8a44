use serde::{Deserialize, Serialize};

/// Acoustic summary of one song; every field is a mean over the analyzed excerpt
/// except `tempo`, which is in beats per minute.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MusicFeatures {
    pub tempo: f64,
    pub spectral_centroid_mean: f64,
    pub spectral_rolloff_mean: f64,
    pub zcr_mean: f64,
    pub mfcc_mean: f64,
    /// Mean chroma energy, used as the harmonic/valence proxy.
    pub chroma_mean: f64,
    /// Mean frame RMS.
    pub energy_mean: f64,
}
