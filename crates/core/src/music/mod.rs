mod catalog;
mod classifier;
mod extract;
mod features;

pub use catalog::{
    CatalogError, MusicCatalog, RebuildReport, SongEmotionRecord, SONG_FILE_EXTENSION,
};
pub use classifier::{classify, ANGRY_PROFILE, HAPPY_PROFILE, NEUTRAL_PROFILE, SAD_PROFILE};
pub use extract::{
    decode_excerpt, ExtractError, FeatureExtractor, SymphoniaFeatureExtractor, DEFAULT_EXCERPT,
};
pub use features::MusicFeatures;
