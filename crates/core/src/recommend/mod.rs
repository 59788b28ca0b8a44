//! Turns a detected emotion into a concrete song choice or playlist.
//!
//! The analyzed catalog is consulted first when requested; the flat
//! per-bucket song lists are the fallback. Every operation is total: an empty
//! library yields `None` or an empty playlist, never an error.

mod fallback;

use crate::config::{ConfigError, TopN};
use crate::emotion::Emotion;
use crate::music::MusicCatalog;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

pub use fallback::{FallbackSongs, SongBucket};

const LOG_TARGET: &str = "recommend";

/// Consecutive fallback draws without a new song before a playlist stops growing.
pub const MAX_STALE_DRAWS: usize = 16;

pub const STRATEGY_MOOD_MATCHING: &str = "mood_matching";
pub const STRATEGY_MOOD_REGULATION: &str = "mood_regulation";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Target the detected emotion.
    #[default]
    MoodMatching,
    /// Target the [`regulate`]d emotion.
    MoodRegulation,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Strategy::MoodMatching => STRATEGY_MOOD_MATCHING,
            Strategy::MoodRegulation => STRATEGY_MOOD_REGULATION,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            STRATEGY_MOOD_MATCHING => Ok(Strategy::MoodMatching),
            STRATEGY_MOOD_REGULATION => Ok(Strategy::MoodRegulation),
            _ => Err(ConfigError::UnknownStrategy(s.trim().to_owned())),
        }
    }
}

/// Emotion the music should steer towards under mood regulation.
pub const fn regulate(emotion: Emotion) -> Emotion {
    match emotion {
        Emotion::Angry => Emotion::Neutral,
        Emotion::Sad => Emotion::Happy,
        Emotion::Happy => Emotion::Happy,
        Emotion::Neutral => Emotion::Happy,
    }
}

pub struct RecommendationEngine<R = StdRng> {
    strategy: Strategy,
    top_n: TopN,
    catalog: MusicCatalog,
    fallback: FallbackSongs,
    rng: R,
}

impl RecommendationEngine<StdRng> {
    pub fn new(catalog: MusicCatalog, fallback: FallbackSongs) -> Self {
        Self::with_rng(catalog, fallback, StdRng::from_os_rng())
    }
}

impl<R: Rng> RecommendationEngine<R> {
    /// Uses `rng` for every random pick, so callers can make choices reproducible.
    pub fn with_rng(catalog: MusicCatalog, fallback: FallbackSongs, rng: R) -> Self {
        Self {
            strategy: Strategy::default(),
            top_n: TopN::default(),
            catalog,
            fallback,
            rng,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.strategy = strategy;
    }

    pub fn top_n(&self) -> usize {
        self.top_n.get()
    }

    pub fn set_top_n(&mut self, n: usize) -> Result<(), ConfigError> {
        self.top_n = TopN::new(n)?;
        Ok(())
    }

    pub fn target_for(&self, detected: Emotion) -> Emotion {
        match self.strategy {
            Strategy::MoodMatching => detected,
            Strategy::MoodRegulation => regulate(detected),
        }
    }

    /// Catalog candidates a catalog-backed recommendation picks from.
    pub fn catalog_candidates(&self, target: Emotion) -> Vec<&str> {
        self.catalog.rank_by_emotion(target, self.top_n.get())
    }

    pub fn recommend(&mut self, detected: Emotion, prefer_catalog: bool) -> Option<String> {
        let target = self.target_for(detected);
        debug!(target: LOG_TARGET, %detected, target_emotion = %target, strategy = %self.strategy, "resolving target");

        if prefer_catalog && !self.catalog.is_empty() {
            let candidates = self.catalog.rank_by_emotion(target, self.top_n.get());
            if let Some(song) = candidates.choose(&mut self.rng) {
                info!(target: LOG_TARGET, song = %song, source = "catalog", "recommended");
                return Some((*song).to_owned());
            }
        }

        let song = self.draw_fallback(target);
        match &song {
            Some(s) => info!(target: LOG_TARGET, song = %s, source = "fallback", "recommended"),
            None => info!(target: LOG_TARGET, target_emotion = %target, "no song available"),
        }
        song
    }

    /// Up to `n` distinct songs: catalog-ranked first, then fallback draws.
    pub fn generate_playlist(
        &mut self,
        detected: Emotion,
        n: usize,
        prefer_catalog: bool,
    ) -> Vec<String> {
        let target = self.target_for(detected);
        let mut playlist: Vec<String> = Vec::with_capacity(n);

        if prefer_catalog {
            for song in self.catalog.rank_by_emotion(target, n) {
                if !playlist.iter().any(|s| s == song) {
                    playlist.push(song.to_owned());
                }
            }
        }

        let mut stale = 0;
        while playlist.len() < n && stale < MAX_STALE_DRAWS {
            match self.draw_fallback(target) {
                Some(song) if !playlist.contains(&song) => {
                    playlist.push(song);
                    stale = 0;
                }
                Some(_) => stale += 1,
                None => break,
            }
        }

        debug!(target: LOG_TARGET, target_emotion = %target, requested = n, produced = playlist.len(), "playlist generated");
        playlist
    }

    pub fn explain(&self, detected: Emotion) -> String {
        match self.strategy {
            Strategy::MoodMatching => {
                format!("You seem {detected}. Playing music that matches your mood.")
            }
            Strategy::MoodRegulation => match (detected, regulate(detected)) {
                (Emotion::Angry, Emotion::Neutral) => {
                    "You seem angry. Let's calm you down with peaceful music.".to_owned()
                }
                (Emotion::Sad, Emotion::Happy) => {
                    "You seem sad. Let's lift your spirits with uplifting music!".to_owned()
                }
                (Emotion::Happy, Emotion::Happy) => {
                    "You're happy! Let's keep that energy going!".to_owned()
                }
                (Emotion::Neutral, Emotion::Happy) => {
                    "Let's add some energy to your day!".to_owned()
                }
                (_, target) => format!("Playing {target} music for you."),
            },
        }
    }

    fn draw_fallback(&mut self, target: Emotion) -> Option<String> {
        let bucket = SongBucket::for_emotion(target);
        let count = self.fallback.count(bucket);
        if count == 0 {
            return None;
        }
        let index = self.rng.random_range(0..count);
        self.fallback.get(bucket, index).map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::{MusicFeatures, SongEmotionRecord};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn record(tempo: f64, energy: f64, chroma: f64) -> SongEmotionRecord {
        SongEmotionRecord::from_features(MusicFeatures {
            tempo,
            energy_mean: energy,
            chroma_mean: chroma,
            ..Default::default()
        })
    }

    fn catalog() -> MusicCatalog {
        let mut c = MusicCatalog::new();
        c.insert("sunny", record(130.0, 0.18, 0.6));
        c.insert("storm", record(115.0, 0.25, 0.3));
        c.insert("rain", record(70.0, 0.05, 0.2));
        c.insert("drift", record(100.0, 0.1, 0.4));
        c
    }

    fn fallback() -> FallbackSongs {
        FallbackSongs::from_lists(
            vec!["a1".into(), "a2".into()],
            vec!["h1".into(), "h2".into(), "h3".into()],
            vec!["n1".into()],
        )
    }

    #[test]
    fn regulation_table() {
        assert_eq!(regulate(Emotion::Angry), Emotion::Neutral);
        assert_eq!(regulate(Emotion::Sad), Emotion::Happy);
        assert_eq!(regulate(Emotion::Happy), Emotion::Happy);
        assert_eq!(regulate(Emotion::Neutral), Emotion::Happy);

        let fixed: Vec<Emotion> = Emotion::ALL
            .into_iter()
            .filter(|e| regulate(*e) == *e)
            .collect();
        assert_eq!(fixed, vec![Emotion::Happy]);
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("mood_matching".parse::<Strategy>(), Ok(Strategy::MoodMatching));
        assert_eq!("Mood_Regulation".parse::<Strategy>(), Ok(Strategy::MoodRegulation));
        assert!(matches!(
            "shuffle".parse::<Strategy>(),
            Err(ConfigError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn catalog_pick_comes_from_top_n() {
        let mut engine = RecommendationEngine::with_rng(catalog(), fallback(), rng());
        engine.set_top_n(2).unwrap();
        assert_eq!(engine.top_n(), 2);
        assert!(engine.set_top_n(0).is_err());
        assert_eq!(engine.top_n(), 2);
        let allowed: Vec<String> = engine
            .catalog_candidates(Emotion::Happy)
            .into_iter()
            .map(str::to_owned)
            .collect();
        assert_eq!(allowed, vec!["sunny".to_owned(), "storm".to_owned()]);

        for _ in 0..20 {
            let song = engine.recommend(Emotion::Happy, true).unwrap();
            assert!(allowed.contains(&song), "{song} not in top-n");
        }
    }

    #[test]
    fn regulation_changes_the_bucket() {
        let mut engine =
            RecommendationEngine::with_rng(MusicCatalog::new(), fallback(), rng());
        engine.set_strategy(Strategy::MoodRegulation);
        for _ in 0..10 {
            let song = engine.recommend(Emotion::Sad, true).unwrap();
            assert!(song.starts_with('h'), "{song}");
            assert_eq!(engine.recommend(Emotion::Angry, false).unwrap(), "n1");
        }
    }

    #[test]
    fn empty_catalog_falls_back_to_matching_bucket() {
        let mut engine =
            RecommendationEngine::with_rng(MusicCatalog::new(), fallback(), rng());
        let song = engine.recommend(Emotion::Angry, true).unwrap();
        assert!(song == "a1" || song == "a2");
        assert_eq!(engine.recommend(Emotion::Sad, true).as_deref(), Some("n1"));
        assert_eq!(engine.recommend(Emotion::Neutral, false).as_deref(), Some("n1"));
    }

    #[test]
    fn catalog_is_skipped_when_not_preferred() {
        let mut engine = RecommendationEngine::with_rng(catalog(), fallback(), rng());
        let song = engine.recommend(Emotion::Happy, false).unwrap();
        assert!(song.starts_with('h'));
    }

    #[test]
    fn no_sources_means_no_recommendation() {
        let mut engine = RecommendationEngine::with_rng(
            MusicCatalog::new(),
            FallbackSongs::default(),
            rng(),
        );
        assert_eq!(engine.recommend(Emotion::Happy, true), None);
        assert!(engine.generate_playlist(Emotion::Happy, 5, true).is_empty());
    }

    #[test]
    fn playlist_is_bounded_and_distinct() {
        let mut engine =
            RecommendationEngine::with_rng(MusicCatalog::new(), fallback(), rng());
        let playlist = engine.generate_playlist(Emotion::Happy, 5, false);
        assert!(!playlist.is_empty() && playlist.len() <= 3);
        assert!(playlist.iter().all(|s| s.starts_with('h')));
        let mut sorted = playlist.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), playlist.len());

        let single = engine.generate_playlist(Emotion::Neutral, 5, false);
        assert_eq!(single, vec!["n1".to_owned()]);
    }

    #[test]
    fn playlist_starts_with_catalog_ranking() {
        let mut engine = RecommendationEngine::with_rng(catalog(), fallback(), rng());
        let playlist = engine.generate_playlist(Emotion::Sad, 2, true);
        assert_eq!(playlist, vec!["rain".to_owned(), "drift".to_owned()]);

        let topped_up = engine.generate_playlist(Emotion::Sad, 6, true);
        assert_eq!(&topped_up[..4], &["rain", "drift", "storm", "sunny"]);
        assert_eq!(topped_up[4], "n1");
        assert_eq!(topped_up.len(), 5);
    }

    #[test]
    fn explanations() {
        let mut engine =
            RecommendationEngine::with_rng(MusicCatalog::new(), fallback(), rng());
        assert_eq!(
            engine.explain(Emotion::Sad),
            "You seem sad. Playing music that matches your mood."
        );
        engine.set_strategy(Strategy::MoodRegulation);
        assert_eq!(
            engine.explain(Emotion::Angry),
            "You seem angry. Let's calm you down with peaceful music."
        );
        assert_eq!(engine.explain(Emotion::Neutral), "Let's add some energy to your day!");
    }
}
