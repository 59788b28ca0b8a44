use crate::emotion::{Emotion, EmotionDistribution};
use crate::music::{classify, ExtractError, FeatureExtractor, MusicFeatures};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "music::catalog";

pub const SONG_FILE_EXTENSION: &str = "mp3";

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("catalog io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("catalog root must be a JSON object")]
    NotAnObject,

    #[error("songs directory not found: {0}")]
    SongsDirMissing(PathBuf),
}

impl CatalogError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CatalogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SongEmotionRecord {
    pub features: MusicFeatures,
    pub emotions: EmotionDistribution,
    pub dominant_emotion: Emotion,
}

impl SongEmotionRecord {
    pub fn from_features(features: MusicFeatures) -> Self {
        let emotions = classify(&features);
        Self {
            features,
            emotions,
            dominant_emotion: emotions.dominant(),
        }
    }
}

/// Outcome of a library rebuild. Failed songs are left out of the catalog.
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub analyzed: usize,
    pub failures: Vec<(String, ExtractError)>,
}

/// Song id to classified record, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MusicCatalog {
    entries: Vec<(String, SongEmotionRecord)>,
}

impl MusicCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, song_id: &str) -> Option<&SongEmotionRecord> {
        self.entries
            .iter()
            .find(|(id, _)| id == song_id)
            .map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SongEmotionRecord)> {
        self.entries.iter().map(|(id, r)| (id.as_str(), r))
    }

    /// Adds or replaces a record, keeping the original position on replace.
    pub fn insert(&mut self, song_id: impl Into<String>, record: SongEmotionRecord) {
        let song_id = song_id.into();
        match self.entries.iter_mut().find(|(id, _)| *id == song_id) {
            Some((_, slot)) => *slot = record,
            None => self.entries.push((song_id, record)),
        }
    }

    /// Top `top_n` song ids by stored probability for `target`, highest first.
    /// Equal scores keep insertion order.
    pub fn rank_by_emotion(&self, target: Emotion, top_n: usize) -> Vec<&str> {
        let mut scored: Vec<(&str, f64)> = self
            .entries
            .iter()
            .map(|(id, r)| (id.as_str(), r.emotions.get(target)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.into_iter().take(top_n).map(|(id, _)| id).collect()
    }

    /// Number of songs per dominant emotion; every label is present.
    pub fn counts_by_emotion(&self) -> BTreeMap<Emotion, usize> {
        let mut counts: BTreeMap<Emotion, usize> = Emotion::ALL.iter().map(|e| (*e, 0)).collect();
        for (_, record) in &self.entries {
            *counts.entry(record.dominant_emotion).or_default() += 1;
        }
        counts
    }

    /// Reads a catalog file.
    ///
    /// Entries that cannot be interpreted (non-object values, missing or
    /// non-numeric features) are skipped with a warning; unknown fields are ignored.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
        let root: Value = serde_json::from_str(&text)?;
        let Value::Object(map) = root else {
            return Err(CatalogError::NotAnObject);
        };

        let mut catalog = Self::new();
        for (song_id, value) in map {
            match parse_entry(value) {
                Some(record) => catalog.insert(song_id, record),
                None => {
                    warn!(target: LOG_TARGET, song = %song_id, "skipping unreadable catalog entry")
                }
            }
        }
        info!(target: LOG_TARGET, path = %path.display(), songs = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Like [`MusicCatalog::load`], but a missing or unreadable file yields an
    /// empty catalog.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(target: LOG_TARGET, path = %path.display(), "catalog unavailable: {e}");
                Self::new()
            }
        }
    }

    /// Writes the whole catalog to a temporary sibling file, then moves it over `path`.
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| CatalogError::io(dir, e))?;

        let mut root = Map::new();
        for (song_id, record) in &self.entries {
            root.insert(song_id.clone(), serde_json::to_value(record)?);
        }
        let json = serde_json::to_string_pretty(&Value::Object(root))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CatalogError::io(dir, e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| CatalogError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| CatalogError::io(path, e.error))?;

        info!(target: LOG_TARGET, path = %path.display(), songs = self.len(), "catalog saved");
        Ok(())
    }

    /// Analyzes every song in `songs_dir` and replaces this catalog with the result.
    ///
    /// Songs whose features cannot be extracted are reported and left out. The
    /// current catalog is untouched unless the scan itself succeeds.
    pub fn rebuild(
        &mut self,
        songs_dir: &Path,
        extractor: &dyn FeatureExtractor,
    ) -> Result<RebuildReport, CatalogError> {
        let songs = list_songs(songs_dir)?;
        info!(target: LOG_TARGET, dir = %songs_dir.display(), songs = songs.len(), "analyzing library");

        let mut fresh = Self::new();
        let mut report = RebuildReport::default();
        for (song_id, path) in songs {
            debug!(target: LOG_TARGET, song = %song_id, "analyzing");
            match extractor.extract(&path) {
                Ok(features) => {
                    fresh.insert(song_id, SongEmotionRecord::from_features(features));
                    report.analyzed += 1;
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, song = %song_id, "feature extraction failed: {e}");
                    report.failures.push((song_id, e));
                }
            }
        }

        *self = fresh;
        info!(
            target: LOG_TARGET,
            analyzed = report.analyzed,
            failed = report.failures.len(),
            "library analysis finished"
        );
        Ok(report)
    }
}

/// Song files in `dir`, sorted by file name; the id is the file stem.
fn list_songs(dir: &Path) -> Result<Vec<(String, PathBuf)>, CatalogError> {
    if !dir.is_dir() {
        return Err(CatalogError::SongsDirMissing(dir.to_path_buf()));
    }
    let mut songs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| CatalogError::io(dir, e))? {
        let path = entry.map_err(|e| CatalogError::io(dir, e))?.path();
        let is_song = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(SONG_FILE_EXTENSION));
        if !is_song || !path.is_file() {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            songs.push((stem.to_owned(), path.clone()));
        }
    }
    songs.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(songs)
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    features: RawFeatures,
    #[serde(default)]
    emotions: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    dominant_emotion: Option<String>,
}

#[derive(Default, Deserialize)]
struct RawFeatures {
    tempo: Option<f64>,
    spectral_centroid_mean: Option<f64>,
    spectral_rolloff_mean: Option<f64>,
    zcr_mean: Option<f64>,
    mfcc_mean: Option<f64>,
    chroma_mean: Option<f64>,
    energy_mean: Option<f64>,
}

impl RawFeatures {
    fn complete(self) -> Option<MusicFeatures> {
        Some(MusicFeatures {
            tempo: self.tempo?,
            spectral_centroid_mean: self.spectral_centroid_mean?,
            spectral_rolloff_mean: self.spectral_rolloff_mean?,
            zcr_mean: self.zcr_mean?,
            mfcc_mean: self.mfcc_mean?,
            chroma_mean: self.chroma_mean?,
            energy_mean: self.energy_mean?,
        })
    }
}

fn parse_entry(value: Value) -> Option<SongEmotionRecord> {
    let raw: RawEntry = serde_json::from_value(value).ok()?;
    let features = raw.features.complete()?;
    let emotions = match raw.emotions {
        Some(scores) if !scores.is_empty() => stored_distribution(&scores),
        _ => classify(&features),
    };
    let dominant_emotion = raw
        .dominant_emotion
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| emotions.dominant());
    Some(SongEmotionRecord {
        features,
        emotions,
        dominant_emotion,
    })
}

/// Stored scores are kept verbatim when they already form a canonical
/// distribution, otherwise they are renormalized.
fn stored_distribution(scores: &BTreeMap<String, f64>) -> EmotionDistribution {
    let mut stored = EmotionDistribution::default();
    let mut canonical = true;
    for (label, score) in scores {
        match label.parse::<Emotion>() {
            Ok(emotion) if score.is_finite() && *score >= 0.0 => stored.set(emotion, *score),
            _ => canonical = false,
        }
    }
    if canonical && (stored.total() - 1.0).abs() < 1e-9 {
        stored
    } else {
        EmotionDistribution::from_labels(scores.iter().map(|(k, v)| (k, *v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::{HAPPY_PROFILE, SAD_PROFILE};

    fn happy_features() -> MusicFeatures {
        MusicFeatures {
            tempo: 130.0,
            energy_mean: 0.18,
            chroma_mean: 0.6,
            ..Default::default()
        }
    }

    fn sad_features() -> MusicFeatures {
        MusicFeatures {
            tempo: 70.0,
            energy_mean: 0.05,
            ..Default::default()
        }
    }

    /// Reads features from the file body: `happy`, `sad`, anything else fails.
    struct StubExtractor;

    impl FeatureExtractor for StubExtractor {
        fn extract(&self, path: &Path) -> Result<MusicFeatures, ExtractError> {
            match fs::read_to_string(path)?.trim() {
                "happy" => Ok(happy_features()),
                "sad" => Ok(sad_features()),
                other => Err(ExtractError::Decode(format!("bad stub body {other:?}"))),
            }
        }
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let mut catalog = MusicCatalog::new();
        catalog.insert("a", SongEmotionRecord::from_features(sad_features()));
        catalog.insert("b", SongEmotionRecord::from_features(happy_features()));
        catalog.insert("c", SongEmotionRecord::from_features(happy_features()));

        assert_eq!(catalog.rank_by_emotion(Emotion::Happy, 5), vec!["b", "c", "a"]);
        assert_eq!(catalog.rank_by_emotion(Emotion::Sad, 2), vec!["a", "b"]);
        assert!(MusicCatalog::new().rank_by_emotion(Emotion::Sad, 5).is_empty());
    }

    #[test]
    fn counts_cover_all_labels() {
        let mut catalog = MusicCatalog::new();
        catalog.insert("a", SongEmotionRecord::from_features(sad_features()));
        let counts = catalog.counts_by_emotion();
        assert_eq!(counts.len(), 4);
        assert_eq!(counts[&Emotion::Sad], 1);
        assert_eq!(counts[&Emotion::Angry], 0);
    }

    #[test]
    fn save_then_load_preserves_order_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json");

        let mut catalog = MusicCatalog::new();
        catalog.insert("zeta", SongEmotionRecord::from_features(happy_features()));
        catalog.insert("alpha", SongEmotionRecord::from_features(sad_features()));
        catalog.save(&path).unwrap();

        let loaded = MusicCatalog::load(&path).unwrap();
        assert_eq!(loaded, catalog);
        let ids: Vec<&str> = loaded.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
    }

    #[test]
    fn failed_save_leaves_previous_catalog_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let mut catalog = MusicCatalog::new();
        catalog.insert("kept", SongEmotionRecord::from_features(sad_features()));
        catalog.save(&path).unwrap();
        let before = fs::read(&path).unwrap();

        let mut changed = catalog.clone();
        changed.insert("new", SongEmotionRecord::from_features(happy_features()));

        // the parent of the target is a regular file
        let err = changed.save(&path.join("inner.json")).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));

        // the target is a directory, so the final rename fails
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        let err = changed.save(&blocked).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));

        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(MusicCatalog::load(&path).unwrap(), catalog);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["blocked".to_owned(), "db.json".to_owned()]);
        assert_eq!(fs::read_dir(&blocked).unwrap().count(), 0);
    }

    #[test]
    fn load_skips_incomplete_entries_and_ignores_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let json = r#"{
            "complete": {
                "features": {"tempo": 130, "spectral_centroid_mean": 1.0, "spectral_rolloff_mean": 2.0,
                             "zcr_mean": 0.1, "mfcc_mean": -3.0, "chroma_mean": 0.6, "energy_mean": 0.18},
                "emotions": {"happy": 0.7, "angry": 0.1, "sad": 0.05, "neutral": 0.15},
                "dominant_emotion": "happy",
                "bitrate": 320
            },
            "no_tempo": {
                "features": {"spectral_centroid_mean": 1.0, "spectral_rolloff_mean": 2.0,
                             "zcr_mean": 0.1, "mfcc_mean": -3.0, "chroma_mean": 0.6, "energy_mean": 0.18},
                "emotions": {"happy": 1.0},
                "dominant_emotion": "happy"
            },
            "garbage": "not an object",
            "no_emotions": {
                "features": {"tempo": 60, "spectral_centroid_mean": 1.0, "spectral_rolloff_mean": 2.0,
                             "zcr_mean": 0.1, "mfcc_mean": -3.0, "chroma_mean": 0.2, "energy_mean": 0.01}
            }
        }"#;
        fs::write(&path, json).unwrap();

        let catalog = MusicCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("complete").unwrap().emotions, HAPPY_PROFILE);
        let derived = catalog.get("no_emotions").unwrap();
        assert_eq!(derived.emotions, SAD_PROFILE);
        assert_eq!(derived.dominant_emotion, Emotion::Sad);
        assert!(catalog.get("no_tempo").is_none());
    }

    #[test]
    fn missing_catalog_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(MusicCatalog::load(&path), Err(CatalogError::Io { .. })));
        assert!(MusicCatalog::load_or_empty(&path).is_empty());
    }

    #[test]
    fn non_object_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(matches!(MusicCatalog::load(&path), Err(CatalogError::NotAnObject)));
    }

    #[test]
    fn rebuild_tolerates_per_song_failures() {
        let songs = tempfile::tempdir().unwrap();
        fs::write(songs.path().join("b_sunny.mp3"), "happy").unwrap();
        fs::write(songs.path().join("a_rainy.mp3"), "sad").unwrap();
        fs::write(songs.path().join("c_broken.mp3"), "???").unwrap();
        fs::write(songs.path().join("notes.txt"), "happy").unwrap();

        let mut catalog = MusicCatalog::new();
        let report = catalog.rebuild(songs.path(), &StubExtractor).unwrap();

        assert_eq!(report.analyzed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "c_broken");
        let ids: Vec<&str> = catalog.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a_rainy", "b_sunny"]);
        assert_eq!(catalog.get("b_sunny").unwrap().dominant_emotion, Emotion::Happy);
    }

    #[test]
    fn rebuild_of_missing_dir_keeps_previous_catalog() {
        let mut catalog = MusicCatalog::new();
        catalog.insert("kept", SongEmotionRecord::from_features(sad_features()));

        let err = catalog
            .rebuild(Path::new("/no/such/songs"), &StubExtractor)
            .unwrap_err();
        assert!(matches!(err, CatalogError::SongsDirMissing(_)));
        assert!(catalog.get("kept").is_some());
    }
}
