use crate::fusion::{FusionPolicy, FusionWeights};
use crate::recommend::Strategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CATALOG_PATH: &str = "data/music_emotion_db.json";
pub const DEFAULT_SONGS_DIR: &str = "songs";
pub const DEFAULT_FALLBACK_DIR: &str = "emotions_file";
pub const DEFAULT_TOP_N: usize = 5;
pub const ENV_CATALOG_PATH: &str = "MOODMIX_CATALOG";
pub const ENV_SONGS_DIR: &str = "MOODMIX_SONGS_DIR";
pub const ENV_FALLBACK_DIR: &str = "MOODMIX_FALLBACK_DIR";
pub const ENV_FUSION_POLICY: &str = "MOODMIX_FUSION_POLICY";
pub const ENV_STRATEGY: &str = "MOODMIX_STRATEGY";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LibraryPaths {
    pub catalog: PathBuf,
    pub songs_dir: PathBuf,
    pub fallback_dir: PathBuf,
}

impl Default for LibraryPaths {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from(DEFAULT_CATALOG_PATH),
            songs_dir: PathBuf::from(DEFAULT_SONGS_DIR),
            fallback_dir: PathBuf::from(DEFAULT_FALLBACK_DIR),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopN(usize);

impl TopN {
    pub fn new(n: usize) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::ZeroTopN);
        }
        Ok(Self(n))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for TopN {
    fn default() -> Self {
        Self(DEFAULT_TOP_N)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub paths: LibraryPaths,
    pub fusion_policy: FusionPolicy,
    pub weights: FusionWeights,
    pub strategy: Strategy,
    pub top_n: TopN,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("fusion weights must be finite, non-negative and not all zero (got {facial}, {audio}, {text})")]
    InvalidWeights { facial: f64, audio: f64, text: f64 },
    #[error("unknown recommendation strategy: {0}")]
    UnknownStrategy(String),
    #[error("top-n must be > 0")]
    ZeroTopN,
    #[error("{0} path must not be empty")]
    EmptyPath(&'static str),
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_path(
    cli_value: Option<PathBuf>,
    env_key: &str,
    env: &impl Env,
    default: &str,
    what: &'static str,
) -> Result<PathBuf, ConfigError> {
    let path = match cli_value {
        Some(p) => p,
        None => PathBuf::from(env.var(env_key).unwrap_or_else(|| default.to_owned())),
    };
    if path.as_os_str().is_empty() {
        return Err(ConfigError::EmptyPath(what));
    }
    Ok(path)
}

pub fn resolve_strategy(cli_value: Option<String>, env: &impl Env) -> Result<Strategy, ConfigError> {
    let name = resolve_string_with_default(
        cli_value,
        ENV_STRATEGY,
        env,
        Strategy::default().as_str(),
    );
    name.parse()
}

pub fn resolve_fusion_policy(cli_value: Option<String>, env: &impl Env) -> FusionPolicy {
    let name = resolve_string_with_default(
        cli_value,
        ENV_FUSION_POLICY,
        env,
        FusionPolicy::default().as_str(),
    );
    FusionPolicy::from_name(&name)
}
