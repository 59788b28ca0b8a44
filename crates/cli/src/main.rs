#![deny(warnings)]

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use moodmix_core::config::{
    resolve_fusion_policy, resolve_path, resolve_strategy, AppConfig, Env, LibraryPaths, StdEnv,
    TopN, DEFAULT_CATALOG_PATH, DEFAULT_FALLBACK_DIR, DEFAULT_SONGS_DIR, DEFAULT_TOP_N,
    ENV_CATALOG_PATH, ENV_FALLBACK_DIR, ENV_SONGS_DIR,
};
use moodmix_core::emotion::{
    Detection, Emotion, EmotionDistribution, KeywordTextDetector, ProsodyAudioDetector,
    ProsodyWindow,
};
use moodmix_core::fusion::{FusionEngine, FusionWeights};
use moodmix_core::music::{decode_excerpt, MusicCatalog, SymphoniaFeatureExtractor, DEFAULT_EXCERPT};
use moodmix_core::recommend::{FallbackSongs, RecommendationEngine};
use moodmix_core::session::{Session, SessionConfig, SessionInput, SessionOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "moodmix")]
#[command(about = "Multimodal emotion fusion and mood-aware music recommendation")]
struct Args {
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[arg(long, global = true)]
    songs_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    fallback_dir: Option<PathBuf>,

    /// weighted_average or attention
    #[arg(long, global = true)]
    policy: Option<String>,

    /// mood_matching or mood_regulation
    #[arg(long, global = true)]
    strategy: Option<String>,

    /// Facial, audio and text weights, e.g. 0.4,0.35,0.25
    #[arg(long, global = true)]
    weights: Option<String>,

    #[arg(long, global = true, default_value_t = DEFAULT_TOP_N)]
    top_n: usize,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze every song in the songs directory and rewrite the catalog
    Analyze,
    /// Print how many catalog songs carry each dominant emotion
    Stats,
    /// Fuse the given readings and recommend music for the result
    Recommend(RecommendArgs),
}

#[derive(ClapArgs, Debug, Default)]
struct RecommendArgs {
    /// Facial classifier scores, e.g. happy=0.9,sad=0.1
    #[arg(long)]
    facial: Option<String>,

    /// Voice recording analyzed for prosody
    #[arg(long)]
    voice: Option<PathBuf>,

    #[arg(long)]
    text: Option<String>,

    #[arg(long)]
    facial_confidence: Option<f64>,

    #[arg(long)]
    audio_confidence: Option<f64>,

    #[arg(long)]
    text_confidence: Option<f64>,

    /// Number of playlist entries; 0 disables the playlist
    #[arg(long, default_value_t = 0)]
    playlist: usize,

    /// Skip the analyzed catalog and draw from the fallback lists only
    #[arg(long)]
    no_catalog: bool,

    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(&args, &env)?;

    tracing::info!(
        catalog = %cfg.paths.catalog.display(),
        policy = %cfg.fusion_policy,
        strategy = %cfg.strategy,
        top_n = cfg.top_n.get(),
        "config loaded"
    );

    match args.command {
        Command::Analyze => run_analyze(&cfg),
        Command::Stats => run_stats(&cfg),
        Command::Recommend(rec) => run_recommend(&cfg, rec).await,
    }
}

fn run_analyze(cfg: &AppConfig) -> anyhow::Result<()> {
    let mut catalog = MusicCatalog::load_or_empty(&cfg.paths.catalog);
    let extractor = SymphoniaFeatureExtractor::new();
    let report = catalog
        .rebuild(&cfg.paths.songs_dir, &extractor)
        .with_context(|| format!("failed to analyze {}", cfg.paths.songs_dir.display()))?;
    catalog
        .save(&cfg.paths.catalog)
        .with_context(|| format!("failed to save {}", cfg.paths.catalog.display()))?;

    println!("Analyzed {} songs.", report.analyzed);
    for (song, err) in &report.failures {
        println!("  skipped {song}: {err}");
    }
    print_stats(&catalog);
    Ok(())
}

fn run_stats(cfg: &AppConfig) -> anyhow::Result<()> {
    let catalog = MusicCatalog::load(&cfg.paths.catalog)
        .with_context(|| format!("failed to load {}", cfg.paths.catalog.display()))?;
    print_stats(&catalog);
    Ok(())
}

async fn run_recommend(cfg: &AppConfig, rec: RecommendArgs) -> anyhow::Result<()> {
    let input = build_session_input(&rec)?;

    let catalog = MusicCatalog::load_or_empty(&cfg.paths.catalog);
    let fallback = FallbackSongs::load(&cfg.paths.fallback_dir);
    let mut recommender = match rec.seed {
        Some(seed) => RecommendationEngine::with_rng(catalog, fallback, StdRng::seed_from_u64(seed)),
        None => RecommendationEngine::new(catalog, fallback),
    };
    recommender.set_strategy(cfg.strategy);
    recommender.set_top_n(cfg.top_n.get())?;

    let mut session = Session {
        text: KeywordTextDetector::new(),
        audio: ProsodyAudioDetector::new(),
        fusion: FusionEngine::new(cfg.fusion_policy, cfg.weights),
        recommender,
        config: SessionConfig {
            prefer_catalog: !rec.no_catalog,
            playlist_len: rec.playlist,
        },
    };

    let outcome = session.run(input).await;
    print_outcome(&outcome);
    Ok(())
}

fn build_session_input(rec: &RecommendArgs) -> anyhow::Result<SessionInput> {
    let facial = rec
        .facial
        .as_deref()
        .map(parse_scores)
        .transpose()
        .context("invalid --facial")?
        .map(Detection::from_scores);

    let audio = rec.voice.as_deref().and_then(|path| match voice_window(path) {
        Ok(window) => Some(window),
        Err(e) => {
            tracing::warn!(path = %path.display(), "voice recording skipped: {e:#}");
            None
        }
    });

    Ok(SessionInput {
        facial,
        audio,
        text: rec.text.clone(),
        facial_confidence: rec.facial_confidence,
        audio_confidence: rec.audio_confidence,
        text_confidence: rec.text_confidence,
    })
}

fn voice_window(path: &Path) -> anyhow::Result<ProsodyWindow> {
    let (samples, sample_rate) = decode_excerpt(path, DEFAULT_EXCERPT)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(ProsodyWindow::from_samples(&samples, sample_rate))
}

/// Parses `label=score` pairs separated by commas.
fn parse_scores(raw: &str) -> anyhow::Result<Vec<(String, f64)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (label, score) = pair
                .split_once('=')
                .with_context(|| format!("expected label=score, got {pair:?}"))?;
            let score: f64 = score
                .trim()
                .parse()
                .with_context(|| format!("invalid score for {}", label.trim()))?;
            Ok((label.trim().to_owned(), score))
        })
        .collect()
}

fn parse_weights(raw: &str) -> anyhow::Result<FusionWeights> {
    let parts = raw
        .split(',')
        .map(|w| w.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid --weights: {raw}"))?;
    let [facial, audio, text] = parts[..] else {
        anyhow::bail!("--weights takes exactly three values, got {}", parts.len());
    };
    Ok(FusionWeights::new(facial, audio, text)?)
}

fn print_stats(catalog: &MusicCatalog) {
    println!("Catalog holds {} songs.", catalog.len());
    for (emotion, count) in catalog.counts_by_emotion() {
        println!("  {emotion:<8} {count}");
    }
}

fn print_outcome(outcome: &SessionOutcome) {
    println!(
        "Dominant emotion: {} ({:.1}%)",
        outcome.fused.dominant,
        outcome.fused.confidence * 100.0
    );
    for (emotion, score) in ranked(&outcome.fused.distribution) {
        println!("  {emotion:<8} {:>5.1}%", score * 100.0);
    }
    println!("{}", outcome.explanation);
    match &outcome.song {
        Some(song) => println!("Recommended song: {song}"),
        None => println!("No songs available."),
    }
    if !outcome.playlist.is_empty() {
        println!("Playlist:");
        for (i, song) in outcome.playlist.iter().enumerate() {
            println!("  {}. {song}", i + 1);
        }
    }
}

/// Highest score first; ties keep precedence order.
fn ranked(distribution: &EmotionDistribution) -> Vec<(Emotion, f64)> {
    let mut scores: Vec<_> = distribution.iter().collect();
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    scores
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_config(args: &Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let paths = LibraryPaths {
        catalog: resolve_path(
            args.catalog.clone(),
            ENV_CATALOG_PATH,
            env,
            DEFAULT_CATALOG_PATH,
            "catalog",
        )?,
        songs_dir: resolve_path(
            args.songs_dir.clone(),
            ENV_SONGS_DIR,
            env,
            DEFAULT_SONGS_DIR,
            "songs directory",
        )?,
        fallback_dir: resolve_path(
            args.fallback_dir.clone(),
            ENV_FALLBACK_DIR,
            env,
            DEFAULT_FALLBACK_DIR,
            "fallback directory",
        )?,
    };

    let weights = match &args.weights {
        Some(raw) => parse_weights(raw)?,
        None => FusionWeights::DEFAULT,
    };

    Ok(AppConfig {
        paths,
        fusion_policy: resolve_fusion_policy(args.policy.clone(), env),
        weights,
        strategy: resolve_strategy(args.strategy.clone(), env)?,
        top_n: TopN::new(args.top_n)?,
    })
}
