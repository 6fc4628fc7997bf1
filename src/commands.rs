// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command handlers behind the CLI

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use audiomatch::audio::pcm::read_pcm_f32le;
use audiomatch::cache::{CacheStats, EmbeddingCache};
use audiomatch::config::Config;
use audiomatch::embedding::{EmbeddingProvider, SpectralEmbedder};
use audiomatch::index::{FingerprintIndex, IndexKind, IndexStats, SharedIndex};
use audiomatch::indexer::stats::{
    duration_to_millis, load_stats, now_epoch_millis, persist_last_run, LastRunStats,
};
use audiomatch::indexer::{track_id_for, FileScanner, IndexReport, Track, TrackIndexer};
use audiomatch::output::{format_similarity, print_json, OutputFormat};
use audiomatch::query::{QueryInput, QueryOptions, QueryOutcome, QueryPipeline};
use audiomatch::types::{QueryResponse, Severity, TransformKind};

const CACHE_DIR: &str = "cache";
const INDEX_DIR: &str = "index";

/// Resolved locations under the state directory.
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    fn open_cache(&self) -> Result<EmbeddingCache> {
        EmbeddingCache::open(self.cache_dir())
            .with_context(|| format!("failed to open cache at {}", self.cache_dir().display()))
    }

    fn load_index(&self) -> Result<FingerprintIndex> {
        let dir = self.index_dir();
        if !FingerprintIndex::exists(&dir) {
            bail!(
                "no index found at {}\n\nSuggestion: run 'audiomatch index <paths>' first",
                dir.display()
            );
        }
        FingerprintIndex::load(&dir)
            .with_context(|| format!("failed to load index from {}", dir.display()))
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(Config::load()),
    }
}

fn provider(config: &Config) -> Arc<dyn EmbeddingProvider> {
    Arc::new(SpectralEmbedder::new(config.embedding.clone()))
}

pub struct IndexArgs {
    pub paths: Vec<PathBuf>,
    pub sample_rate: Option<u32>,
    pub kind: Option<IndexKind>,
    pub force: bool,
    pub exclude_paths: Vec<String>,
    pub no_ignore: bool,
}

#[derive(Serialize)]
struct IndexSummary<'a> {
    files: usize,
    #[serde(flatten)]
    report: &'a IndexReport,
    index: IndexStats,
}

pub fn index(
    state: &StateDir,
    mut config: Config,
    args: IndexArgs,
    format: OutputFormat,
    compact: bool,
) -> Result<()> {
    let started_at_ms = now_epoch_millis();
    if let Some(kind) = args.kind {
        config.index.kind = kind;
    }
    let sample_rate = args.sample_rate.unwrap_or(config.embedding.sample_rate);

    let scan_started = Instant::now();
    let mut files = Vec::new();
    for path in &args.paths {
        if !path.exists() {
            bail!("path not found: {}", path.display());
        }
        let found = FileScanner::with_excludes(path, args.exclude_paths.clone())
            .with_gitignore(!args.no_ignore)
            .list_files()
            .with_context(|| format!("failed to scan {}", path.display()))?;
        files.extend(found);
    }
    if files.is_empty() {
        bail!("no PCM files (.f32, .pcm, .raw) found under the given paths");
    }

    let mut seen = HashSet::new();
    let mut tracks = Vec::with_capacity(files.len());
    for file in &files {
        let track_id = track_id_for(file);
        if !seen.insert(track_id.clone()) {
            tracing::warn!(track_id, path = %file.display(), "duplicate track id; keeping the first file");
            continue;
        }
        let clip = read_pcm_f32le(file, sample_rate)
            .with_context(|| format!("failed to read {}", file.display()))?;
        tracks.push(Track::new(track_id, clip));
    }
    let scan_ms = duration_to_millis(scan_started.elapsed());

    let cache = Arc::new(state.open_cache()?);
    let embedder = provider(&config);
    let indexer = TrackIndexer::new(config, embedder)?
        .with_cache(cache)
        .with_progress(format == OutputFormat::Text);

    let index_dir = state.index_dir();
    let (index, report) = if args.force || !FingerprintIndex::exists(&index_dir) {
        indexer.build(&tracks)?
    } else {
        let shared = SharedIndex::new(state.load_index()?);
        let report = indexer.update_or_rebuild(&shared, &tracks)?;
        let snapshot = shared.snapshot();
        (FingerprintIndex::clone(&snapshot), report)
    };

    if index.is_empty() {
        bail!(
            "no track could be indexed ({} failed)",
            report.failures.len()
        );
    }

    let save_started = Instant::now();
    index
        .save(&index_dir)
        .with_context(|| format!("failed to save index to {}", index_dir.display()))?;
    let save_ms = duration_to_millis(save_started.elapsed());

    let mut run = report.to_run_stats(args.force, started_at_ms, now_epoch_millis());
    run.timings_ms.scan_ms = Some(scan_ms);
    run.timings_ms.save_ms = Some(save_ms);
    persist_last_run(&state.root, run)?;

    let summary = IndexSummary {
        files: files.len(),
        report: &report,
        index: index.stats(),
    };
    match format {
        OutputFormat::Json => print_json(&summary, compact)?,
        OutputFormat::Text => print_index_text(&summary),
    }
    Ok(())
}

fn print_index_text(summary: &IndexSummary<'_>) {
    let report = summary.report;
    println!(
        "{} Indexed {} tracks ({} cached, {} skipped, {} failed) in {} mode",
        "✓".green(),
        report.tracks_indexed.to_string().cyan(),
        report.tracks_cached,
        report.tracks_skipped,
        report.tracks_failed,
        report.mode.as_str()
    );
    println!(
        "  index: kind={} vectors={} tracks={} dim={} generation={}",
        summary.index.kind,
        summary.index.vectors,
        summary.index.tracks,
        summary.index.dimension,
        summary.index.generation
    );
    for failure in &report.failures {
        println!("  {} {}: {}", "✗".red(), failure.track_id, failure.reason);
    }
}

pub struct QueryArgs {
    pub path: PathBuf,
    pub sample_rate: Option<u32>,
    pub transform: Option<TransformKind>,
    pub severity: Option<Severity>,
    pub expected: Option<String>,
    pub min_score: Option<f32>,
    pub max_matches: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct QuerySummary<'a> {
    #[serde(flatten)]
    response: QueryResponse,
    transform: TransformKind,
    severity: Severity,
    strategy: &'static str,
    scales_run: usize,
    segments_completed: usize,
    segments_total: usize,
    early_terminated: bool,
    timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    promoted: Option<&'a str>,
}

pub fn query(
    state: &StateDir,
    config: Config,
    args: QueryArgs,
    format: OutputFormat,
    compact: bool,
) -> Result<()> {
    let sample_rate = args.sample_rate.unwrap_or(config.embedding.sample_rate);
    let clip = read_pcm_f32le(&args.path, sample_rate)
        .with_context(|| format!("failed to read {}", args.path.display()))?;

    let index = Arc::new(SharedIndex::new(state.load_index()?));
    let cache = Arc::new(state.open_cache()?);
    let embedder = provider(&config);
    let use_cache = config.pipeline.use_query_cache;
    let mut pipeline = QueryPipeline::new(config, index, embedder)?;
    if use_cache {
        pipeline = pipeline.with_cache(cache);
    }

    let options = QueryOptions {
        min_score: args.min_score,
        max_matches: args.max_matches,
        expected_track_id: args.expected,
        transform: args.transform,
        severity: args.severity,
        timeout: args.timeout_ms.map(Duration::from_millis),
    };
    let outcome = pipeline
        .run(QueryInput::Audio(clip), &options)
        .with_context(|| format!("query failed for {}", args.path.display()))?;
    let summary = QuerySummary {
        response: outcome.to_response(&options),
        transform: outcome.transform,
        severity: outcome.severity,
        strategy: outcome.strategy.as_str(),
        scales_run: outcome.scales_run,
        segments_completed: outcome.segments_completed,
        segments_total: outcome.segments_total,
        early_terminated: outcome.early_terminated,
        timed_out: outcome.timed_out,
        promoted: outcome.result.promoted.as_deref(),
    };

    match format {
        OutputFormat::Json => print_json(&summary, compact)?,
        OutputFormat::Text => print_query_text(&summary, &outcome),
    }
    Ok(())
}

fn print_query_text(summary: &QuerySummary<'_>, outcome: &QueryOutcome) {
    println!(
        "{} transform={} severity={} strategy={} segments={}/{} scales={}",
        "🔍".cyan(),
        summary.transform,
        summary.severity,
        summary.strategy,
        summary.segments_completed,
        summary.segments_total,
        summary.scales_run
    );
    if summary.response.matches.is_empty() {
        println!("{} No matches", "ℹ".cyan());
        return;
    }
    for (rank, found) in summary.response.matches.iter().enumerate() {
        let marker = if summary.promoted == Some(found.track_id.as_str()) {
            format!(" {}", "(revalidated)".yellow())
        } else {
            String::new()
        };
        println!(
            "  {:>2}. {} {}{}",
            rank + 1,
            format_similarity(found.similarity).green(),
            found.track_id.cyan(),
            marker
        );
    }
    let mut notes = Vec::new();
    if outcome.early_terminated {
        notes.push("early stop");
    }
    if outcome.timed_out {
        notes.push("timed out");
    }
    println!(
        "\n{} {} of {} matches in {} ms{}",
        "✓".green(),
        summary.response.matches.len().to_string().cyan(),
        summary.response.total_count,
        summary.response.elapsed_ms,
        if notes.is_empty() {
            String::new()
        } else {
            format!(" ({})", notes.join(", "))
        }
    );
}

#[derive(Serialize)]
struct StatsResult {
    state_dir: String,
    cache: CacheStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<IndexStats>,
    stats_schema_version: Option<String>,
    last_run: Option<LastRunStats>,
}

pub fn stats(state: &StateDir, format: OutputFormat, compact: bool) -> Result<()> {
    let cache = state.open_cache()?.stats();
    let index = if FingerprintIndex::exists(&state.index_dir()) {
        Some(state.load_index()?.stats())
    } else {
        None
    };
    let persisted = load_stats(&state.root);
    let result = StatsResult {
        state_dir: state.root.display().to_string(),
        cache,
        index,
        stats_schema_version: persisted.as_ref().map(|p| p.schema_version.clone()),
        last_run: persisted.and_then(|p| p.last_run),
    };

    match format {
        OutputFormat::Json => print_json(&result, compact)?,
        OutputFormat::Text => print_stats_text(&result),
    }
    Ok(())
}

fn fmt_opt_u64(value: Option<u64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn print_stats_text(result: &StatsResult) {
    println!("State dir: {}", result.state_dir);
    println!(
        "Cache: entries={} bytes={}",
        result.cache.count, result.cache.total_size
    );
    match &result.index {
        Some(index) => println!(
            "Index: kind={} vectors={} tracks={} dim={} generation={}{}",
            index.kind,
            index.vectors,
            index.tracks,
            index.dimension,
            index.generation,
            index
                .partitions
                .map(|p| format!(" partitions={p}"))
                .unwrap_or_default()
        ),
        None => println!("Index: none"),
    }
    if let Some(run) = result.last_run.as_ref() {
        println!(
            "Last run: mode={} force={} total_ms={} indexed={} cached={} skipped={} failed={} segments={}",
            run.mode,
            run.force,
            run.total_ms,
            run.indexed_tracks,
            run.cache_reuse.hit,
            run.skipped_tracks,
            run.failed_tracks,
            run.segments
        );
        println!(
            "Timings(ms): scan={} embed={} index={} save={}",
            fmt_opt_u64(run.timings_ms.scan_ms),
            fmt_opt_u64(run.timings_ms.embed_ms),
            fmt_opt_u64(run.timings_ms.index_ms),
            fmt_opt_u64(run.timings_ms.save_ms)
        );
    } else {
        println!("Last run: unknown");
    }
}

#[derive(Serialize)]
struct CountResult<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_id: Option<&'a str>,
    removed: usize,
}

pub fn invalidate(state: &StateDir, file_id: &str, format: OutputFormat, compact: bool) -> Result<()> {
    let cache = state.open_cache()?;
    let removed = cache
        .invalidate(file_id)
        .with_context(|| format!("failed to invalidate '{file_id}'"))?;
    cache.close()?;

    match format {
        OutputFormat::Json => print_json(
            &CountResult {
                action: "invalidate",
                file_id: Some(file_id),
                removed,
            },
            compact,
        )?,
        OutputFormat::Text => println!(
            "{} Removed {} cache entries for {}",
            "✓".green(),
            removed.to_string().cyan(),
            file_id
        ),
    }
    Ok(())
}

pub fn prune(state: &StateDir, format: OutputFormat, compact: bool) -> Result<()> {
    let cache = state.open_cache()?;
    let removed = cache.prune_stale().context("failed to prune cache")?;
    cache.close()?;

    match format {
        OutputFormat::Json => print_json(
            &CountResult {
                action: "prune",
                file_id: None,
                removed,
            },
            compact,
        )?,
        OutputFormat::Text => println!(
            "{} Pruned {} stale cache records",
            "✓".green(),
            removed.to_string().cyan()
        ),
    }
    Ok(())
}
