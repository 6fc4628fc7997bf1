// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use audiomatch::index::IndexKind;
use audiomatch::output::OutputFormat;
use audiomatch::types::{Severity, TransformKind};

/// audiomatch - Local audio provenance matching
///
/// Indexes reference tracks as segment embeddings and finds which reference a
/// (possibly filtered, overlaid or excerpted) query clip derives from. Audio is
/// read as raw mono f32 little-endian PCM.
#[derive(Parser, Debug)]
#[command(name = "audiomatch")]
#[command(
    author,
    version,
    about,
    long_about = None,
    after_help = "Quickstart:\n  audiomatch index refs/\n  audiomatch query clip.f32 --transform low-pass\n  audiomatch --format json stats"
)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Directory holding the cache, index and run stats
    #[arg(long, global = true, default_value = ".audiomatch")]
    pub state_dir: PathBuf,

    /// Explicit config file (defaults to .audiomatchrc.toml, then ~/.config/audiomatch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index reference tracks (files or directories of raw PCM)
    #[command(visible_aliases = ["ix", "i"])]
    Index {
        /// Files or directories to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Sample rate of the input PCM (defaults to embedding.sample_rate)
        #[arg(short = 'r', long)]
        sample_rate: Option<u32>,

        /// Index structure: auto, flat, or ivf
        #[arg(short, long)]
        kind: Option<IndexKind>,

        /// Rebuild from scratch instead of appending new tracks
        #[arg(short, long)]
        force: bool,

        /// Paths/patterns to exclude (can be specified multiple times)
        #[arg(long = "exclude", short = 'e')]
        exclude_paths: Vec<String>,

        /// Also index files skipped by .gitignore rules
        #[arg(long)]
        no_ignore: bool,
    },

    /// Find the reference tracks a query clip derives from
    #[command(visible_aliases = ["q"])]
    Query {
        /// Raw PCM query clip
        path: PathBuf,

        /// Sample rate of the query PCM (defaults to embedding.sample_rate)
        #[arg(short = 'r', long)]
        sample_rate: Option<u32>,

        /// Transform the query went through (detected when omitted)
        #[arg(short, long)]
        transform: Option<TransformKind>,

        /// Transform severity: mild, moderate, or severe
        #[arg(short, long)]
        severity: Option<Severity>,

        /// Track the query is believed to derive from
        #[arg(long)]
        expected: Option<String>,

        /// Drop matches below this similarity
        #[arg(long)]
        min_score: Option<f32>,

        /// Maximum number of matches to return
        #[arg(short = 'm', long)]
        max_matches: Option<usize>,

        /// Per-query deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show cache, index and last run statistics
    #[command(visible_aliases = ["st"])]
    Stats,

    /// Drop every cached embedding of a track
    Invalidate {
        /// Track id (file stem of the indexed file)
        file_id: String,
    },

    /// Remove cache records whose entry files are gone
    Prune,
}
