// SPDX-License-Identifier: MIT OR Apache-2.0

//! audiomatch - Local audio provenance matching tool
//!
//! Indexes reference tracks as cached segment embeddings and matches query
//! clips against them, tolerating filtering, overlays and excerpting.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::{IndexArgs, QueryArgs, StateDir};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "AUDIOMATCH_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let format = cli.format;
    let compact = cli.compact;
    let state = StateDir::new(&cli.state_dir);

    match cli.command {
        Commands::Index {
            paths,
            sample_rate,
            kind,
            force,
            exclude_paths,
            no_ignore,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::index(
                &state,
                config,
                IndexArgs {
                    paths,
                    sample_rate,
                    kind,
                    force,
                    exclude_paths,
                    no_ignore,
                },
                format,
                compact,
            )?;
        }
        Commands::Query {
            path,
            sample_rate,
            transform,
            severity,
            expected,
            min_score,
            max_matches,
            timeout_ms,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::query(
                &state,
                config,
                QueryArgs {
                    path,
                    sample_rate,
                    transform,
                    severity,
                    expected,
                    min_score,
                    max_matches,
                    timeout_ms,
                },
                format,
                compact,
            )?;
        }
        Commands::Stats => {
            commands::stats(&state, format, compact)?;
        }
        Commands::Invalidate { file_id } => {
            commands::invalidate(&state, &file_id, format, compact)?;
        }
        Commands::Prune => {
            commands::prune(&state, format, compact)?;
        }
    }

    Ok(())
}
