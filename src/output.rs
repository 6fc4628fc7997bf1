// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output formatting shared by CLI commands

use serde::Serialize;
use std::io::Write;

use crate::errors::Result;

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print `value` as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    writeln!(lock, "{rendered}").map_err(|source| crate::errors::MatchError::io("<stdout>", source))?;
    Ok(())
}

/// Similarity as a fixed-width percentage, e.g. ` 97.3%`.
pub fn format_similarity(similarity: f32) -> String {
    format!("{:>5.1}%", similarity * 100.0)
}
