// SPDX-License-Identifier: MIT OR Apache-2.0

//! audiomatch - Local audio provenance matching library
//!
//! Reference tracks are cut into fixed segments, embedded, cached per file
//! and stored in a fingerprint index. Queries run per segment and per
//! resampling scale, get re-ranked for known transforms, aggregated per track
//! and checked against a severity-dependent similarity floor.

pub mod audio;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod hashing;
pub mod index;
pub mod indexer;
pub mod output;
pub mod query;
pub mod types;
pub mod vector;

pub use errors::{EmbedError, MatchError, Result};
