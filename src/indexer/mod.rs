// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexer module - handles file scanning, reference embedding, and run stats

pub mod build;
pub mod scanner;
pub mod stats;

pub use build::{IndexMode, IndexReport, Track, TrackFailure, TrackIndexer};
pub use scanner::{track_id_for, FileScanner};
