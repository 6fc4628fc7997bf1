// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audio file scanner using the ignore crate (same as ripgrep)

use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::audio::pcm::is_pcm_path;

/// File scanner that respects .gitignore and custom excludes
pub struct FileScanner {
    root: PathBuf,
    exclude_patterns: Vec<String>,
    respect_git_ignore: bool,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            exclude_patterns: Vec::new(),
            respect_git_ignore: true,
        }
    }

    /// Create scanner with exclude patterns
    pub fn with_excludes(root: impl AsRef<Path>, excludes: Vec<String>) -> Self {
        let mut scanner = Self::new(root);
        scanner.exclude_patterns = excludes;
        scanner
    }

    /// Enable or disable respect for `.gitignore` and `.ignore` rules
    pub fn with_gitignore(mut self, enabled: bool) -> Self {
        self.respect_git_ignore = enabled;
        self
    }

    fn make_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder.hidden(false);

        if self.respect_git_ignore {
            builder.git_ignore(true).git_exclude(true).git_global(true);
        } else {
            builder
                .ignore(false)
                .parents(false)
                .git_ignore(false)
                .git_exclude(false)
                .git_global(false);
        }

        builder
    }

    /// List raw PCM files below the root, sorted by path.
    ///
    /// A root that is itself a PCM file is returned as-is.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        if self.root.is_file() {
            return Ok(if is_pcm_path(&self.root) {
                vec![self.root.clone()]
            } else {
                Vec::new()
            });
        }

        let (tx, rx) = mpsc::channel();

        let walker = self
            .make_builder()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| name != ".audiomatch" && name != ".git")
                    .unwrap_or(true)
            })
            .build_parallel();

        let exclude_patterns = self.exclude_patterns.clone();

        walker.run(|| {
            let tx = tx.clone();
            let exclude_patterns = exclude_patterns.clone();

            Box::new(move |entry| {
                if let Ok(entry) = entry {
                    let path = entry.path();

                    if !exclude_patterns.is_empty() {
                        let path_str = path.to_string_lossy();
                        for pattern in &exclude_patterns {
                            if path_str.contains(pattern.as_str()) {
                                return ignore::WalkState::Continue;
                            }
                        }
                    }

                    if path.is_file() && is_pcm_path(path) {
                        let _ = tx.send(path.to_path_buf());
                    }
                }
                ignore::WalkState::Continue
            })
        });

        drop(tx);
        let mut files: Vec<PathBuf> = rx.into_iter().collect();
        files.sort();
        Ok(files)
    }
}

/// Track id derived from a file name: the stem, or the name when no stem exists.
pub fn track_id_for(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
