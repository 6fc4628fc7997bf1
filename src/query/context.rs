// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::{Duration, Instant};

use crate::types::{Severity, TransformKind};

/// State of one query. Never shared between queries.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub transform: TransformKind,
    pub severity: Severity,
    pub expected_track_id: Option<String>,
    /// Mean top-1 similarity over segments completed so far.
    pub confidence: f32,
    pub started: Instant,
    pub deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new(
        transform: TransformKind,
        severity: Severity,
        expected_track_id: Option<String>,
        timeout: Option<Duration>,
    ) -> Self {
        let started = Instant::now();
        Self {
            transform,
            severity,
            expected_track_id,
            confidence: 0.0,
            started,
            deadline: timeout.map(|timeout| started + timeout),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}
