// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - multi-scale matching, re-ranking and enforcement

pub mod aggregate;
pub mod context;
pub mod enforce;
pub mod pipeline;
pub mod pool;
pub mod topk;
pub mod transform;

pub use aggregate::aggregate;
pub use context::QueryContext;
pub use enforce::{OriginalSource, Revalidation, SimilarityEnforcer};
pub use pipeline::{QueryInput, QueryOptions, QueryOutcome, QueryPipeline};
pub use pool::{CancelToken, TaskOutcome, WorkerPool};
pub use transform::{Probe, RankedHit, SearchStrategy, TransformOptimizer};
