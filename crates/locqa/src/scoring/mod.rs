//! Scoring engine.
//!
//! [`compute_score`] is the pure aggregation. Everything else keeps the stored
//! score eventually consistent with the findings: per-file debounce timers for
//! responsiveness, a durable schedule and a stale sweep for correctness.

pub mod compute;
pub mod debounce;
pub mod service;
pub mod sweeper;

pub use compute::{compute_score, score_from_counts, ScoreSummary, ScoringWeights, SeverityCounts};
pub use debounce::{RecomputeSink, ScoreDebouncer};
pub use service::{ScoreRecomputer, ScoringService};
pub use sweeper::StaleScoreSweeper;
