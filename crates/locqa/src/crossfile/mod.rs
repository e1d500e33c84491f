//! Batch-wide consistency checks, run once when a batch completes.

pub mod analyzer;
pub mod service;

pub use analyzer::{normalize_text, CrossFileAnalysis, CrossFileAnalyzer, FileSegments};
pub use service::{CrossFileOutcome, CrossFileService};
