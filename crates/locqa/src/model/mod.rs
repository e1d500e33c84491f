//! Domain types shared by every layer of the pipeline.

pub mod batch;
pub mod file;
pub mod finding;
pub mod score;
pub mod segment;

pub use batch::{Batch, CrossFileFinding, CrossFileKind};
pub use file::{FileStatus, NewFile, ProcessingMode, QaFile, Stage};
pub use finding::{dedup_key, Category, Finding, Layer, NewFinding, ReviewStatus, Severity};
pub use score::{Score, ScoreStatus};
pub use segment::{validate_segments, Segment};
