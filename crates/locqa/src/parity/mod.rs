//! Parity between internal findings and a third-party QA tool's report.

pub mod category;
pub mod matcher;
pub mod service;

pub use category::normalize_category;
pub use matcher::{
    ExternalFinding, InternalFinding, MatchType, NormalizedExternal, ParityMatch, ParityMatcher,
    ParityResult, ParitySummary,
};
pub use service::{ParityReport, ParityService};
