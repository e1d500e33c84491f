//! AI review tiers.
//!
//! L2 screening and L3 deep review both go through a [`ModelChain`]: an
//! explicit, ordered list of [`ModelId`]s tried in turn until one returns
//! output in the requested structure.

pub mod chain;
pub mod deep_review;
pub mod http;
pub mod model;
mod prompt;
pub mod provider;
pub mod screening;

pub use chain::{ChainPolicy, ModelChain};
pub use deep_review::DeepReviewTier;
pub use http::HttpAiProvider;
pub use model::{AiTier, ModelId};
pub use provider::{AiError, AiProvider, TierRequest};
pub use screening::{ScreeningOutput, ScreeningTier, SCREENING_RULE};
