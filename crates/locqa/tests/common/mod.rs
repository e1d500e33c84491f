//! Shared test utilities for locqa integration tests.
//!
//! This module provides:
//! - `TestHarness`: an in-memory database with an orchestrator wired to
//!   scripted collaborators
//! - Builders for segments and external findings

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{CountingSink, ScriptedProvider, SwitchableAudit, TestHarness, DEBOUNCE, PROJECT};
