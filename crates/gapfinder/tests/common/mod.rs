//! Shared test utilities for gapfinder integration tests.
//!
//! This module provides:
//! - `TestHarness`: an orchestrator on an in-memory database with a manual clock
//! - stub collaborators that fail on demand and record what they saw

pub mod harness;
pub mod stubs;

pub use harness::*;
pub use stubs::*;
