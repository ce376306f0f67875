#![allow(dead_code)]

//! Shared test utilities for finreport integration tests.
//!
//! - `TestHarness` wires an engine over a scripted provider and a temp database
//! - builders for configs, generated report HTML and extraction answers

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
