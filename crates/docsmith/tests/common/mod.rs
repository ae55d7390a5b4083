//! Shared test utilities for docsmith integration tests.
//!
//! - `TestHarness` wires a `JobRunner` to an in-memory database and fakes
//! - `fakes` holds the scripted sandbox, source host, queue and sink

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
