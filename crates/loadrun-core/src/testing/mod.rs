//! Testing utilities for deterministic run and batch tests.

pub mod mock_engine;

pub use mock_engine::{ExecutionRecord, MockEngine, MockRun};
