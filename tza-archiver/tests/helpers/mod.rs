//! Test Helper Utilities
//!
//! Shared utilities for testing tza-archiver

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_submitter;

pub use fixtures::{cid, cids, create_test_pipeline};
pub use mock_submitter::MockSubmitter;
