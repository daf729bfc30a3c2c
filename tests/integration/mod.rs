//! Integration tests for wirecheck
//!
//! Runs the harness end to end against the bundled reference server and
//! client, plus deliberately broken subjects built from shell scripts.

pub mod infrastructure;
pub mod scenarios;

pub use infrastructure::{PortAllocator, SubjectFixtures};
