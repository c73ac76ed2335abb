//! Scenario files and random scenario generation.

pub mod scenario;
