//! Orchestration: capture inputs, plan, commit, signal.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod run;

pub use config::EngineConfig;
pub use dispatch::{Operation, Response, StartAllocation};
pub use error::AllocationError;
pub use run::{plan_allocation, AllocationEngine, AllocationOutcome, AllocationReport, Services};
