pub mod eligibility;
pub mod findings;
pub mod normalizer;
pub mod reconciliation;
pub mod selector;
