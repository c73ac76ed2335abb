pub mod baseline;
pub mod ruleset;
