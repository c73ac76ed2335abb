//! Foundational record types shared by every stage of an allocation run.

pub mod currency;
pub mod deal;
pub mod ledger;
pub mod party;
pub mod security;
