//! Crowdfunding escrow ledger.
//!
//! Wallet balances, contribution escrow, milestone-gated tranche releases,
//! creator expenses, revenue distribution and contributor governance. Every
//! operation runs in one SQLite transaction and leaves an audit entry.

pub mod api;
pub mod audit;
pub mod config;
pub mod contributions;
pub mod db;
pub mod errors;
pub mod expenses;
pub mod governance;
pub mod ledger;
pub mod milestones;
pub mod projects;
pub mod reports;
pub mod revenue;
pub mod trust_worker;
pub mod types;
pub mod wallets;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_properties;
#[cfg(test)]
mod test_scenarios;
#[cfg(test)]
mod test_support;
