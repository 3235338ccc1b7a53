//! Relational store: schema access and the change-aware product upsert.
//!
//! - `model`: column view of a product and write outcomes.
//! - `repo`: SQL-only functions over a single-connection SQLite pool.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::WriteOutcome;
