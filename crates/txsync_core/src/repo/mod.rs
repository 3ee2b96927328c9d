//! Repository layer.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Keep SQL and connection handling out of service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`) next to translated
//!   data access errors; driver errors never escape.

pub mod access;
pub mod member_repo;
