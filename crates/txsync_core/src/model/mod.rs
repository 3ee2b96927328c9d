//! Domain model types for txsync core.
//!
//! # Responsibility
//! - Define storage-agnostic records persisted by repositories.
//! - Keep validation rules next to the data they guard.

pub mod member;
