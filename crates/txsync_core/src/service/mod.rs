//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Decide transaction boundaries; repositories never do.

pub mod member_service;
