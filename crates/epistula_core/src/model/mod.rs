//! Domain model for the collaborative letter correction store.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep one version-row shape shared by all correctable entity kinds.
//!
//! # Invariants
//! - Version rows are append-only facts; replacing content means appending a
//!   new version, never rewriting an old one.
//! - Every mutation is attributed to an [`actor::Actor`] through a log row.

pub mod actor;
pub mod audit;
pub mod entity;
