//! Review workflow over pending version rows.
//!
//! # Responsibility
//! - Gate accept/reject decisions behind reviewer roles.
//! - Keep the latest-version chain consistent when a rejection demotes a
//!   head row.

pub mod gate;
