//! Use-case services over the version store.
//!
//! # Responsibility
//! - Provide stable save/review entry points for core callers.
//! - Verify letter submissions by replaying their action lists before
//!   anything is persisted.
//!
//! # Invariants
//! - Services never bypass repository concurrency or validation contracts.

pub mod edit_service;
