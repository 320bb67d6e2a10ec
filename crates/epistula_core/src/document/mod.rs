//! TEI letter document engine: parse, address, edit, replay.
//!
//! # Responsibility
//! - Parse corpus XML into an editable tree and serialize it back in one
//!   stable format.
//! - Address nodes by indexed paths and apply typed correction actions.
//! - Extract person/place references for the metadata tables.
//!
//! # Invariants
//! - `serialize(parse(serialize(tree)))` is byte-identical to
//!   `serialize(tree)`.
//! - Applying the same action list to the same base document always yields
//!   the same bytes; the edit service relies on this for replay checks.

pub mod action;
pub mod mentions;
pub mod path;
pub mod tree;
