//! In-memory change tracking for record bodies.
//!
//! # Responsibility
//! - Flatten nested trees into dot-path indexes (`dot_path`).
//! - Track written vs. pending state per record (`change_store`).
//!
//! # Invariants
//! - Nothing in this module performs I/O.

pub mod change_store;
pub mod dot_path;
