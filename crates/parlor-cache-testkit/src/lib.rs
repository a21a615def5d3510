//! # Parlor Cache Testkit
//!
//! Testing utilities for the Parlor cache.
//!
//! This crate provides:
//!
//! - **Generators**: proptest strategies for ids, domain items, and
//!   randomized operation scripts against the store and the history engine
//! - **Fixtures**: helpers for setting up cache scenarios
//!
//! The crate's own `tests/` directory carries the differential fuzz
//! harnesses: the incremental order index against a from-scratch recompute,
//! and the chunk store's structural invariants over random op scripts.

pub mod fixtures;
pub mod generators;
