//! Core use-case services.
//!
//! # Responsibility
//! - Decide whether allocation identity changes and deletions are legal.
//! - Apply accepted allocation edit batches atomically.
//!
//! # Invariants
//! - Decisions are pure reads; only `AllocationAdmin` writes, and only after
//!   the whole batch was allowed inside the same transaction.

pub mod allocation_admin;
pub mod batch;
pub mod usage_guard;
