//! Domain model for proposals, time allocations and observation requests.
//!
//! # Responsibility
//! - Define the value types shared by repositories and validator services.
//! - Keep the allocation pair comparison rules in one place.
//!
//! # Invariants
//! - An allocation is matched to requests by its `(instrument_type, semester)`
//!   pair, never by its row id.
//! - Requests carry a by-value snapshot of the pair they were created against.

pub mod allocation;
pub mod proposal;
pub mod request;
