//! Core domain logic for telescope time allocations.
//! This crate owns the rule that an allocation's pair cannot change, and the
//! allocation cannot be deleted, while accounted requests still reference it.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::StoreConfig;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::allocation::{
    AllocationId, AllocationKey, AllocationTotals, KeyValidationError, TimeAllocation,
    TotalsValidationError,
};
pub use model::proposal::{Proposal, ProposalId};
pub use model::request::{
    Configuration, NewRequest, ObservationType, ObservationWindow, Request, RequestGroup,
    RequestGroupId, RequestId,
};
pub use repo::allocation_repo::{AllocationRepository, SqliteAllocationRepository};
pub use repo::proposal_repo::{ProposalRepository, SqliteProposalRepository};
pub use repo::request_graph::{Deadline, GraphError, GraphResult, RequestGraph, SqliteRequestGraph};
pub use repo::request_repo::{RequestRepository, SqliteRequestRepository};
pub use repo::{MissingEntity, RepoError, RepoResult};
pub use service::allocation_admin::{AllocationAdmin, ApplyOutcome, ApplySummary, EditRow};
pub use service::batch::{AllocationEdit, BatchDecision, EditAction};
pub use service::usage_guard::{
    Decision, Denial, DenialKind, GuardError, GuardResult, InvalidEditReason, UsageGuard,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
