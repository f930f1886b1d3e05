//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from validator/business orchestration.
//!
//! # Invariants
//! - Writes validate allocation pairs and totals before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `DuplicateKey`) in
//!   addition to DB transport errors.
//! - Request allocation pairs are read back verbatim; no normalization.

use crate::db::DbError;
use crate::model::allocation::{
    AllocationId, AllocationKey, KeyValidationError, TotalsValidationError,
};
use crate::model::proposal::ProposalId;
use crate::model::request::RequestGroupId;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod allocation_repo;
pub mod proposal_repo;
pub mod request_graph;
pub mod request_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Entity referenced by id that does not exist in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entity", content = "id", rename_all = "snake_case")]
pub enum MissingEntity {
    Proposal(ProposalId),
    Allocation(AllocationId),
    RequestGroup(RequestGroupId),
}

impl Display for MissingEntity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposal(id) => write!(f, "proposal {id}"),
            Self::Allocation(id) => write!(f, "time allocation {id}"),
            Self::RequestGroup(id) => write!(f, "request group {id}"),
        }
    }
}

/// Repository error for proposal, allocation and request persistence.
#[derive(Debug)]
pub enum RepoError {
    InvalidKey(KeyValidationError),
    InvalidTotals(TotalsValidationError),
    Db(DbError),
    NotFound(MissingEntity),
    /// Another live allocation on the proposal already holds this pair.
    DuplicateKey {
        proposal_id: ProposalId,
        key: AllocationKey,
    },
    /// An accounted request names a pair the proposal holds no allocation for.
    UnallocatedKey {
        proposal_id: ProposalId,
        key: AllocationKey,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(err) => write!(f, "{err}"),
            Self::InvalidTotals(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(missing) => write!(f, "{missing} not found"),
            Self::DuplicateKey { proposal_id, key } => write!(
                f,
                "proposal {proposal_id} already has a time allocation for {key}"
            ),
            Self::UnallocatedKey { proposal_id, key } => write!(
                f,
                "proposal {proposal_id} has no time allocation for {key}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidKey(err) => Some(err),
            Self::InvalidTotals(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KeyValidationError> for RepoError {
    fn from(value: KeyValidationError) -> Self {
        Self::InvalidKey(value)
    }
}

impl From<TotalsValidationError> for RepoError {
    fn from(value: TotalsValidationError) -> Self {
        Self::InvalidTotals(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
