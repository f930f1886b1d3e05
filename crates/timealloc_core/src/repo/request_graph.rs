//! Read-only traversal over a proposal's request graph.
//!
//! # Responsibility
//! - Answer whether any accounted request under a proposal references an
//!   allocation pair, without exposing storage details to validators.
//!
//! # Invariants
//! - DIRECT request groups are never visited.
//! - Traversal stops at the first matching request; rows after it are not read.
//! - Pairs are compared by value against each request's stored snapshot.
//! - An unknown proposal is `ProposalNotFound`, never "no usage".
//! - An elapsed deadline is an error, never "no usage".

use crate::db::DbError;
use crate::model::allocation::AllocationKey;
use crate::model::proposal::ProposalId;
use crate::model::request::RequestId;
use crate::repo::proposal_repo::proposal_exists;
use crate::repo::{parse_uuid, RepoError};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised while traversing the request graph.
#[derive(Debug)]
pub enum GraphError {
    ProposalNotFound(ProposalId),
    DeadlineExceeded { limit: Duration, elapsed: Duration },
    Db(DbError),
    InvalidData(String),
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProposalNotFound(id) => write!(f, "proposal {id} not found"),
            Self::DeadlineExceeded { limit, elapsed } => write!(
                f,
                "usage check exceeded its {} ms limit after {} ms",
                limit.as_millis(),
                elapsed.as_millis()
            ),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid request graph data: {message}"),
        }
    }
}

impl Error for GraphError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for GraphError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for GraphError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Db(err) => Self::Db(err),
            other => Self::InvalidData(other.to_string()),
        }
    }
}

/// Point in time after which a traversal must give up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started_at: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn unbounded() -> Self {
        Self {
            started_at: Instant::now(),
            limit: None,
        }
    }

    /// Starts the clock now; `limit` counts from this call.
    pub fn after(limit: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn from_timeout(limit: Option<Duration>) -> Self {
        limit.map_or_else(Self::unbounded, Self::after)
    }

    pub fn check(&self) -> GraphResult<()> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let elapsed = self.started_at.elapsed();
        if elapsed >= limit {
            return Err(GraphError::DeadlineExceeded { limit, elapsed });
        }
        Ok(())
    }
}

/// Traversal contract over proposal → request groups → requests.
pub trait RequestGraph {
    /// Returns the first accounted request under `proposal_id` whose stored
    /// pair equals `key`.
    fn first_usage(
        &self,
        proposal_id: &ProposalId,
        key: &AllocationKey,
    ) -> GraphResult<Option<RequestId>>;

    fn has_usage(&self, proposal_id: &ProposalId, key: &AllocationKey) -> GraphResult<bool> {
        Ok(self.first_usage(proposal_id, key)?.is_some())
    }
}

impl<G: RequestGraph + ?Sized> RequestGraph for &G {
    fn first_usage(
        &self,
        proposal_id: &ProposalId,
        key: &AllocationKey,
    ) -> GraphResult<Option<RequestId>> {
        (**self).first_usage(proposal_id, key)
    }
}

/// SQLite-backed request graph.
///
/// Bind it to a `Transaction` to read the same snapshot the enclosing write
/// will commit against.
pub struct SqliteRequestGraph<'conn> {
    conn: &'conn Connection,
    deadline: Deadline,
}

impl<'conn> SqliteRequestGraph<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            deadline: Deadline::unbounded(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

impl RequestGraph for SqliteRequestGraph<'_> {
    fn first_usage(
        &self,
        proposal_id: &ProposalId,
        key: &AllocationKey,
    ) -> GraphResult<Option<RequestId>> {
        self.deadline.check()?;
        if !proposal_exists(self.conn, proposal_id)? {
            return Err(GraphError::ProposalNotFound(proposal_id.clone()));
        }

        let mut groups = self.conn.prepare(
            "SELECT id
             FROM request_groups
             WHERE proposal_id = ?1
               AND observation_type <> 'DIRECT'
             ORDER BY created_at ASC, id ASC;",
        )?;
        let mut requests = self.conn.prepare(
            "SELECT id, instrument_type, semester
             FROM requests
             WHERE request_group_id = ?1
             ORDER BY seq ASC, id ASC;",
        )?;

        let mut group_rows = groups.query([proposal_id.as_str()])?;
        while let Some(group_row) = group_rows.next()? {
            self.deadline.check()?;
            let group_id: String = group_row.get(0)?;

            let mut request_rows = requests.query([group_id.as_str()])?;
            while let Some(row) = request_rows.next()? {
                self.deadline.check()?;
                let instrument_type: String = row.get(1)?;
                let semester: String = row.get(2)?;
                if instrument_type == key.instrument_type && semester == key.semester {
                    let id_text: String = row.get(0)?;
                    return Ok(Some(parse_uuid(&id_text, "requests.id")?));
                }
            }
        }

        Ok(None)
    }
}
