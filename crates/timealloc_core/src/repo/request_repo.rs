//! Request group and request repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist request groups and requests with their windows/configurations.
//! - Snapshot the allocation pair onto each request at creation time.
//!
//! # Invariants
//! - Request creation runs in an IMMEDIATE transaction, so it serializes with
//!   allocation identity changes on the same database.
//! - Requests in accounted (non-DIRECT) groups must name a pair the proposal
//!   currently holds an allocation for.
//! - Stored request pairs are never rewritten.

use crate::model::allocation::AllocationKey;
use crate::model::proposal::ProposalId;
use crate::model::request::{NewRequest, ObservationType, Request, RequestGroup, RequestGroupId};
use crate::repo::allocation_repo::allocation_key_exists;
use crate::repo::proposal_repo::proposal_exists;
use crate::repo::{parse_uuid, MissingEntity, RepoError, RepoResult};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use uuid::Uuid;

/// Repository interface for request groups and their requests.
pub trait RequestRepository {
    fn create_request_group(
        &self,
        proposal_id: &ProposalId,
        name: &str,
        observation_type: ObservationType,
    ) -> RepoResult<RequestGroup>;
    fn get_request_group(&self, id: RequestGroupId) -> RepoResult<Option<RequestGroup>>;
    /// Appends one request to a group.
    fn create_request(&self, group_id: RequestGroupId, request: &NewRequest)
        -> RepoResult<Request>;
    /// Lists requests of one group in creation order.
    fn list_requests(&self, group_id: RequestGroupId) -> RepoResult<Vec<Request>>;
}

/// SQLite-backed request repository.
pub struct SqliteRequestRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRequestRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RequestRepository for SqliteRequestRepository<'_> {
    fn create_request_group(
        &self,
        proposal_id: &ProposalId,
        name: &str,
        observation_type: ObservationType,
    ) -> RepoResult<RequestGroup> {
        if !proposal_exists(self.conn, proposal_id)? {
            return Err(RepoError::NotFound(MissingEntity::Proposal(
                proposal_id.clone(),
            )));
        }

        let group = RequestGroup {
            id: Uuid::new_v4(),
            proposal_id: proposal_id.clone(),
            name: name.to_string(),
            observation_type,
        };
        self.conn.execute(
            "INSERT INTO request_groups (id, proposal_id, name, observation_type)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                group.id.to_string(),
                proposal_id.as_str(),
                name,
                observation_type_to_db(observation_type),
            ],
        )?;
        Ok(group)
    }

    fn get_request_group(&self, id: RequestGroupId) -> RepoResult<Option<RequestGroup>> {
        let row = self
            .conn
            .query_row(
                "SELECT proposal_id, name, observation_type
                 FROM request_groups
                 WHERE id = ?1;",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((proposal_id, name, observation_type)) = row else {
            return Ok(None);
        };
        Ok(Some(RequestGroup {
            id,
            proposal_id: ProposalId::new(proposal_id),
            name,
            observation_type: parse_observation_type(&observation_type)?,
        }))
    }

    fn create_request(
        &self,
        group_id: RequestGroupId,
        request: &NewRequest,
    ) -> RepoResult<Request> {
        request.key.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let group = SqliteRequestRepository::new(&tx)
            .get_request_group(group_id)?
            .ok_or(RepoError::NotFound(MissingEntity::RequestGroup(group_id)))?;

        if group.observation_type.is_accounted()
            && !allocation_key_exists(&tx, &group.proposal_id, &request.key)?
        {
            return Err(RepoError::UnallocatedKey {
                proposal_id: group.proposal_id,
                key: request.key.clone(),
            });
        }

        let request_id = Uuid::new_v4();
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM requests WHERE request_group_id = ?1;",
            [group_id.to_string()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO requests (id, request_group_id, instrument_type, semester, seq)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                request_id.to_string(),
                group_id.to_string(),
                request.key.instrument_type.as_str(),
                request.key.semester.as_str(),
                seq,
            ],
        )?;

        for window in &request.windows {
            tx.execute(
                "INSERT INTO windows (request_id, start_ms, end_ms) VALUES (?1, ?2, ?3);",
                params![request_id.to_string(), window.start_ms, window.end_ms],
            )?;
        }
        for configuration in &request.configurations {
            tx.execute(
                "INSERT INTO configurations (request_id, instrument_name) VALUES (?1, ?2);",
                params![request_id.to_string(), configuration.instrument_name.as_str()],
            )?;
        }

        tx.commit()?;
        debug!(
            "event=request_create module=repo status=ok proposal_id={} instrument_type={} semester={}",
            group.proposal_id, request.key.instrument_type, request.key.semester
        );

        Ok(Request {
            id: request_id,
            request_group_id: group_id,
            key: request.key.clone(),
        })
    }

    fn list_requests(&self, group_id: RequestGroupId) -> RepoResult<Vec<Request>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, instrument_type, semester
             FROM requests
             WHERE request_group_id = ?1
             ORDER BY seq ASC, id ASC;",
        )?;
        let mut rows = stmt.query([group_id.to_string()])?;
        let mut requests = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            requests.push(Request {
                id: parse_uuid(&id_text, "requests.id")?,
                request_group_id: group_id,
                key: AllocationKey {
                    instrument_type: row.get(1)?,
                    semester: row.get(2)?,
                },
            });
        }
        Ok(requests)
    }
}

fn observation_type_to_db(value: ObservationType) -> &'static str {
    match value {
        ObservationType::Normal => "NORMAL",
        ObservationType::Direct => "DIRECT",
    }
}

fn parse_observation_type(value: &str) -> RepoResult<ObservationType> {
    match value {
        "NORMAL" => Ok(ObservationType::Normal),
        "DIRECT" => Ok(ObservationType::Direct),
        other => Err(RepoError::InvalidData(format!(
            "invalid observation type `{other}` in request_groups.observation_type"
        ))),
    }
}
