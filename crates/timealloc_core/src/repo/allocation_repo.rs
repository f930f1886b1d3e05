//! Time allocation repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD APIs over `time_allocations` storage.
//! - Surface pair collisions as `DuplicateKey` instead of raw constraint errors.
//!
//! # Invariants
//! - Write paths validate the pair and totals before SQL mutations.
//! - These writes do not consult request usage; callers gate identity changes
//!   through `UsageGuard` first.

use crate::model::allocation::{AllocationId, AllocationKey, AllocationTotals, TimeAllocation};
use crate::model::proposal::ProposalId;
use crate::repo::proposal_repo::proposal_exists;
use crate::repo::{is_unique_violation, parse_uuid, MissingEntity, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const ALLOCATION_SELECT_SQL: &str = "SELECT
    id,
    proposal_id,
    instrument_type,
    semester,
    std_allocation,
    std_time_used,
    rr_allocation,
    rr_time_used,
    tc_allocation,
    tc_time_used,
    ipp_limit,
    ipp_time_available
FROM time_allocations";

/// Repository interface for time allocation CRUD operations.
pub trait AllocationRepository {
    fn create_allocation(&self, allocation: &TimeAllocation) -> RepoResult<AllocationId>;
    fn get_allocation(&self, id: AllocationId) -> RepoResult<Option<TimeAllocation>>;
    fn list_allocations(&self, proposal_id: &ProposalId) -> RepoResult<Vec<TimeAllocation>>;
    /// Rewrites pair and totals of an existing allocation.
    fn update_allocation(&self, allocation: &TimeAllocation) -> RepoResult<()>;
    fn delete_allocation(&self, id: AllocationId) -> RepoResult<()>;
}

/// SQLite-backed time allocation repository.
pub struct SqliteAllocationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAllocationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl AllocationRepository for SqliteAllocationRepository<'_> {
    fn create_allocation(&self, allocation: &TimeAllocation) -> RepoResult<AllocationId> {
        allocation.key.validate()?;
        allocation.totals.validate()?;
        if !proposal_exists(self.conn, &allocation.proposal_id)? {
            return Err(RepoError::NotFound(MissingEntity::Proposal(
                allocation.proposal_id.clone(),
            )));
        }

        let totals = &allocation.totals;
        self.conn
            .execute(
                "INSERT INTO time_allocations (
                    id,
                    proposal_id,
                    instrument_type,
                    semester,
                    std_allocation,
                    std_time_used,
                    rr_allocation,
                    rr_time_used,
                    tc_allocation,
                    tc_time_used,
                    ipp_limit,
                    ipp_time_available
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
                params![
                    allocation.id.to_string(),
                    allocation.proposal_id.as_str(),
                    allocation.key.instrument_type.as_str(),
                    allocation.key.semester.as_str(),
                    totals.std_allocation,
                    totals.std_time_used,
                    totals.rr_allocation,
                    totals.rr_time_used,
                    totals.tc_allocation,
                    totals.tc_time_used,
                    totals.ipp_limit,
                    totals.ipp_time_available,
                ],
            )
            .map_err(|err| map_write_error(err, allocation))?;

        Ok(allocation.id)
    }

    fn get_allocation(&self, id: AllocationId) -> RepoResult<Option<TimeAllocation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ALLOCATION_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_allocation_row(row)?));
        }
        Ok(None)
    }

    fn list_allocations(&self, proposal_id: &ProposalId) -> RepoResult<Vec<TimeAllocation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ALLOCATION_SELECT_SQL}
             WHERE proposal_id = ?1
             ORDER BY semester ASC, instrument_type ASC;"
        ))?;
        let mut rows = stmt.query([proposal_id.as_str()])?;
        let mut allocations = Vec::new();
        while let Some(row) = rows.next()? {
            allocations.push(parse_allocation_row(row)?);
        }
        Ok(allocations)
    }

    fn update_allocation(&self, allocation: &TimeAllocation) -> RepoResult<()> {
        allocation.key.validate()?;
        allocation.totals.validate()?;

        let totals = &allocation.totals;
        let changed = self
            .conn
            .execute(
                "UPDATE time_allocations
                 SET
                    instrument_type = ?2,
                    semester = ?3,
                    std_allocation = ?4,
                    std_time_used = ?5,
                    rr_allocation = ?6,
                    rr_time_used = ?7,
                    tc_allocation = ?8,
                    tc_time_used = ?9,
                    ipp_limit = ?10,
                    ipp_time_available = ?11,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![
                    allocation.id.to_string(),
                    allocation.key.instrument_type.as_str(),
                    allocation.key.semester.as_str(),
                    totals.std_allocation,
                    totals.std_time_used,
                    totals.rr_allocation,
                    totals.rr_time_used,
                    totals.tc_allocation,
                    totals.tc_time_used,
                    totals.ipp_limit,
                    totals.ipp_time_available,
                ],
            )
            .map_err(|err| map_write_error(err, allocation))?;

        if changed == 0 {
            return Err(RepoError::NotFound(MissingEntity::Allocation(allocation.id)));
        }
        Ok(())
    }

    fn delete_allocation(&self, id: AllocationId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM time_allocations WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(MissingEntity::Allocation(id)));
        }
        Ok(())
    }
}

/// Returns whether the proposal holds a live allocation for `key`.
pub(crate) fn allocation_key_exists(
    conn: &Connection,
    proposal_id: &ProposalId,
    key: &AllocationKey,
) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM time_allocations
            WHERE proposal_id = ?1
              AND instrument_type = ?2
              AND semester = ?3
        );",
        params![
            proposal_id.as_str(),
            key.instrument_type.as_str(),
            key.semester.as_str(),
        ],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn map_write_error(err: rusqlite::Error, allocation: &TimeAllocation) -> RepoError {
    if is_unique_violation(&err) {
        return RepoError::DuplicateKey {
            proposal_id: allocation.proposal_id.clone(),
            key: allocation.key.clone(),
        };
    }
    err.into()
}

fn parse_allocation_row(row: &Row<'_>) -> RepoResult<TimeAllocation> {
    let id_text: String = row.get("id")?;
    let proposal_id: String = row.get("proposal_id")?;

    Ok(TimeAllocation {
        id: parse_uuid(&id_text, "time_allocations.id")?,
        proposal_id: ProposalId::new(proposal_id),
        key: AllocationKey {
            instrument_type: row.get("instrument_type")?,
            semester: row.get("semester")?,
        },
        totals: AllocationTotals {
            std_allocation: row.get("std_allocation")?,
            std_time_used: row.get("std_time_used")?,
            rr_allocation: row.get("rr_allocation")?,
            rr_time_used: row.get("rr_time_used")?,
            tc_allocation: row.get("tc_allocation")?,
            tc_time_used: row.get("tc_time_used")?,
            ipp_limit: row.get("ipp_limit")?,
            ipp_time_available: row.get("ipp_time_available")?,
        },
    })
}
