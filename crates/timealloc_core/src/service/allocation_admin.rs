//! Transactional write path for allocation edit batches.
//!
//! # Responsibility
//! - Run the usage checks and the resulting writes as one unit of work.
//!
//! # Invariants
//! - Checks and writes share one IMMEDIATE transaction, so no request can be
//!   created against a pair between its check and its removal.
//! - Targets are re-read inside the transaction; caller snapshots are not
//!   trusted.
//! - A rejected or failed batch leaves the store untouched.

use crate::config::StoreConfig;
use crate::db::{ensure_schema_ready, DbResult};
use crate::model::allocation::{AllocationId, TimeAllocation};
use crate::model::proposal::ProposalId;
use crate::repo::allocation_repo::{AllocationRepository, SqliteAllocationRepository};
use crate::repo::proposal_repo::{ProposalRepository, SqliteProposalRepository};
use crate::repo::request_graph::{Deadline, SqliteRequestGraph};
use crate::repo::{MissingEntity, RepoError};
use crate::service::batch::{AllocationEdit, BatchDecision, EditAction};
use crate::service::usage_guard::{
    Denial, GuardError, GuardResult, InvalidEditReason, UsageGuard,
};
use log::{error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Instant;

/// Caller input for one allocation row.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRow {
    /// Existing allocation to edit or delete; `None` creates a new one.
    pub allocation_id: Option<AllocationId>,
    pub action: EditAction,
}

/// Counts of writes performed by a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: Vec<AllocationId>,
    pub updated: usize,
    pub deleted: usize,
}

#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Committed(ApplySummary),
    /// Nothing was written. `index` is the offending row, when there is one.
    Rejected {
        index: Option<usize>,
        denial: Denial,
    },
}

/// Applies allocation edit batches for proposal administrators.
pub struct AllocationAdmin<'conn> {
    conn: &'conn Connection,
    config: StoreConfig,
}

impl<'conn> AllocationAdmin<'conn> {
    /// Binds to `conn` after verifying it carries the migrated schema.
    pub fn try_new(conn: &'conn Connection) -> DbResult<Self> {
        Self::try_with_config(conn, StoreConfig::default())
    }

    pub fn try_with_config(conn: &'conn Connection, config: StoreConfig) -> DbResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn, config })
    }

    /// Validates `rows` and, when every row is allowed, writes them all.
    ///
    /// Deletes are written first, then updates, then creates, so a pair freed
    /// by one row can be taken by another row of the same batch.
    pub fn apply_batch(
        &self,
        proposal_id: &ProposalId,
        rows: &[EditRow],
    ) -> GuardResult<ApplyOutcome> {
        let started_at = Instant::now();
        match self.apply_in_transaction(proposal_id, rows) {
            Ok(outcome) => {
                match &outcome {
                    ApplyOutcome::Committed(summary) => info!(
                        "event=allocation_apply module=admin status=ok proposal_id={proposal_id} created={} updated={} deleted={} duration_ms={}",
                        summary.created.len(),
                        summary.updated,
                        summary.deleted,
                        started_at.elapsed().as_millis()
                    ),
                    ApplyOutcome::Rejected { denial, .. } => info!(
                        "event=allocation_apply module=admin status=deny proposal_id={proposal_id} kind={} duration_ms={}",
                        denial.kind(),
                        started_at.elapsed().as_millis()
                    ),
                }
                Ok(outcome)
            }
            Err(err) => {
                error!(
                    "event=allocation_apply module=admin status=error proposal_id={proposal_id} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn apply_in_transaction(
        &self,
        proposal_id: &ProposalId,
        rows: &[EditRow],
    ) -> GuardResult<ApplyOutcome> {
        let deadline = Deadline::from_timeout(self.config.usage_check_timeout);
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        if !SqliteProposalRepository::new(&tx).proposal_exists(proposal_id)? {
            return Ok(ApplyOutcome::Rejected {
                index: None,
                denial: Denial::NotFound {
                    proposal_id: proposal_id.clone(),
                    missing: MissingEntity::Proposal(proposal_id.clone()),
                },
            });
        }

        let (edits, missing) = load_edits(&tx, rows)?;
        let guard = UsageGuard::new(SqliteRequestGraph::new(&tx).with_deadline(deadline));
        if let BatchDecision::Deny { index, denial } = guard.validate_batch(proposal_id, &edits)? {
            return Ok(ApplyOutcome::Rejected {
                index: Some(index),
                denial,
            });
        }
        if let Some((index, allocation_id)) = missing {
            return Ok(ApplyOutcome::Rejected {
                index: Some(index),
                denial: Denial::NotFound {
                    proposal_id: proposal_id.clone(),
                    missing: MissingEntity::Allocation(allocation_id),
                },
            });
        }

        match write_edits(&tx, proposal_id, &edits)? {
            Ok(summary) => {
                tx.commit()?;
                Ok(ApplyOutcome::Committed(summary))
            }
            Err((index, denial)) => Ok(ApplyOutcome::Rejected {
                index: Some(index),
                denial,
            }),
        }
    }
}

/// Re-reads targets in row order, stopping at the first unknown id.
///
/// Rows before the unknown one are returned so they are still validated
/// ahead of it.
fn load_edits(
    conn: &Connection,
    rows: &[EditRow],
) -> GuardResult<(Vec<AllocationEdit>, Option<(usize, AllocationId)>)> {
    let repo = SqliteAllocationRepository::new(conn);
    let mut edits = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let target = match row.allocation_id {
            Some(id) => match repo.get_allocation(id)? {
                Some(allocation) => Some(allocation),
                None => return Ok((edits, Some((index, id)))),
            },
            None => None,
        };
        edits.push(AllocationEdit {
            target,
            action: row.action.clone(),
        });
    }

    Ok((edits, None))
}

type WriteResult = Result<ApplySummary, (usize, Denial)>;

fn write_edits(
    conn: &Connection,
    proposal_id: &ProposalId,
    edits: &[AllocationEdit],
) -> GuardResult<WriteResult> {
    let repo = SqliteAllocationRepository::new(conn);
    let mut summary = ApplySummary::default();

    for edit in edits {
        if let (EditAction::Delete, Some(target)) = (&edit.action, &edit.target) {
            repo.delete_allocation(target.id)?;
            summary.deleted += 1;
        }
    }

    for (index, edit) in edits.iter().enumerate() {
        let (EditAction::Save { key, totals }, Some(target)) = (&edit.action, &edit.target) else {
            continue;
        };
        let result = repo
            .update_allocation(&TimeAllocation {
                id: target.id,
                proposal_id: proposal_id.clone(),
                key: key.clone(),
                totals: *totals,
            })
            .map(|()| summary.updated += 1);
        if let Some(denial) = duplicate_denial(result, proposal_id)? {
            return Ok(Err((index, denial)));
        }
    }

    for (index, edit) in edits.iter().enumerate() {
        let (EditAction::Save { key, totals }, None) = (&edit.action, &edit.target) else {
            continue;
        };
        let allocation = TimeAllocation::new(proposal_id.clone(), key.clone(), *totals);
        let result = repo
            .create_allocation(&allocation)
            .map(|id| summary.created.push(id));
        if let Some(denial) = duplicate_denial(result, proposal_id)? {
            return Ok(Err((index, denial)));
        }
    }

    Ok(Ok(summary))
}

/// Turns a pair collision into a denial; other write failures propagate.
fn duplicate_denial(
    result: Result<(), RepoError>,
    proposal_id: &ProposalId,
) -> Result<Option<Denial>, GuardError> {
    match result {
        Ok(()) => Ok(None),
        Err(RepoError::DuplicateKey { key, .. }) => Ok(Some(Denial::invalid_edit(
            proposal_id,
            Some(&key),
            InvalidEditReason::DuplicateKey,
        ))),
        Err(err) => Err(err.into()),
    }
}
