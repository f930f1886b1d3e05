//! Fail-fast validation of allocation edit batches.
//!
//! # Responsibility
//! - Validate the edits submitted together for one proposal as one decision.
//!
//! # Invariants
//! - Edits are evaluated in order; evaluation stops at the first denial.
//! - Malformed entries deny with `InvalidEdit`; nothing is skipped.
//! - Each existing allocation is targeted by at most one edit.

use crate::model::allocation::{AllocationKey, AllocationTotals, TimeAllocation};
use crate::model::proposal::ProposalId;
use crate::repo::request_graph::RequestGraph;
use crate::service::usage_guard::{
    Decision, Denial, GuardResult, InvalidEditReason, UsageGuard,
};
use log::info;
use std::collections::HashSet;
use std::time::Instant;

/// Requested change for one allocation row.
#[derive(Debug, Clone, PartialEq)]
pub enum EditAction {
    /// Store this pair and these totals (create when there is no target).
    Save {
        key: AllocationKey,
        totals: AllocationTotals,
    },
    Delete,
}

/// One row of an allocation batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationEdit {
    /// Persisted state of the edited allocation; `None` for a new row.
    pub target: Option<TimeAllocation>,
    pub action: EditAction,
}

impl AllocationEdit {
    pub fn create(key: AllocationKey, totals: AllocationTotals) -> Self {
        Self {
            target: None,
            action: EditAction::Save { key, totals },
        }
    }

    pub fn update(target: TimeAllocation, key: AllocationKey, totals: AllocationTotals) -> Self {
        Self {
            target: Some(target),
            action: EditAction::Save { key, totals },
        }
    }

    pub fn delete(target: TimeAllocation) -> Self {
        Self {
            target: Some(target),
            action: EditAction::Delete,
        }
    }
}

/// Outcome of a batch validation.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchDecision {
    /// Every edit was checked and allowed.
    Allow { checked: usize },
    /// Edit at zero-based `index` was denied; later edits were not evaluated.
    Deny { index: usize, denial: Denial },
}

impl BatchDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

impl<G: RequestGraph> UsageGuard<G> {
    /// Validates `edits` for `proposal_id` in order, stopping at the first
    /// denial.
    pub fn validate_batch(
        &self,
        proposal_id: &ProposalId,
        edits: &[AllocationEdit],
    ) -> GuardResult<BatchDecision> {
        let started_at = Instant::now();

        let mut seen_targets = HashSet::with_capacity(edits.len());

        for (index, edit) in edits.iter().enumerate() {
            let decision = match &edit.target {
                Some(target) if !seen_targets.insert(target.id) => {
                    Decision::Deny(Denial::invalid_edit(
                        proposal_id,
                        Some(&target.key),
                        InvalidEditReason::DuplicateTarget {
                            allocation_id: target.id,
                        },
                    ))
                }
                _ => self.validate_edit(proposal_id, edit)?,
            };
            if let Decision::Deny(denial) = decision {
                info!(
                    "event=batch_validate module=guard status=deny proposal_id={proposal_id} index={index} size={} kind={} duration_ms={}",
                    edits.len(),
                    denial.kind(),
                    started_at.elapsed().as_millis()
                );
                return Ok(BatchDecision::Deny { index, denial });
            }
        }

        info!(
            "event=batch_validate module=guard status=ok proposal_id={proposal_id} size={} duration_ms={}",
            edits.len(),
            started_at.elapsed().as_millis()
        );
        Ok(BatchDecision::Allow {
            checked: edits.len(),
        })
    }

    fn validate_edit(
        &self,
        proposal_id: &ProposalId,
        edit: &AllocationEdit,
    ) -> GuardResult<Decision> {
        if let Some(target) = &edit.target {
            if target.proposal_id != *proposal_id {
                return Ok(Decision::Deny(Denial::invalid_edit(
                    proposal_id,
                    Some(&target.key),
                    InvalidEditReason::ForeignProposal {
                        owner: target.proposal_id.clone(),
                    },
                )));
            }
        }

        match (&edit.action, edit.target.as_ref()) {
            (EditAction::Delete, None) => Ok(Decision::Deny(Denial::invalid_edit(
                proposal_id,
                None,
                InvalidEditReason::MissingTarget,
            ))),
            (EditAction::Delete, Some(target)) => self.validate_deletion(target),
            (EditAction::Save { key, totals }, target) => {
                if let Err(err) = key.validate() {
                    return Ok(Decision::Deny(Denial::invalid_edit(
                        proposal_id,
                        target.map(|target| &target.key),
                        err,
                    )));
                }
                if let Err(err) = totals.validate() {
                    return Ok(Decision::Deny(Denial::invalid_edit(
                        proposal_id,
                        Some(key),
                        err,
                    )));
                }
                self.validate_mutation(target, key)
            }
        }
    }
}
