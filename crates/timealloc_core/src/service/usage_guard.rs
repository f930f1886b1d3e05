//! Usage-integrity checks for single allocation edits.
//!
//! # Responsibility
//! - Decide ALLOW/DENY for an allocation pair change or deletion.
//! - Keep domain denials (returned as `Decision::Deny`) apart from
//!   infrastructure failures (returned as `Err(GuardError)`).
//!
//! # Invariants
//! - The pair checked for usage is always the allocation's current pair.
//! - A failed or timed-out traversal is never turned into `Allow`.
//! - Nothing is written; callers apply the decision.

use crate::model::allocation::{
    AllocationId, AllocationKey, KeyValidationError, TimeAllocation, TotalsValidationError,
};
use crate::model::proposal::ProposalId;
use crate::model::request::RequestId;
use crate::repo::request_graph::{GraphError, RequestGraph};
use crate::repo::{MissingEntity, RepoError};
use log::{debug, error, info};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

pub type GuardResult<T> = Result<T, GuardError>;

/// Infrastructure failure while deciding; never a domain answer.
#[derive(Debug)]
pub enum GuardError {
    /// The request graph could not be read.
    Graph(GraphError),
    /// Store access outside the traversal failed.
    Repo(RepoError),
    /// The usage check did not finish inside its deadline.
    DeadlineExceeded { limit: Duration, elapsed: Duration },
}

impl Display for GuardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::DeadlineExceeded { limit, elapsed } => write!(
                f,
                "usage check exceeded its {} ms limit after {} ms",
                limit.as_millis(),
                elapsed.as_millis()
            ),
        }
    }
}

impl Error for GuardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Graph(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::DeadlineExceeded { .. } => None,
        }
    }
}

impl From<GraphError> for GuardError {
    fn from(value: GraphError) -> Self {
        match value {
            GraphError::DeadlineExceeded { limit, elapsed } => {
                Self::DeadlineExceeded { limit, elapsed }
            }
            other => Self::Graph(other),
        }
    }
}

impl From<RepoError> for GuardError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for GuardError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// Coarse classification of a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    AllocationInUse,
    InvalidEdit,
    NotFound,
}

impl Display for DenialKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllocationInUse => write!(f, "AllocationInUse"),
            Self::InvalidEdit => write!(f, "InvalidEdit"),
            Self::NotFound => write!(f, "NotFound"),
        }
    }
}

/// Why a batch entry is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidEditReason {
    /// Delete requested without naming an existing allocation.
    MissingTarget,
    InvalidKey { detail: String },
    InvalidTotals { field: &'static str },
    /// The target allocation belongs to another proposal.
    ForeignProposal { owner: ProposalId },
    /// Another allocation of the proposal already holds the proposed pair.
    DuplicateKey,
    /// An earlier row of the same batch already edits this allocation.
    DuplicateTarget { allocation_id: AllocationId },
}

impl From<KeyValidationError> for InvalidEditReason {
    fn from(value: KeyValidationError) -> Self {
        Self::InvalidKey {
            detail: value.to_string(),
        }
    }
}

impl From<TotalsValidationError> for InvalidEditReason {
    fn from(value: TotalsValidationError) -> Self {
        Self::InvalidTotals { field: value.field }
    }
}

impl Display for InvalidEditReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTarget => write!(f, "delete requested without an allocation"),
            Self::InvalidKey { detail } => write!(f, "{detail}"),
            Self::InvalidTotals { field } => {
                write!(f, "allocation total `{field}` must be a finite, non-negative number")
            }
            Self::ForeignProposal { owner } => {
                write!(f, "allocation belongs to proposal {owner}")
            }
            Self::DuplicateKey => write!(f, "pair is already allocated on this proposal"),
            Self::DuplicateTarget { allocation_id } => {
                write!(f, "allocation {allocation_id} is edited more than once in one batch")
            }
        }
    }
}

/// Structured DENY reason, suitable for display or logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    /// An accounted request still references the allocation's current pair.
    AllocationInUse {
        proposal_id: ProposalId,
        key: AllocationKey,
        /// First referencing request found.
        request_id: RequestId,
    },
    InvalidEdit {
        proposal_id: ProposalId,
        key: Option<AllocationKey>,
        reason: InvalidEditReason,
    },
    NotFound {
        proposal_id: ProposalId,
        missing: MissingEntity,
    },
}

impl Denial {
    pub fn kind(&self) -> DenialKind {
        match self {
            Self::AllocationInUse { .. } => DenialKind::AllocationInUse,
            Self::InvalidEdit { .. } => DenialKind::InvalidEdit,
            Self::NotFound { .. } => DenialKind::NotFound,
        }
    }

    pub fn proposal_id(&self) -> &ProposalId {
        match self {
            Self::AllocationInUse { proposal_id, .. }
            | Self::InvalidEdit { proposal_id, .. }
            | Self::NotFound { proposal_id, .. } => proposal_id,
        }
    }

    /// Allocation pair the denial is about, when one is known.
    pub fn key(&self) -> Option<&AllocationKey> {
        match self {
            Self::AllocationInUse { key, .. } => Some(key),
            Self::InvalidEdit { key, .. } => key.as_ref(),
            Self::NotFound { .. } => None,
        }
    }

    pub(crate) fn invalid_edit(
        proposal_id: &ProposalId,
        key: Option<&AllocationKey>,
        reason: impl Into<InvalidEditReason>,
    ) -> Self {
        Self::InvalidEdit {
            proposal_id: proposal_id.clone(),
            key: key.cloned(),
            reason: reason.into(),
        }
    }
}

impl Display for Denial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllocationInUse {
                proposal_id,
                key,
                request_id,
            } => write!(
                f,
                "AllocationInUse: proposal {proposal_id} instrument type {} semester {} is referenced by request {request_id}",
                key.instrument_type, key.semester
            ),
            Self::InvalidEdit {
                proposal_id,
                key: Some(key),
                reason,
            } => write!(
                f,
                "InvalidEdit: proposal {proposal_id} instrument type {} semester {}: {reason}",
                key.instrument_type, key.semester
            ),
            Self::InvalidEdit {
                proposal_id,
                key: None,
                reason,
            } => write!(f, "InvalidEdit: proposal {proposal_id}: {reason}"),
            Self::NotFound {
                proposal_id,
                missing,
            } => write!(f, "NotFound: proposal {proposal_id}: {missing} does not exist"),
        }
    }
}

/// Outcome of one validation.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Allow => None,
            Self::Deny(denial) => Some(denial),
        }
    }
}

/// Validator gating allocation pair changes and deletions on request usage.
pub struct UsageGuard<G: RequestGraph> {
    graph: G,
}

impl<G: RequestGraph> UsageGuard<G> {
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    /// Decides whether `allocation` may take `proposed` as its pair.
    ///
    /// `None` stands for an allocation that has not been persisted yet; it
    /// has no prior pair and is always allowed. Accounting-only edits
    /// (unchanged pair) are always allowed. A malformed `proposed` pair on an
    /// existing allocation is denied with `InvalidEdit`.
    pub fn validate_mutation(
        &self,
        allocation: Option<&TimeAllocation>,
        proposed: &AllocationKey,
    ) -> GuardResult<Decision> {
        let Some(allocation) = allocation else {
            debug!(
                "event=usage_check module=guard status=ok op=create instrument_type={} semester={}",
                proposed.instrument_type, proposed.semester
            );
            return Ok(Decision::Allow);
        };

        if let Err(err) = proposed.validate() {
            info!(
                "event=usage_check module=guard status=deny op=mutate proposal_id={} reason=invalid_key",
                allocation.proposal_id
            );
            return Ok(Decision::Deny(Denial::invalid_edit(
                &allocation.proposal_id,
                Some(&allocation.key),
                err,
            )));
        }

        if allocation.key == *proposed {
            return Ok(Decision::Allow);
        }

        self.check_unused(allocation, "mutate")
    }

    /// Decides whether `allocation` may be deleted.
    pub fn validate_deletion(&self, allocation: &TimeAllocation) -> GuardResult<Decision> {
        self.check_unused(allocation, "delete")
    }

    fn check_unused(&self, allocation: &TimeAllocation, op: &'static str) -> GuardResult<Decision> {
        let started_at = Instant::now();
        let proposal_id = &allocation.proposal_id;
        let key = &allocation.key;

        match self.graph.first_usage(proposal_id, key) {
            Ok(None) => {
                debug!(
                    "event=usage_check module=guard status=ok op={op} proposal_id={proposal_id} instrument_type={} semester={} duration_ms={}",
                    key.instrument_type,
                    key.semester,
                    started_at.elapsed().as_millis()
                );
                Ok(Decision::Allow)
            }
            Ok(Some(request_id)) => {
                info!(
                    "event=usage_check module=guard status=deny op={op} proposal_id={proposal_id} instrument_type={} semester={} duration_ms={} reason=allocation_in_use",
                    key.instrument_type,
                    key.semester,
                    started_at.elapsed().as_millis()
                );
                Ok(Decision::Deny(Denial::AllocationInUse {
                    proposal_id: proposal_id.clone(),
                    key: key.clone(),
                    request_id,
                }))
            }
            Err(GraphError::ProposalNotFound(missing)) => {
                info!(
                    "event=usage_check module=guard status=deny op={op} proposal_id={proposal_id} reason=not_found"
                );
                Ok(Decision::Deny(Denial::NotFound {
                    proposal_id: proposal_id.clone(),
                    missing: MissingEntity::Proposal(missing),
                }))
            }
            Err(err) => {
                error!(
                    "event=usage_check module=guard status=error op={op} proposal_id={proposal_id} instrument_type={} semester={} duration_ms={} error={}",
                    key.instrument_type,
                    key.semester,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Denial, DenialKind, InvalidEditReason};
    use crate::model::allocation::AllocationKey;
    use crate::model::proposal::ProposalId;
    use crate::repo::MissingEntity;
    use uuid::Uuid;

    #[test]
    fn denial_text_names_proposal_and_pair() {
        let denial = Denial::AllocationInUse {
            proposal_id: ProposalId::new("LCO2024A-001"),
            key: AllocationKey::new("FLOYDS", "2024A"),
            request_id: Uuid::nil(),
        };
        let text = denial.to_string();
        assert!(text.starts_with("AllocationInUse"));
        assert!(text.contains("LCO2024A-001"));
        assert!(text.contains("FLOYDS"));
        assert!(text.contains("2024A"));
        assert_eq!(denial.kind(), DenialKind::AllocationInUse);
    }

    #[test]
    fn denial_accessors_follow_the_variant() {
        let not_found = Denial::NotFound {
            proposal_id: ProposalId::new("P1"),
            missing: MissingEntity::Proposal(ProposalId::new("P1")),
        };
        assert_eq!(not_found.kind(), DenialKind::NotFound);
        assert_eq!(not_found.key(), None);

        let invalid = Denial::invalid_edit(
            &ProposalId::new("P1"),
            None,
            InvalidEditReason::MissingTarget,
        );
        assert_eq!(invalid.kind(), DenialKind::InvalidEdit);
        assert_eq!(invalid.proposal_id().as_str(), "P1");
    }
}
