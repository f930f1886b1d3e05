//! Request group and request domain model.
//!
//! # Invariants
//! - `Request::key` is fixed when the request is created and never rewritten.
//! - `ObservationType::Direct` groups bypass time accounting entirely.

use crate::model::allocation::AllocationKey;
use crate::model::proposal::ProposalId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RequestGroupId = Uuid;
pub type RequestId = Uuid;

/// How a request group is scheduled and accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationType {
    /// Scheduled normally and debited against a time allocation.
    Normal,
    /// Directly submitted observations; never debited.
    Direct,
}

impl ObservationType {
    pub fn is_accounted(self) -> bool {
        !matches!(self, Self::Direct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGroup {
    pub id: RequestGroupId,
    pub proposal_id: ProposalId,
    pub name: String,
    pub observation_type: ObservationType,
}

/// One observing request inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub request_group_id: RequestGroupId,
    /// Snapshot of the allocation pair this request was created against.
    pub key: AllocationKey,
}

/// Time window in which a request may be observed, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Instrument configuration attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub instrument_name: String,
}

/// Input for creating a request with its windows and configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub key: AllocationKey,
    pub windows: Vec<ObservationWindow>,
    pub configurations: Vec<Configuration>,
}

impl NewRequest {
    pub fn new(key: AllocationKey) -> Self {
        Self {
            key,
            windows: Vec::new(),
            configurations: Vec::new(),
        }
    }
}
