//! Time allocation domain model.
//!
//! # Responsibility
//! - Represent the allocation pair (`instrument_type`, `semester`).
//! - Represent the accounting totals carried by an allocation.
//!
//! # Invariants
//! - Pair equality is exact on both fields. No case folding, no trimming.
//! - Totals are never consulted when deciding whether a pair is in use.

use crate::model::proposal::ProposalId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one persisted time allocation row.
pub type AllocationId = Uuid;

/// Identity pair binding a time allocation to the requests that consume it.
///
/// Both fields are opaque tokens. The semester is compared by its stable
/// identifier (for example `2024A`), not by the date range it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationKey {
    pub instrument_type: String,
    pub semester: String,
}

/// Validation errors for a proposed allocation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValidationError {
    MissingInstrumentType,
    MissingSemester,
}

impl Display for KeyValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingInstrumentType => write!(f, "allocation pair requires an instrument type"),
            Self::MissingSemester => write!(f, "allocation pair requires a semester"),
        }
    }
}

impl Error for KeyValidationError {}

impl AllocationKey {
    pub fn new(instrument_type: impl Into<String>, semester: impl Into<String>) -> Self {
        Self {
            instrument_type: instrument_type.into(),
            semester: semester.into(),
        }
    }

    /// Checks that both fields are present.
    ///
    /// Whitespace-only values count as missing; other values are kept verbatim.
    pub fn validate(&self) -> Result<(), KeyValidationError> {
        if self.instrument_type.trim().is_empty() {
            return Err(KeyValidationError::MissingInstrumentType);
        }
        if self.semester.trim().is_empty() {
            return Err(KeyValidationError::MissingSemester);
        }
        Ok(())
    }
}

impl Display for AllocationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instrument_type, self.semester)
    }
}

/// Hour-based accounting totals of one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AllocationTotals {
    /// Standard-priority hours allocated.
    pub std_allocation: f64,
    pub std_time_used: f64,
    /// Rapid-response hours allocated.
    pub rr_allocation: f64,
    pub rr_time_used: f64,
    /// Time-critical hours allocated.
    pub tc_allocation: f64,
    pub tc_time_used: f64,
    /// Intra-proposal priority limit and remaining balance.
    pub ipp_limit: f64,
    pub ipp_time_available: f64,
}

/// Validation error for allocation totals, naming the offending field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalsValidationError {
    pub field: &'static str,
}

impl Display for TotalsValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "allocation total `{}` must be a finite, non-negative number",
            self.field
        )
    }
}

impl Error for TotalsValidationError {}

impl AllocationTotals {
    pub fn validate(&self) -> Result<(), TotalsValidationError> {
        for (field, value) in self.fields() {
            if !value.is_finite() || value < 0.0 {
                return Err(TotalsValidationError { field });
            }
        }
        Ok(())
    }

    fn fields(&self) -> [(&'static str, f64); 8] {
        [
            ("std_allocation", self.std_allocation),
            ("std_time_used", self.std_time_used),
            ("rr_allocation", self.rr_allocation),
            ("rr_time_used", self.rr_time_used),
            ("tc_allocation", self.tc_allocation),
            ("tc_time_used", self.tc_time_used),
            ("ipp_limit", self.ipp_limit),
            ("ipp_time_available", self.ipp_time_available),
        ]
    }
}

/// A persisted time allocation owned by exactly one proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAllocation {
    pub id: AllocationId,
    pub proposal_id: ProposalId,
    /// Current pair as stored. Requests reference this by value.
    pub key: AllocationKey,
    pub totals: AllocationTotals,
}

impl TimeAllocation {
    /// Creates an allocation with a freshly generated id.
    pub fn new(proposal_id: ProposalId, key: AllocationKey, totals: AllocationTotals) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposal_id,
            key,
            totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AllocationKey, AllocationTotals, KeyValidationError};

    #[test]
    fn key_equality_is_exact() {
        let key = AllocationKey::new("FLOYDS", "2024A");
        assert_eq!(key, AllocationKey::new("FLOYDS", "2024A"));
        assert_ne!(key, AllocationKey::new("floyds", "2024A"));
        assert_ne!(key, AllocationKey::new("FLOYDS", "2024a"));
        assert_ne!(key, AllocationKey::new("FLOYDS ", "2024A"));
    }

    #[test]
    fn key_validation_rejects_blank_fields() {
        assert_eq!(
            AllocationKey::new("  ", "2024A").validate(),
            Err(KeyValidationError::MissingInstrumentType)
        );
        assert_eq!(
            AllocationKey::new("FLOYDS", "").validate(),
            Err(KeyValidationError::MissingSemester)
        );
        assert!(AllocationKey::new("FLOYDS", "2024A").validate().is_ok());
    }

    #[test]
    fn totals_validation_names_the_field() {
        let totals = AllocationTotals {
            rr_time_used: -1.0,
            ..AllocationTotals::default()
        };
        let err = totals.validate().unwrap_err();
        assert_eq!(err.field, "rr_time_used");

        let totals = AllocationTotals {
            ipp_limit: f64::NAN,
            ..AllocationTotals::default()
        };
        assert_eq!(totals.validate().unwrap_err().field, "ipp_limit");
    }
}
