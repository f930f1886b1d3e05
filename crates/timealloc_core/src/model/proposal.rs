//! Proposal domain model.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Opaque proposal identifier, e.g. `LCO2024A-001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(String);

impl ProposalId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ProposalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProposalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Organizational unit owning time allocations and request groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub title: String,
    /// Inactive proposals keep their data but grant no instrument access.
    pub active: bool,
}

impl Proposal {
    pub fn new(id: impl Into<ProposalId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            active: true,
        }
    }
}
