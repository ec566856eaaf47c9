//! Client identity attached to connections and envelopes

use serde::{Deserialize, Serialize};

/// Identifies a connected endpoint. Assigned at upgrade time and included in
/// outgoing envelopes to attribute senders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub id: String,
    pub name: String,
}

impl EntityIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}
