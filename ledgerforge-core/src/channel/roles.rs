//! Peer capability roles on a channel

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Simulates and signs proposals
    EndorsingPeer,
    LedgerQuery,
    ChaincodeQuery,
    /// Delivers block and chaincode events
    EventSource,
}

impl PeerRole {
    pub const ALL: [PeerRole; 4] = [
        PeerRole::EndorsingPeer,
        PeerRole::LedgerQuery,
        PeerRole::ChaincodeQuery,
        PeerRole::EventSource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::EndorsingPeer => "endorsing_peer",
            PeerRole::LedgerQuery => "ledger_query",
            PeerRole::ChaincodeQuery => "chaincode_query",
            PeerRole::EventSource => "event_source",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of roles assigned to one peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRoles(BTreeSet<PeerRole>);

impl PeerRoles {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every role; what peers are joined with
    pub fn all() -> Self {
        PeerRole::ALL.into_iter().collect()
    }

    pub fn with(mut self, role: PeerRole) -> Self {
        self.0.insert(role);
        self
    }

    pub fn contains(&self, role: PeerRole) -> bool {
        self.0.contains(&role)
    }

    pub fn iter(&self) -> impl Iterator<Item = PeerRole> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PeerRole> for PeerRoles {
    fn from_iter<I: IntoIterator<Item = PeerRole>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_roles() {
        let roles = PeerRoles::all();
        assert_eq!(roles.len(), 4);
        for role in PeerRole::ALL {
            assert!(roles.contains(role));
        }
    }

    #[test]
    fn test_builder() {
        let roles = PeerRoles::empty()
            .with(PeerRole::EventSource)
            .with(PeerRole::EndorsingPeer)
            .with(PeerRole::EventSource);

        assert_eq!(
            roles.iter().collect::<Vec<_>>(),
            vec![PeerRole::EndorsingPeer, PeerRole::EventSource]
        );
        assert!(!roles.contains(PeerRole::LedgerQuery));
    }

    #[test]
    fn test_serializes_as_names() {
        let json = serde_json::to_string(&PeerRoles::empty().with(PeerRole::LedgerQuery)).unwrap();
        assert_eq!(json, r#"["ledger_query"]"#);
    }
}
