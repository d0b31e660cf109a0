//! Proposal response aggregation
//!
//! [`classify`] partitions the responses of one lifecycle stage into
//! successful and failed sets. It never fails: every response lands in
//! exactly one partition, and input order is kept within each.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Endorsement status reported by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Success,
    Failure,
    /// No recognizable status in the response
    Undefined,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalStatus::Success => "SUCCESS",
            ProposalStatus::Failure => "FAILURE",
            ProposalStatus::Undefined => "UNDEFINED",
        };
        f.write_str(s)
    }
}

/// One peer's answer to a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    peer: String,
    transaction_id: String,
    status: ProposalStatus,
    verified: bool,
    message: String,
}

impl ProposalResponse {
    pub fn new(
        peer: impl Into<String>,
        transaction_id: impl Into<String>,
        status: ProposalStatus,
        verified: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            peer: peer.into(),
            transaction_id: transaction_id.into(),
            status,
            verified,
            message: message.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn status(&self) -> ProposalStatus {
        self.status
    }

    /// Whether the endorsement signature checked out
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Success criterion applied by [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Install: status SUCCESS is enough
    StatusOnly,
    /// Instantiate: status SUCCESS and a verified signature
    StatusAndSignature,
}

impl Verification {
    pub fn accepts(&self, response: &ProposalResponse) -> bool {
        let status_ok = response.status() == ProposalStatus::Success;
        match self {
            Verification::StatusOnly => status_ok,
            Verification::StatusAndSignature => status_ok && response.is_verified(),
        }
    }
}

/// Responses split by [`Verification`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classified {
    pub successful: Vec<ProposalResponse>,
    pub failed: Vec<ProposalResponse>,
    pub total: usize,
}

impl Classified {
    pub fn all_successful(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn classify(responses: Vec<ProposalResponse>, verification: Verification) -> Classified {
    let total = responses.len();
    let (successful, failed) = responses
        .into_iter()
        .partition(|response| verification.accepts(response));

    Classified {
        successful,
        failed,
        total,
    }
}
