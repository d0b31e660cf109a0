//! Chaincode lifecycle: install, instantiate, event listeners
//!
//! Per channel, a chaincode moves `NotInstalled → Installed → Instantiated`.
//! Instantiation is refused until install has reached the configured number
//! of peers.

mod events;
mod lifecycle;
mod policy;

pub use events::{
    BlockEvent, ChaincodeEvent, ChaincodeEventRegistry, EventCapture, EventError, ListenerHandle,
};
pub use lifecycle::ChaincodeLifecycleManager;
pub use policy::{EndorsementPolicy, MspRole, PolicyError, PolicyIdentity, PolicyRule};

use crate::channel::ChannelState;
use crate::config::NetworkConfig;
use crate::proposal::{Classified, ProposalStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for chaincode operations
pub type ChaincodeResult<T> = Result<T, ChaincodeError>;

/// Chaincode errors
#[derive(Debug, Error)]
pub enum ChaincodeError {
    #[error("{stage} failed: {successful} successful, {} failed", .failed.len())]
    ChaincodeLifecycle {
        stage: LifecycleStage,
        successful: usize,
        failed: Vec<PeerFailure>,
    },

    #[error("Chaincode {chaincode} is not installed on channel {channel}")]
    NotInstalled { channel: String, chaincode: String },

    #[error("Cannot {stage} chaincode on channel {channel} in state {state}")]
    InvalidState {
        channel: String,
        stage: LifecycleStage,
        state: LifecycleState,
    },

    #[error("Channel {channel} is {state}, not ready")]
    ChannelNotReady { channel: String, state: ChannelState },

    #[error("Endorsement policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Event listener error: {0}")]
    Events(#[from] EventError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChaincodeLanguage {
    #[serde(alias = "golang")]
    Go,
    Java,
    Node,
}

impl Default for ChaincodeLanguage {
    fn default() -> Self {
        ChaincodeLanguage::Go
    }
}

/// Name, version and package path of a chaincode
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChaincodeId {
    pub name: String,
    pub version: String,
    pub path: Option<String>,
}

impl ChaincodeId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for ChaincodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallRequest {
    pub chaincode: ChaincodeId,
    pub language: ChaincodeLanguage,
    pub source_location: PathBuf,
    pub meta_inf_location: Option<PathBuf>,
    pub proposal_wait: Duration,
}

impl InstallRequest {
    pub fn from_config(config: &NetworkConfig) -> Self {
        let chaincode = &config.chaincode;
        Self {
            chaincode: chaincode_id(config),
            language: chaincode.language,
            source_location: config.paths.resource(&chaincode.source),
            meta_inf_location: chaincode.meta_inf.as_ref().map(|p| config.paths.resource(p)),
            proposal_wait: config.timeouts.proposal_wait,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstantiateRequest {
    pub chaincode: ChaincodeId,
    pub language: ChaincodeLanguage,
    pub function: String,
    pub args: Vec<String>,
    /// Side-channel metadata, never written to the ledger
    pub transient: BTreeMap<String, Vec<u8>>,
    pub policy: EndorsementPolicy,
    pub proposal_wait: Duration,
}

impl InstantiateRequest {
    /// Build from configuration, loading the endorsement policy document
    pub fn from_config(config: &NetworkConfig) -> ChaincodeResult<Self> {
        let chaincode = &config.chaincode;
        let policy =
            EndorsementPolicy::from_yaml_file(config.paths.resource(&chaincode.policy_file))?;

        Ok(Self {
            chaincode: chaincode_id(config),
            language: chaincode.language,
            function: chaincode.init_function.clone(),
            args: chaincode.resolved_init_args(),
            transient: chaincode
                .transient
                .iter()
                .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
                .collect(),
            policy,
            proposal_wait: config.timeouts.proposal_wait,
        })
    }
}

fn chaincode_id(config: &NetworkConfig) -> ChaincodeId {
    let chaincode = &config.chaincode;
    ChaincodeId::new(&chaincode.name, &chaincode.version).with_path(&chaincode.path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotInstalled,
    Installed,
    Instantiated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::NotInstalled => "not installed",
            LifecycleState::Installed => "installed",
            LifecycleState::Instantiated => "instantiated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Install,
    Instantiate,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::Install => "install",
            LifecycleStage::Instantiate => "instantiate",
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one peer did not count toward a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerFailure {
    pub peer: String,
    /// `None` when no response arrived
    pub status: Option<ProposalStatus>,
    pub verified: bool,
    pub reason: String,
}

impl PeerFailure {
    pub fn no_response(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            status: None,
            verified: false,
            reason: reason.into(),
        }
    }
}

/// Per-peer result of one lifecycle stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub stage: LifecycleStage,
    pub successful: Vec<String>,
    pub failed: Vec<PeerFailure>,
    pub total: usize,
}

impl StageOutcome {
    /// Outcome from classified responses plus peers that never answered
    pub fn from_classified(
        stage: LifecycleStage,
        classified: Classified,
        unanswered: Vec<PeerFailure>,
    ) -> Self {
        let successful = classified
            .successful
            .iter()
            .map(|r| r.peer().to_string())
            .collect();
        let mut failed: Vec<PeerFailure> = classified
            .failed
            .iter()
            .map(|r| PeerFailure {
                peer: r.peer().to_string(),
                status: Some(r.status()),
                verified: r.is_verified(),
                reason: if r.message().is_empty() {
                    format!("status {}, verified {}", r.status(), r.is_verified())
                } else {
                    r.message().to_string()
                },
            })
            .collect();
        let total = classified.total + unanswered.len();
        failed.extend(unanswered);

        Self {
            stage,
            successful,
            failed,
            total,
        }
    }

    /// Succeeds when at least `minimum` peers succeeded
    pub fn ensure_quorum(&self, minimum: usize) -> ChaincodeResult<()> {
        if self.successful.len() >= minimum {
            Ok(())
        } else {
            Err(self.to_error())
        }
    }

    /// Succeeds when every peer succeeded and there was at least one
    pub fn ensure_complete(&self) -> ChaincodeResult<()> {
        if self.failed.is_empty() && !self.successful.is_empty() {
            Ok(())
        } else {
            Err(self.to_error())
        }
    }

    fn to_error(&self) -> ChaincodeError {
        ChaincodeError::ChaincodeLifecycle {
            stage: self.stage,
            successful: self.successful.len(),
            failed: self.failed.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{classify, ProposalResponse, Verification};

    fn outcome(statuses: &[(ProposalStatus, bool)]) -> StageOutcome {
        let responses = statuses
            .iter()
            .enumerate()
            .map(|(i, (status, verified))| {
                ProposalResponse::new(format!("peer{}", i), "tx", *status, *verified, "")
            })
            .collect();
        StageOutcome::from_classified(
            LifecycleStage::Instantiate,
            classify(responses, Verification::StatusAndSignature),
            Vec::new(),
        )
    }

    #[test]
    fn test_ensure_complete() {
        assert!(outcome(&[(ProposalStatus::Success, true), (ProposalStatus::Success, true)])
            .ensure_complete()
            .is_ok());

        let err = outcome(&[(ProposalStatus::Success, true), (ProposalStatus::Success, false)])
            .ensure_complete()
            .unwrap_err();
        match err {
            ChaincodeError::ChaincodeLifecycle {
                stage,
                successful,
                failed,
            } => {
                assert_eq!(stage, LifecycleStage::Instantiate);
                assert_eq!(successful, 1);
                assert_eq!(failed[0].peer, "peer1");
                assert!(!failed[0].verified);
            }
            other => panic!("unexpected error: {}", other),
        }

        assert!(outcome(&[]).ensure_complete().is_err());
    }

    #[test]
    fn test_ensure_quorum_counts_unanswered() {
        let classified = classify(
            vec![ProposalResponse::new("peer0", "tx", ProposalStatus::Success, false, "")],
            Verification::StatusOnly,
        );
        let outcome = StageOutcome::from_classified(
            LifecycleStage::Install,
            classified,
            vec![PeerFailure::no_response("peer1", "timed out")],
        );

        assert_eq!(outcome.total, 2);
        assert!(outcome.ensure_quorum(1).is_ok());
        assert!(outcome.ensure_quorum(2).is_err());
    }

    #[test]
    fn test_requests_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NetworkConfig::default();
        config.paths.resources = dir.path().to_path_buf();
        config.chaincode.args_delta = 3;

        let install = InstallRequest::from_config(&config);
        assert_eq!(install.chaincode.to_string(), "example_cc_go:1");
        assert_eq!(install.chaincode.path.as_deref(), Some("github.com/example_cc"));
        assert!(install.source_location.ends_with("chaincode/sample1"));

        assert!(matches!(
            InstantiateRequest::from_config(&config),
            Err(ChaincodeError::Policy(PolicyError::FileReadError(_)))
        ));

        crate::test_utils::write_policy(dir.path(), "chaincodeendorsementpolicy.yaml");
        let instantiate = InstantiateRequest::from_config(&config).unwrap();
        assert_eq!(instantiate.function, "init");
        assert_eq!(instantiate.args, vec!["a", "500", "b", "203"]);
        assert_eq!(instantiate.transient.len(), 2);
        assert_eq!(instantiate.policy.identities().len(), 2);
    }

    #[test]
    fn test_language_aliases() {
        let language: ChaincodeLanguage = serde_json::from_str("\"golang\"").unwrap();
        assert_eq!(language, ChaincodeLanguage::Go);
        assert_eq!(serde_json::to_string(&ChaincodeLanguage::Java).unwrap(), "\"java\"");
    }
}
