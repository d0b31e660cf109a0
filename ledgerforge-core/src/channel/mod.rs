//! Channel construction
//!
//! A [`Channel`] moves through a fixed sequence of states:
//!
//! ```text
//! Uninitialized ──configure──▶ Configured ──join_peers──▶ Peered ──attach_orderers──▶ Ready
//!        │                          │                        │                          │
//!        └──────────────────────────┴──────── shutdown ──────┴──────────────────────────┴──▶ Closed
//! ```
//!
//! Steps cannot be skipped or repeated. From `Configured` onward the channel
//! always holds at least one orderer: the one that accepted its configuration.

mod builder;
mod roles;
mod transport;

pub use builder::{ChannelBuilder, ChannelConstruction, ChannelSummary};
pub use roles::{PeerRole, PeerRoles};
pub use transport::{ChannelTransport, ConfigSignature, TransportError};

use crate::chaincode::ChaincodeEventRegistry;
use crate::endpoint::{EndpointError, OrdererHandle, PeerHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Configuration of channel {channel} rejected: {reason}")]
    ChannelConfigurationRejected { channel: String, reason: String },

    #[error("Initialization of channel {channel} failed: {reason}")]
    ChannelInitializationFailure { channel: String, reason: String },

    #[error("Invalid channel transition from {from} to {to}")]
    InvalidTransition { from: ChannelState, to: ChannelState },

    #[error("Organization {0} has no orderers")]
    NoOrderers(String),

    #[error("Organization {org} has no {role} to sign with")]
    MissingSigner { org: String, role: &'static str },

    #[error("Channel configuration artifact {}: {reason}", .path.display())]
    ConfigurationArtifact { path: PathBuf, reason: String },

    #[error("Channel {channel} still has {count} event listener(s) registered")]
    ListenersOutstanding { channel: String, count: usize },

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Uninitialized,
    Configured,
    Peered,
    Ready,
    Closed,
}

impl ChannelState {
    /// State the next construction step leads to
    pub fn successor(&self) -> Option<ChannelState> {
        match self {
            ChannelState::Uninitialized => Some(ChannelState::Configured),
            ChannelState::Configured => Some(ChannelState::Peered),
            ChannelState::Peered => Some(ChannelState::Ready),
            ChannelState::Ready | ChannelState::Closed => None,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::Configured => "configured",
            ChannelState::Peered => "peered",
            ChannelState::Ready => "ready",
            ChannelState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Opaque configuration-transaction artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfiguration {
    bytes: Vec<u8>,
}

impl ChannelConfiguration {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Read `<channel>.tx`; a missing or empty file is an error
    pub fn from_file(path: &Path) -> ChannelResult<Self> {
        let bytes = fs::read(path).map_err(|e| ChannelError::ConfigurationArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(ChannelError::ConfigurationArtifact {
                path: path.to_path_buf(),
                reason: "file is empty".to_string(),
            });
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Configuration block cached by channel initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBlock {
    pub channel: String,
    pub number: u64,
    pub orderers: Vec<String>,
}

/// A joined peer and the roles it serves on the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelPeer {
    pub handle: PeerHandle,
    pub roles: PeerRoles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerJoinFailure {
    pub peer: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrdererAttachFailure {
    pub orderer: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct Channel {
    name: String,
    state: ChannelState,
    peers: Vec<ChannelPeer>,
    signing_orderer: Option<OrdererHandle>,
    orderers: Vec<OrdererHandle>,
    config_block: Option<ConfigBlock>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ChannelState::Uninitialized,
            peers: Vec::new(),
            signing_orderer: None,
            orderers: Vec::new(),
            config_block: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Joined peers in join order
    pub fn peers(&self) -> &[ChannelPeer] {
        &self.peers
    }

    pub fn peer_handles(&self) -> Vec<PeerHandle> {
        self.peers.iter().map(|p| p.handle.clone()).collect()
    }

    pub fn endorsing_peers(&self) -> impl Iterator<Item = &ChannelPeer> {
        self.peers
            .iter()
            .filter(|p| p.roles.contains(PeerRole::EndorsingPeer))
    }

    /// Orderer that accepted the initial configuration
    pub fn signing_orderer(&self) -> Option<&OrdererHandle> {
        self.signing_orderer.as_ref()
    }

    /// Every attached orderer, the signing one first
    pub fn orderers(&self) -> &[OrdererHandle] {
        &self.orderers
    }

    pub fn config_block(&self) -> Option<&ConfigBlock> {
        self.config_block.as_ref()
    }

    /// Fail unless the next construction step leads to `to`
    pub fn ensure_transition(&self, to: ChannelState) -> ChannelResult<()> {
        if self.state.successor() == Some(to) {
            Ok(())
        } else {
            Err(ChannelError::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }

    fn advance(&mut self, to: ChannelState) -> ChannelResult<()> {
        self.ensure_transition(to)?;
        info!(channel = %self.name, from = %self.state, to = %to, "Channel state changed");
        self.state = to;
        Ok(())
    }

    pub(crate) fn mark_configured(&mut self, signing_orderer: OrdererHandle) -> ChannelResult<()> {
        self.advance(ChannelState::Configured)?;
        self.orderers.push(signing_orderer.clone());
        self.signing_orderer = Some(signing_orderer);
        Ok(())
    }

    pub(crate) fn mark_peered(&mut self, peers: Vec<ChannelPeer>) -> ChannelResult<()> {
        self.advance(ChannelState::Peered)?;
        self.peers = peers;
        Ok(())
    }

    pub(crate) fn mark_ready(
        &mut self,
        attached: Vec<OrdererHandle>,
        block: ConfigBlock,
    ) -> ChannelResult<()> {
        self.advance(ChannelState::Ready)?;
        self.orderers.extend(attached);
        self.config_block = Some(block);
        Ok(())
    }

    /// Close the channel once no event listener can still match it
    pub fn shutdown(&mut self, events: &ChaincodeEventRegistry) -> ChannelResult<()> {
        if self.state == ChannelState::Closed {
            return Err(ChannelError::InvalidTransition {
                from: self.state,
                to: ChannelState::Closed,
            });
        }

        let count = events.listeners_for_channel(&self.name);
        if count > 0 {
            return Err(ChannelError::ListenersOutstanding {
                channel: self.name.clone(),
                count,
            });
        }

        info!(channel = %self.name, from = %self.state, "Channel shut down");
        self.state = ChannelState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ConnectionProfile;
    use tempfile::tempdir;

    fn orderer(name: &str) -> OrdererHandle {
        OrdererHandle {
            name: name.to_string(),
            address: "grpc://localhost:7050".to_string(),
            profile: ConnectionProfile::default(),
        }
    }

    fn block() -> ConfigBlock {
        ConfigBlock {
            channel: "foo".to_string(),
            number: 0,
            orderers: vec!["orderer.example.com".to_string()],
        }
    }

    #[test]
    fn test_states_advance_in_order() {
        let mut channel = Channel::new("foo");
        assert_eq!(channel.state(), ChannelState::Uninitialized);

        channel.mark_configured(orderer("orderer.example.com")).unwrap();
        assert_eq!(channel.orderers().len(), 1);
        channel.mark_peered(Vec::new()).unwrap();
        channel.mark_ready(vec![orderer("orderer2.example.com")], block()).unwrap();

        assert_eq!(channel.state(), ChannelState::Ready);
        assert_eq!(channel.orderers().len(), 2);
        assert_eq!(channel.signing_orderer().unwrap().name, "orderer.example.com");
        assert!(channel.config_block().is_some());
    }

    #[test]
    fn test_steps_cannot_be_skipped() {
        let mut channel = Channel::new("foo");
        let err = channel.mark_peered(Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::InvalidTransition {
                from: ChannelState::Uninitialized,
                to: ChannelState::Peered
            }
        ));

        channel.mark_configured(orderer("o.example.com")).unwrap();
        assert!(channel.mark_configured(orderer("o.example.com")).is_err());
        assert!(channel.mark_ready(Vec::new(), block()).is_err());
        assert_eq!(channel.orderers().len(), 1);
    }

    #[test]
    fn test_shutdown_blocked_by_matching_listener() {
        let mut channel = Channel::new("foo");
        let events = ChaincodeEventRegistry::new();
        let handle = events.register(".*", "event").unwrap();

        assert!(matches!(
            channel.shutdown(&events),
            Err(ChannelError::ListenersOutstanding { count: 1, .. })
        ));

        events.unregister(&handle).unwrap();
        channel.shutdown(&events).unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.shutdown(&events).is_err());
    }

    #[test]
    fn test_non_matching_listener_does_not_block_shutdown() {
        let mut channel = Channel::new("foo");
        let events = ChaincodeEventRegistry::new();
        events.register("bar", ".*").unwrap();

        channel.shutdown(&events).unwrap();
    }

    #[test]
    fn test_configuration_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo.tx");

        assert!(matches!(
            ChannelConfiguration::from_file(&path),
            Err(ChannelError::ConfigurationArtifact { .. })
        ));

        fs::write(&path, b"").unwrap();
        assert!(ChannelConfiguration::from_file(&path).is_err());

        fs::write(&path, b"\x0a\x03foo").unwrap();
        let configuration = ChannelConfiguration::from_file(&path).unwrap();
        assert_eq!(configuration.as_bytes(), b"\x0a\x03foo");
    }
}
