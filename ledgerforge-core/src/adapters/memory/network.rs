//! Memory Network
//!
//! One [`MemoryNetwork`] plays every peer and orderer. It keeps the channels
//! it created, which peers joined them, which chaincode each peer holds and
//! a log of every call in arrival order.

use crate::chaincode::{
    BlockEvent, ChaincodeEvent, ChaincodeId, InstallRequest, InstantiateRequest,
};
use crate::channel::{
    ChannelConfiguration, ChannelTransport, ConfigBlock, ConfigSignature, PeerRoles,
    TransportError,
};
use crate::endpoint::{OrdererHandle, PeerHandle};
use crate::identity::{Identity, ROLE_ADMIN};
use crate::proposal::{ProposalResponse, ProposalStatus};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Kind of a recorded [`NetworkCall`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkOperation {
    SignConfiguration,
    CreateChannel,
    JoinPeer,
    AddOrderer,
    Initialize,
    Install,
    Instantiate,
}

/// One call received by the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCall {
    SignConfiguration {
        signer: String,
    },
    CreateChannel {
        channel: String,
        orderer: String,
        signers: Vec<String>,
        creator: String,
    },
    JoinPeer {
        channel: String,
        peer: String,
        signer: String,
    },
    AddOrderer {
        channel: String,
        orderer: String,
    },
    Initialize {
        channel: String,
        orderers: Vec<String>,
    },
    Install {
        peer: String,
        chaincode: String,
        signer: String,
    },
    Instantiate {
        channel: String,
        chaincode: String,
        peers: Vec<String>,
        signer: String,
    },
}

impl NetworkCall {
    pub fn operation(&self) -> NetworkOperation {
        match self {
            NetworkCall::SignConfiguration { .. } => NetworkOperation::SignConfiguration,
            NetworkCall::CreateChannel { .. } => NetworkOperation::CreateChannel,
            NetworkCall::JoinPeer { .. } => NetworkOperation::JoinPeer,
            NetworkCall::AddOrderer { .. } => NetworkOperation::AddOrderer,
            NetworkCall::Initialize { .. } => NetworkOperation::Initialize,
            NetworkCall::Install { .. } => NetworkOperation::Install,
            NetworkCall::Instantiate { .. } => NetworkOperation::Instantiate,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerChannel {
    orderers: Vec<String>,
    peers: Vec<String>,
    height: u64,
    instantiated: Vec<String>,
}

#[derive(Debug, Default)]
struct NetworkState {
    calls: Vec<NetworkCall>,
    channels: BTreeMap<String, LedgerChannel>,
    installed: HashSet<(String, String)>,
    pending_events: Vec<(BlockEvent, ChaincodeEvent)>,

    configuration_rejection: Option<String>,
    join_rejections: HashMap<String, String>,
    unreachable_orderers: HashSet<String>,
    install_rejections: HashMap<String, String>,
    instantiate_failures: HashMap<String, String>,
    unverified_instantiate: HashSet<String>,
    proposal_delays: HashMap<String, Duration>,
}

/// Every peer and orderer of a ledger network, held in memory
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    delays: HashMap<NetworkOperation, Duration>,
    state: Mutex<NetworkState>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call of kind `operation` by `delay`
    pub fn with_delay(mut self, operation: NetworkOperation, delay: Duration) -> Self {
        self.delays.insert(operation, delay);
        self
    }

    pub fn reject_channel_configuration(&self, reason: impl Into<String>) {
        self.state().configuration_rejection = Some(reason.into());
    }

    pub fn reject_peer_join(&self, peer: impl Into<String>, reason: impl Into<String>) {
        self.state().join_rejections.insert(peer.into(), reason.into());
    }

    pub fn unreachable_orderer(&self, orderer: impl Into<String>) {
        self.state().unreachable_orderers.insert(orderer.into());
    }

    pub fn reject_install(&self, peer: impl Into<String>, reason: impl Into<String>) {
        self.state().install_rejections.insert(peer.into(), reason.into());
    }

    /// Mark `chaincode` as already present on `peer`
    pub fn preinstall(&self, peer: impl Into<String>, chaincode: &ChaincodeId) {
        self.state()
            .installed
            .insert((peer.into(), chaincode.to_string()));
    }

    pub fn failed_instantiate(&self, peer: impl Into<String>, reason: impl Into<String>) {
        self.state()
            .instantiate_failures
            .insert(peer.into(), reason.into());
    }

    /// Answer `peer`'s instantiate endorsement with a signature that does not verify
    pub fn unverified_instantiate(&self, peer: impl Into<String>) {
        self.state().unverified_instantiate.insert(peer.into());
    }

    /// Delay proposals answered by `peer`
    pub fn delay_proposals(&self, peer: impl Into<String>, delay: Duration) {
        self.state().proposal_delays.insert(peer.into(), delay);
    }

    /// Commit a chaincode event on `channel`, delivered by the next poll
    pub fn emit_event(
        &self,
        channel: &str,
        chaincode: &ChaincodeId,
        event_name: &str,
        payload: &[u8],
    ) {
        let mut state = self.state();
        let block_number = match state.channels.get_mut(channel) {
            Some(ledger) => {
                ledger.height += 1;
                ledger.height - 1
            }
            None => 0,
        };
        let transaction_id = hex::encode(Sha256::digest(Uuid::new_v4().as_bytes()));

        state.pending_events.push((
            BlockEvent {
                channel: channel.to_string(),
                block_number,
            },
            ChaincodeEvent {
                chaincode_id: chaincode.name.clone(),
                event_name: event_name.to_string(),
                transaction_id,
                payload: payload.to_vec(),
            },
        ));
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<NetworkCall> {
        self.state().calls.clone()
    }

    /// Peers that received an install proposal, in arrival order
    pub fn installs(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                NetworkCall::Install { peer, .. } => Some(peer.clone()),
                _ => None,
            })
            .collect()
    }

    /// Channels that received an instantiation request, in arrival order
    pub fn instantiations(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                NetworkCall::Instantiate { channel, .. } => Some(channel.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn channel_peers(&self, channel: &str) -> Vec<String> {
        self.state()
            .channels
            .get(channel)
            .map(|c| c.peers.clone())
            .unwrap_or_default()
    }

    pub fn channel_orderers(&self, channel: &str) -> Vec<String> {
        self.state()
            .channels
            .get(channel)
            .map(|c| c.orderers.clone())
            .unwrap_or_default()
    }

    pub fn is_instantiated(&self, channel: &str, chaincode: &ChaincodeId) -> bool {
        self.state()
            .channels
            .get(channel)
            .map_or(false, |c| c.instantiated.contains(&chaincode.to_string()))
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: NetworkCall) {
        self.state().calls.push(call);
    }

    async fn pause(&self, operation: NetworkOperation) {
        if let Some(delay) = self.delays.get(&operation) {
            tokio::time::sleep(*delay).await;
        }
    }

    async fn pause_for_peers<'a>(&self, peers: impl Iterator<Item = &'a str>) {
        let delay = {
            let state = self.state();
            peers
                .filter_map(|p| state.proposal_delays.get(p).copied())
                .max()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn reject_unknown_channel(state: &NetworkState, channel: &str) -> Result<(), TransportError> {
        if state.channels.contains_key(channel) {
            Ok(())
        } else {
            Err(TransportError::Rejected(format!("channel {} does not exist", channel)))
        }
    }
}

fn transaction_id(signer: &Identity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(signer.credential().certificate().as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ChannelTransport for MemoryNetwork {
    async fn sign_channel_configuration(
        &self,
        configuration: &ChannelConfiguration,
        signer: &Identity,
    ) -> Result<ConfigSignature, TransportError> {
        self.record(NetworkCall::SignConfiguration {
            signer: signer.name().to_string(),
        });
        self.pause(NetworkOperation::SignConfiguration).await;

        if !signer.has_role(ROLE_ADMIN) {
            return Err(TransportError::Rejected(format!(
                "{} is not an administrator",
                signer.name()
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(configuration.as_bytes());
        hasher.update(signer.credential().private_key());
        Ok(ConfigSignature {
            signer: signer.name().to_string(),
            msp_id: signer.msp_id().to_string(),
            signature: hasher.finalize().to_vec(),
        })
    }

    async fn create_channel(
        &self,
        channel: &str,
        orderer: &OrdererHandle,
        _configuration: &ChannelConfiguration,
        signatures: &[ConfigSignature],
        creator: &Identity,
    ) -> Result<(), TransportError> {
        self.record(NetworkCall::CreateChannel {
            channel: channel.to_string(),
            orderer: orderer.name.clone(),
            signers: signatures.iter().map(|s| s.signer.clone()).collect(),
            creator: creator.name().to_string(),
        });
        self.pause(NetworkOperation::CreateChannel).await;

        let mut state = self.state();
        if state.unreachable_orderers.contains(&orderer.name) {
            return Err(TransportError::Unreachable(orderer.name.clone()));
        }
        if let Some(reason) = &state.configuration_rejection {
            return Err(TransportError::Rejected(reason.clone()));
        }
        if signatures.is_empty() {
            return Err(TransportError::Rejected("configuration is unsigned".to_string()));
        }
        if state.channels.contains_key(channel) {
            return Err(TransportError::Rejected(format!("channel {} already exists", channel)));
        }

        state.channels.insert(
            channel.to_string(),
            LedgerChannel {
                orderers: vec![orderer.name.clone()],
                height: 1,
                ..LedgerChannel::default()
            },
        );
        debug!(channel = %channel, orderer = %orderer.name, "Memory channel created");
        Ok(())
    }

    async fn join_peer(
        &self,
        channel: &str,
        peer: &PeerHandle,
        _roles: &PeerRoles,
        signer: &Identity,
    ) -> Result<(), TransportError> {
        self.record(NetworkCall::JoinPeer {
            channel: channel.to_string(),
            peer: peer.name.clone(),
            signer: signer.name().to_string(),
        });
        self.pause(NetworkOperation::JoinPeer).await;

        let mut state = self.state();
        Self::reject_unknown_channel(&state, channel)?;
        if let Some(reason) = state.join_rejections.get(&peer.name) {
            return Err(TransportError::Rejected(reason.clone()));
        }

        let ledger = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| {
                TransportError::Rejected(format!("channel {} does not exist", channel))
            })?;
        if ledger.peers.contains(&peer.name) {
            return Err(TransportError::Rejected(format!(
                "{} already joined {}",
                peer.name, channel
            )));
        }
        ledger.peers.push(peer.name.clone());
        Ok(())
    }

    async fn add_orderer(
        &self,
        channel: &str,
        orderer: &OrdererHandle,
    ) -> Result<(), TransportError> {
        self.record(NetworkCall::AddOrderer {
            channel: channel.to_string(),
            orderer: orderer.name.clone(),
        });
        self.pause(NetworkOperation::AddOrderer).await;

        let mut state = self.state();
        if state.unreachable_orderers.contains(&orderer.name) {
            return Err(TransportError::Unreachable(orderer.name.clone()));
        }
        let ledger = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| {
                TransportError::Rejected(format!("channel {} does not exist", channel))
            })?;
        if !ledger.orderers.contains(&orderer.name) {
            ledger.orderers.push(orderer.name.clone());
        }
        Ok(())
    }

    async fn initialize(
        &self,
        channel: &str,
        orderers: &[OrdererHandle],
    ) -> Result<ConfigBlock, TransportError> {
        self.record(NetworkCall::Initialize {
            channel: channel.to_string(),
            orderers: orderers.iter().map(|o| o.name.clone()).collect(),
        });
        self.pause(NetworkOperation::Initialize).await;

        let state = self.state();
        if !orderers
            .iter()
            .any(|o| !state.unreachable_orderers.contains(&o.name))
        {
            return Err(TransportError::Unreachable(format!(
                "none of {} orderer(s) answered",
                orderers.len()
            )));
        }
        let ledger = state
            .channels
            .get(channel)
            .ok_or_else(|| {
                TransportError::Rejected(format!("channel {} does not exist", channel))
            })?;

        Ok(ConfigBlock {
            channel: channel.to_string(),
            number: ledger.height.saturating_sub(1),
            orderers: ledger.orderers.clone(),
        })
    }

    async fn send_install_proposal(
        &self,
        request: &InstallRequest,
        peer: &PeerHandle,
        signer: &Identity,
    ) -> Result<ProposalResponse, TransportError> {
        let chaincode = request.chaincode.to_string();
        self.record(NetworkCall::Install {
            peer: peer.name.clone(),
            chaincode: chaincode.clone(),
            signer: signer.name().to_string(),
        });
        self.pause(NetworkOperation::Install).await;
        self.pause_for_peers(std::iter::once(peer.name.as_str())).await;

        let tx_id = transaction_id(signer);
        let mut state = self.state();
        let key = (peer.name.clone(), chaincode.clone());

        let rejection = state.install_rejections.get(&peer.name).cloned();

        let response = if let Some(reason) = rejection {
            ProposalResponse::new(&peer.name, tx_id, ProposalStatus::Failure, true, reason)
        } else if state.installed.contains(&key) {
            ProposalResponse::new(
                &peer.name,
                tx_id,
                ProposalStatus::Failure,
                true,
                format!("chaincode {} already installed", chaincode),
            )
        } else {
            state.installed.insert(key);
            ProposalResponse::new(&peer.name, tx_id, ProposalStatus::Success, true, "")
        };
        Ok(response)
    }

    async fn send_instantiation_proposal(
        &self,
        channel: &str,
        request: &InstantiateRequest,
        peers: &[PeerHandle],
        signer: &Identity,
    ) -> Result<Vec<ProposalResponse>, TransportError> {
        let chaincode = request.chaincode.to_string();
        self.record(NetworkCall::Instantiate {
            channel: channel.to_string(),
            chaincode: chaincode.clone(),
            peers: peers.iter().map(|p| p.name.clone()).collect(),
            signer: signer.name().to_string(),
        });
        self.pause(NetworkOperation::Instantiate).await;
        self.pause_for_peers(peers.iter().map(|p| p.name.as_str())).await;

        let tx_id = transaction_id(signer);
        let mut state = self.state();
        Self::reject_unknown_channel(&state, channel)?;

        let responses: Vec<ProposalResponse> = peers
            .iter()
            .map(|peer| {
                let installed = state
                    .installed
                    .contains(&(peer.name.clone(), chaincode.clone()));
                if let Some(reason) = state.instantiate_failures.get(&peer.name) {
                    ProposalResponse::new(
                        &peer.name,
                        &tx_id,
                        ProposalStatus::Failure,
                        true,
                        reason.clone(),
                    )
                } else if !installed {
                    ProposalResponse::new(
                        &peer.name,
                        &tx_id,
                        ProposalStatus::Failure,
                        true,
                        format!("chaincode {} not installed", chaincode),
                    )
                } else {
                    let verified = !state.unverified_instantiate.contains(&peer.name);
                    ProposalResponse::new(&peer.name, &tx_id, ProposalStatus::Success, verified, "")
                }
            })
            .collect();

        let endorsed = !responses.is_empty()
            && responses
                .iter()
                .all(|r| r.status() == ProposalStatus::Success && r.is_verified());
        if endorsed {
            if let Some(ledger) = state.channels.get_mut(channel) {
                ledger.instantiated.push(chaincode);
                ledger.height += 1;
            }
        }
        Ok(responses)
    }

    async fn poll_chaincode_events(
        &self,
        channel: &str,
    ) -> Result<Vec<(BlockEvent, ChaincodeEvent)>, TransportError> {
        let mut state = self.state();
        let (ready, pending): (Vec<_>, Vec<_>) = state
            .pending_events
            .drain(..)
            .partition(|(block, _)| block.channel == channel);
        state.pending_events = pending;
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ConnectionProfile;
    use crate::identity::Credential;

    fn admin() -> Identity {
        Identity::new("peerOrg1Admin", "Org1MSP", Credential::new(vec![7; 32], "cert"))
            .with_role(ROLE_ADMIN)
    }

    fn orderer(name: &str) -> OrdererHandle {
        OrdererHandle {
            name: name.to_string(),
            address: "grpc://localhost:7050".to_string(),
            profile: ConnectionProfile::default(),
        }
    }

    fn peer(name: &str) -> PeerHandle {
        PeerHandle {
            name: name.to_string(),
            address: "grpc://localhost:7051".to_string(),
            profile: ConnectionProfile::default(),
        }
    }

    async fn created(network: &MemoryNetwork) {
        let configuration = ChannelConfiguration::from_bytes(b"config".to_vec());
        let signature = network
            .sign_channel_configuration(&configuration, &admin())
            .await
            .unwrap();
        network
            .create_channel(
                "foo",
                &orderer("orderer.example.com"),
                &configuration,
                &[signature],
                &admin(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signature_is_deterministic() {
        let network = MemoryNetwork::new();
        let configuration = ChannelConfiguration::from_bytes(b"config".to_vec());

        let a = network.sign_channel_configuration(&configuration, &admin()).await.unwrap();
        let b = network.sign_channel_configuration(&configuration, &admin()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.signature.len(), 32);

        let member = Identity::new("user1", "Org1MSP", Credential::new(vec![1], "cert"));
        assert!(network.sign_channel_configuration(&configuration, &member).await.is_err());
    }

    #[tokio::test]
    async fn test_channel_created_once() {
        let network = MemoryNetwork::new();
        created(&network).await;

        let configuration = ChannelConfiguration::from_bytes(b"config".to_vec());
        let signature = network.sign_channel_configuration(&configuration, &admin()).await.unwrap();
        let err = network
            .create_channel(
                "foo",
                &orderer("orderer.example.com"),
                &configuration,
                &[signature],
                &admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Rejected(reason) if reason.contains("already exists")
        ));
        assert_eq!(network.channel_orderers("foo"), vec!["orderer.example.com"]);
    }

    #[tokio::test]
    async fn test_join_requires_channel() {
        let network = MemoryNetwork::new();
        let roles = PeerRoles::all();

        assert!(network
            .join_peer("foo", &peer("peer0.org1.example.com"), &roles, &admin())
            .await
            .is_err());

        created(&network).await;
        network
            .join_peer("foo", &peer("peer0.org1.example.com"), &roles, &admin())
            .await
            .unwrap();
        assert!(network
            .join_peer("foo", &peer("peer0.org1.example.com"), &roles, &admin())
            .await
            .is_err());
        assert_eq!(network.channel_peers("foo"), vec!["peer0.org1.example.com"]);
    }

    #[tokio::test]
    async fn test_initialize_reports_attached_orderers() {
        let network = MemoryNetwork::new();
        created(&network).await;
        network.add_orderer("foo", &orderer("orderer2.example.com")).await.unwrap();

        let block = network
            .initialize("foo", &[orderer("orderer.example.com"), orderer("orderer2.example.com")])
            .await
            .unwrap();
        assert_eq!(block.number, 0);
        assert_eq!(block.orderers, vec!["orderer.example.com", "orderer2.example.com"]);

        network.unreachable_orderer("orderer.example.com");
        assert!(network.initialize("foo", &[orderer("orderer.example.com")]).await.is_err());
    }

    #[tokio::test]
    async fn test_events_delivered_once_per_channel() {
        let network = MemoryNetwork::new();
        created(&network).await;
        let chaincode = ChaincodeId::new("example_cc_go", "1");
        network.emit_event("foo", &chaincode, "event", b"a");
        network.emit_event("bar", &chaincode, "event", b"b");

        let events = network.poll_chaincode_events("foo").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0.block_number, 1);
        assert_eq!(events[0].1.chaincode_id, "example_cc_go");

        assert!(network.poll_chaincode_events("foo").await.unwrap().is_empty());
        assert_eq!(network.poll_chaincode_events("bar").await.unwrap().len(), 1);
    }
}
