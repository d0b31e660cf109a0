//! Channel transport collaborator
//!
//! Every call the orchestration makes against peers and orderers goes through
//! [`ChannelTransport`]. Implementations own the wire encoding and signing.

use super::{ChannelConfiguration, ConfigBlock, PeerRoles};
use crate::chaincode::{BlockEvent, ChaincodeEvent, InstallRequest, InstantiateRequest};
use crate::endpoint::{OrdererHandle, PeerHandle};
use crate::identity::Identity;
use crate::proposal::ProposalResponse;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),
}

/// Signature over a channel configuration by one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSignature {
    pub signer: String,
    pub msp_id: String,
    #[serde(serialize_with = "serialize_hex")]
    pub signature: Vec<u8>,
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn sign_channel_configuration(
        &self,
        configuration: &ChannelConfiguration,
        signer: &Identity,
    ) -> Result<ConfigSignature, TransportError>;

    /// Submit the signed configuration through `orderer`
    async fn create_channel(
        &self,
        channel: &str,
        orderer: &OrdererHandle,
        configuration: &ChannelConfiguration,
        signatures: &[ConfigSignature],
        creator: &Identity,
    ) -> Result<(), TransportError>;

    async fn join_peer(
        &self,
        channel: &str,
        peer: &PeerHandle,
        roles: &PeerRoles,
        signer: &Identity,
    ) -> Result<(), TransportError>;

    async fn add_orderer(
        &self,
        channel: &str,
        orderer: &OrdererHandle,
    ) -> Result<(), TransportError>;

    /// Fetch the channel's current configuration block
    async fn initialize(
        &self,
        channel: &str,
        orderers: &[OrdererHandle],
    ) -> Result<ConfigBlock, TransportError>;

    async fn send_install_proposal(
        &self,
        request: &InstallRequest,
        peer: &PeerHandle,
        signer: &Identity,
    ) -> Result<ProposalResponse, TransportError>;

    /// One instantiation request, fanned out to `peers` by the transport
    async fn send_instantiation_proposal(
        &self,
        channel: &str,
        request: &InstantiateRequest,
        peers: &[PeerHandle],
        signer: &Identity,
    ) -> Result<Vec<ProposalResponse>, TransportError>;

    /// Chaincode events committed on `channel` since the previous poll
    async fn poll_chaincode_events(
        &self,
        _channel: &str,
    ) -> Result<Vec<(BlockEvent, ChaincodeEvent)>, TransportError> {
        Ok(Vec::new())
    }
}
