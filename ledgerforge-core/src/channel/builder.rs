//! Channel Builder
//!
//! Drives a [`Channel`] from `Uninitialized` to `Ready` for one
//! organization. Only configuration submission is fatal; per-peer join and
//! per-orderer attach failures are collected and construction continues.

use super::{
    Channel, ChannelConfiguration, ChannelError, ChannelPeer, ChannelResult, ChannelState,
    ChannelTransport, OrdererAttachFailure, PeerJoinFailure, PeerRoles,
};
use crate::config::NetworkConfig;
use crate::endpoint::{
    effective_address, ConnectionProfile, EndpointFactory, OrdererHandle, PeerHandle,
};
use crate::identity::Identity;
use crate::metrics;
use crate::org::{NodeEndpoint, Organization};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A built channel plus everything that went wrong along the way
#[derive(Debug)]
pub struct ChannelConstruction {
    pub channel: Channel,
    pub peer_failures: Vec<PeerJoinFailure>,
    pub orderer_failures: Vec<OrdererAttachFailure>,
}

/// Serializable view of a construction
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub name: String,
    pub state: ChannelState,
    pub signing_orderer: Option<String>,
    pub orderers: Vec<String>,
    pub peers: Vec<String>,
    pub peer_failures: Vec<PeerJoinFailure>,
    pub orderer_failures: Vec<OrdererAttachFailure>,
}

impl ChannelConstruction {
    pub fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            name: self.channel.name().to_string(),
            state: self.channel.state(),
            signing_orderer: self.channel.signing_orderer().map(|o| o.name.clone()),
            orderers: self.channel.orderers().iter().map(|o| o.name.clone()).collect(),
            peers: self.channel.peers().iter().map(|p| p.handle.name.clone()).collect(),
            peer_failures: self.peer_failures.clone(),
            orderer_failures: self.orderer_failures.clone(),
        }
    }
}

pub struct ChannelBuilder<'a> {
    config: &'a NetworkConfig,
    endpoints: &'a dyn EndpointFactory,
    transport: &'a dyn ChannelTransport,
}

impl<'a> ChannelBuilder<'a> {
    pub fn new(
        config: &'a NetworkConfig,
        endpoints: &'a dyn EndpointFactory,
        transport: &'a dyn ChannelTransport,
    ) -> Self {
        Self {
            config,
            endpoints,
            transport,
        }
    }

    /// Run every construction step for `org`
    pub async fn construct(&self, org: &Organization) -> ChannelResult<ChannelConstruction> {
        let mut channel = self.configure(org).await?;
        let peer_failures = self.join_peers(&mut channel, org).await?;
        let orderer_failures = self.attach_orderers(&mut channel, org).await?;

        Ok(ChannelConstruction {
            channel,
            peer_failures,
            orderer_failures,
        })
    }

    /// `Uninitialized → Configured`
    ///
    /// The first enumerated orderer signs and accepts the configuration. The
    /// choice is arbitrary; there is no fairness or load balancing.
    pub async fn configure(&self, org: &Organization) -> ChannelResult<Channel> {
        let name = &self.config.channel.name;
        let mut channel = Channel::new(name.as_str());
        channel.ensure_transition(ChannelState::Configured)?;

        let signing = org
            .orderers()
            .first()
            .ok_or_else(|| ChannelError::NoOrderers(org.name().to_string()))?;
        let signer = channel_signer(org)?;

        let configuration =
            ChannelConfiguration::from_file(&self.config.paths.channel_artifact(name))?;
        let orderer = self.orderer_handle(signing)?;

        let rejected = |reason: String| ChannelError::ChannelConfigurationRejected {
            channel: name.clone(),
            reason,
        };
        let ceiling = self.config.timeouts.channel_configuration;

        let signature = timeout(
            ceiling,
            self.transport.sign_channel_configuration(&configuration, signer),
        )
        .await
        .map_err(|_| rejected(format!("configuration signature timed out after {:?}", ceiling)))?
        .map_err(|e| rejected(e.to_string()))?;

        timeout(
            ceiling,
            self.transport
                .create_channel(name, &orderer, &configuration, &[signature], signer),
        )
        .await
        .map_err(|_| {
            rejected(format!("orderer {} did not answer within {:?}", orderer.name, ceiling))
        })?
        .map_err(|e| rejected(e.to_string()))?;

        info!(
            channel = %name,
            orderer = %orderer.name,
            signer = %signer.name(),
            "Channel configured"
        );
        channel.mark_configured(orderer)?;
        Ok(channel)
    }

    /// `Configured → Peered`; every peer is joined with [`PeerRoles::all`]
    pub async fn join_peers(
        &self,
        channel: &mut Channel,
        org: &Organization,
    ) -> ChannelResult<Vec<PeerJoinFailure>> {
        channel.ensure_transition(ChannelState::Peered)?;
        let signer = channel_signer(org)?;
        let roles = PeerRoles::all();
        let ceiling = self.config.timeouts.deploy_wait;

        let mut joined = Vec::with_capacity(org.peers().len());
        let mut failures = Vec::new();

        for peer in org.peers() {
            let result = match self.peer_handle(peer) {
                Ok(handle) => {
                    let join = self.transport.join_peer(channel.name(), &handle, &roles, signer);
                    match timeout(ceiling, join).await {
                        Ok(Ok(())) => Ok(handle),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("join timed out after {:?}", ceiling)),
                    }
                }
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(handle) => {
                    debug!(channel = %channel.name(), peer = %handle.name, "Peer joined");
                    metrics::record_peer_join(channel.name(), true);
                    joined.push(ChannelPeer {
                        handle,
                        roles: roles.clone(),
                    });
                }
                Err(reason) => {
                    warn!(
                        channel = %channel.name(),
                        peer = %peer.name,
                        reason = %reason,
                        "Peer failed to join"
                    );
                    metrics::record_peer_join(channel.name(), false);
                    failures.push(PeerJoinFailure {
                        peer: peer.name.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            channel = %channel.name(),
            joined = joined.len(),
            failed = failures.len(),
            "Peers joined"
        );
        channel.mark_peered(joined)?;
        Ok(failures)
    }

    /// `Peered → Ready`: attach the non-signing orderers, then initialize
    pub async fn attach_orderers(
        &self,
        channel: &mut Channel,
        org: &Organization,
    ) -> ChannelResult<Vec<OrdererAttachFailure>> {
        channel.ensure_transition(ChannelState::Ready)?;
        let signing_name = channel
            .signing_orderer()
            .map(|o| o.name.clone())
            .ok_or_else(|| ChannelError::NoOrderers(org.name().to_string()))?;
        let ceiling = self.config.timeouts.deploy_wait;

        let mut attached: Vec<OrdererHandle> = Vec::new();
        let mut failures = Vec::new();

        for orderer in org.orderers().iter().filter(|o| o.name != signing_name) {
            let result = match self.orderer_handle(orderer) {
                Ok(handle) => {
                    let attach = self.transport.add_orderer(channel.name(), &handle);
                    match timeout(ceiling, attach).await {
                        Ok(Ok(())) => Ok(handle),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("attach timed out after {:?}", ceiling)),
                    }
                }
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(handle) => {
                    debug!(channel = %channel.name(), orderer = %handle.name, "Orderer attached");
                    attached.push(handle);
                }
                Err(reason) => {
                    warn!(
                        channel = %channel.name(),
                        orderer = %orderer.name,
                        reason = %reason,
                        "Orderer failed to attach"
                    );
                    failures.push(OrdererAttachFailure {
                        orderer: orderer.name.clone(),
                        reason,
                    });
                }
            }
        }

        let mut reachable = channel.orderers().to_vec();
        reachable.extend(attached.iter().cloned());

        let initialization_failed = |reason: String| ChannelError::ChannelInitializationFailure {
            channel: channel.name().to_string(),
            reason,
        };
        let block = timeout(ceiling, self.transport.initialize(channel.name(), &reachable))
            .await
            .map_err(|_| {
                initialization_failed(format!("no configuration block within {:?}", ceiling))
            })?
            .map_err(|e| initialization_failed(format!("no orderer reachable: {}", e)))?;

        info!(
            channel = %channel.name(),
            orderers = reachable.len(),
            block = block.number,
            "Channel initialized"
        );
        channel.mark_ready(attached, block)?;
        Ok(failures)
    }

    fn peer_handle(&self, peer: &NodeEndpoint) -> ChannelResult<PeerHandle> {
        let profile = ConnectionProfile::for_peer(&peer.name, self.config)?;
        let address = effective_address(&peer.address, self.config.tls.enabled);
        Ok(self.endpoints.new_peer(&peer.name, &address, profile)?)
    }

    fn orderer_handle(&self, orderer: &NodeEndpoint) -> ChannelResult<OrdererHandle> {
        let profile = ConnectionProfile::for_orderer(&orderer.name, self.config)?;
        let address = effective_address(&orderer.address, self.config.tls.enabled);
        Ok(self.endpoints.new_orderer(&orderer.name, &address, profile)?)
    }
}

fn channel_signer(org: &Organization) -> ChannelResult<&Identity> {
    org.channel_admin().ok_or_else(|| ChannelError::MissingSigner {
        org: org.name().to_string(),
        role: "channel administrator",
    })
}
