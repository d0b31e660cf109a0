//! Chaincode Lifecycle Manager

use super::{
    ChaincodeError, ChaincodeEventRegistry, ChaincodeResult, InstallRequest, InstantiateRequest,
    LifecycleStage, LifecycleState, ListenerHandle, PeerFailure, StageOutcome,
};
use crate::channel::{Channel, ChannelState, ChannelTransport};
use crate::config::NetworkConfig;
use crate::identity::Identity;
use crate::metrics;
use crate::proposal::{classify, Verification};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Stages install and instantiate on ready channels
pub struct ChaincodeLifecycleManager<'a> {
    config: &'a NetworkConfig,
    transport: &'a dyn ChannelTransport,
    events: ChaincodeEventRegistry,
    states: BTreeMap<String, LifecycleState>,
}

impl<'a> ChaincodeLifecycleManager<'a> {
    pub fn new(config: &'a NetworkConfig, transport: &'a dyn ChannelTransport) -> Self {
        Self {
            config,
            transport,
            events: ChaincodeEventRegistry::new(),
            states: BTreeMap::new(),
        }
    }

    pub fn state(&self, channel: &str) -> LifecycleState {
        self.states
            .get(channel)
            .copied()
            .unwrap_or(LifecycleState::NotInstalled)
    }

    pub fn events(&self) -> &ChaincodeEventRegistry {
        &self.events
    }

    /// Send one install proposal per channel peer and wait for all of them
    ///
    /// Rejections, transport errors and timeouts count as per-peer failures.
    /// The channel becomes `Installed` once `lifecycle.min_install_successes`
    /// peers accepted the package.
    pub async fn install(
        &mut self,
        channel: &Channel,
        request: &InstallRequest,
        signer: &Identity,
    ) -> ChaincodeResult<StageOutcome> {
        self.ensure_stage(channel, LifecycleStage::Install, LifecycleState::NotInstalled)?;
        info!(
            channel = %channel.name(),
            chaincode = %request.chaincode,
            peers = channel.peers().len(),
            signer = %signer.name(),
            "Installing chaincode"
        );

        let transport = self.transport;
        let wait = request.proposal_wait;
        let sends = channel.peers().iter().map(|peer| async move {
            let proposal = transport.send_install_proposal(request, &peer.handle, signer);
            let result = timeout(wait, proposal).await;
            (peer.handle.name.clone(), result)
        });

        let mut responses = Vec::new();
        let mut unanswered = Vec::new();
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(Ok(response)) => {
                    debug!(
                        peer = %peer,
                        tx_id = %response.transaction_id(),
                        status = %response.status(),
                        "Install response"
                    );
                    responses.push(response);
                }
                Ok(Err(e)) => unanswered.push(PeerFailure::no_response(peer, e.to_string())),
                Err(_) => unanswered.push(PeerFailure::no_response(
                    peer,
                    format!("no install response within {:?}", wait),
                )),
            }
        }

        let outcome = StageOutcome::from_classified(
            LifecycleStage::Install,
            classify(responses, Verification::StatusOnly),
            unanswered,
        );
        self.record(channel, &outcome);

        outcome.ensure_quorum(self.config.lifecycle.min_install_successes)?;
        self.states
            .insert(channel.name().to_string(), LifecycleState::Installed);
        info!(
            channel = %channel.name(),
            successful = outcome.successful.len(),
            failed = outcome.failed.len(),
            "Chaincode installed"
        );
        Ok(outcome)
    }

    /// Treat the package as already present on the channel's peers
    pub fn assume_installed(&mut self, channel: &Channel) -> ChaincodeResult<()> {
        self.ensure_stage(channel, LifecycleStage::Install, LifecycleState::NotInstalled)?;
        info!(channel = %channel.name(), "Skipping install; chaincode assumed present");
        self.states
            .insert(channel.name().to_string(), LifecycleState::Installed);
        Ok(())
    }

    /// Send one instantiation request to the channel
    ///
    /// Every peer must answer with status SUCCESS and a verified signature. A
    /// peer missing from the answer counts as failed.
    pub async fn instantiate(
        &mut self,
        channel: &Channel,
        request: &InstantiateRequest,
        signer: &Identity,
    ) -> ChaincodeResult<StageOutcome> {
        if self.state(channel.name()) == LifecycleState::NotInstalled {
            return Err(ChaincodeError::NotInstalled {
                channel: channel.name().to_string(),
                chaincode: request.chaincode.to_string(),
            });
        }
        self.ensure_stage(channel, LifecycleStage::Instantiate, LifecycleState::Installed)?;
        info!(
            channel = %channel.name(),
            chaincode = %request.chaincode,
            function = %request.function,
            args = ?request.args,
            "Instantiating chaincode"
        );

        let peers = channel.peer_handles();
        let wait = request.proposal_wait;
        let sent = timeout(
            wait,
            self.transport
                .send_instantiation_proposal(channel.name(), request, &peers, signer),
        )
        .await;

        let (responses, unanswered) = match sent {
            Ok(Ok(responses)) => {
                let answered: HashSet<&str> = responses.iter().map(|r| r.peer()).collect();
                let missing = peers
                    .iter()
                    .filter(|p| !answered.contains(p.name.as_str()))
                    .map(|p| PeerFailure::no_response(&p.name, "no instantiate response"))
                    .collect();
                (responses, missing)
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                let all = peers
                    .iter()
                    .map(|p| PeerFailure::no_response(&p.name, reason.clone()))
                    .collect();
                (Vec::new(), all)
            }
            Err(_) => {
                let all = peers
                    .iter()
                    .map(|p| {
                        let reason = format!("no instantiate response within {:?}", wait);
                        PeerFailure::no_response(&p.name, reason)
                    })
                    .collect();
                (Vec::new(), all)
            }
        };

        let outcome = StageOutcome::from_classified(
            LifecycleStage::Instantiate,
            classify(responses, Verification::StatusAndSignature),
            unanswered,
        );
        self.record(channel, &outcome);

        outcome.ensure_complete()?;
        self.states
            .insert(channel.name().to_string(), LifecycleState::Instantiated);
        info!(
            channel = %channel.name(),
            peers = outcome.successful.len(),
            "Chaincode instantiated"
        );
        Ok(outcome)
    }

    pub fn register_event_listener(
        &self,
        channel_pattern: &str,
        event_pattern: &str,
    ) -> ChaincodeResult<ListenerHandle> {
        Ok(self.events.register(channel_pattern, event_pattern)?)
    }

    pub fn unregister_event_listener(&self, handle: &ListenerHandle) -> ChaincodeResult<()> {
        Ok(self.events.unregister(handle)?)
    }

    /// Poll the transport for committed chaincode events and hand them to the
    /// registered listeners; returns how many captures were recorded
    pub async fn deliver_events(&self, channel: &Channel) -> usize {
        let polled = timeout(
            self.config.timeouts.proposal_wait,
            self.transport.poll_chaincode_events(channel.name()),
        )
        .await;

        let events = match polled {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!(channel = %channel.name(), error = %e, "Chaincode event poll failed");
                return 0;
            }
            Err(_) => {
                warn!(channel = %channel.name(), "Chaincode event poll timed out");
                return 0;
            }
        };

        let mut captured = 0;
        for (block, event) in &events {
            let matched = self.events.dispatch(block, event);
            debug!(
                channel = %block.channel,
                block = block.block_number,
                event = %event.event_name,
                tx_id = %event.transaction_id,
                listeners = matched,
                "Chaincode event"
            );
            captured += matched;
        }
        captured
    }

    fn ensure_stage(
        &self,
        channel: &Channel,
        stage: LifecycleStage,
        expected: LifecycleState,
    ) -> ChaincodeResult<()> {
        if channel.state() != ChannelState::Ready {
            return Err(ChaincodeError::ChannelNotReady {
                channel: channel.name().to_string(),
                state: channel.state(),
            });
        }
        let state = self.state(channel.name());
        if state != expected {
            return Err(ChaincodeError::InvalidState {
                channel: channel.name().to_string(),
                stage,
                state,
            });
        }
        Ok(())
    }

    fn record(&self, channel: &Channel, outcome: &StageOutcome) {
        metrics::record_proposals(
            outcome.stage.as_str(),
            outcome.successful.len(),
            outcome.failed.len(),
        );
        for failure in &outcome.failed {
            warn!(
                channel = %channel.name(),
                stage = %outcome.stage,
                peer = %failure.peer,
                reason = %failure.reason,
                "Proposal failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryNetwork;
    use crate::chaincode::ChaincodeId;
    use crate::test_utils::{ready_channel, NetworkFixture};
    use std::time::Duration;

    #[tokio::test]
    async fn test_install_then_instantiate() {
        let fixture = NetworkFixture::new();
        let network = MemoryNetwork::new();
        let (org, channel) = ready_channel(&fixture.config, &network).await;
        let admin = org.node_admin().unwrap();
        let mut manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        let install = manager
            .install(&channel, &InstallRequest::from_config(&fixture.config), admin)
            .await
            .unwrap();
        assert_eq!(install.successful.len(), 2);
        assert_eq!(manager.state("foo"), LifecycleState::Installed);

        let request = InstantiateRequest::from_config(&fixture.config).unwrap();
        let instantiate = manager.instantiate(&channel, &request, admin).await.unwrap();
        assert_eq!(instantiate.successful.len(), 2);
        assert_eq!(manager.state("foo"), LifecycleState::Instantiated);
    }

    #[tokio::test]
    async fn test_instantiate_before_install_refused() {
        let fixture = NetworkFixture::new();
        let network = MemoryNetwork::new();
        let (org, channel) = ready_channel(&fixture.config, &network).await;
        let mut manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        let request = InstantiateRequest::from_config(&fixture.config).unwrap();
        let err = manager
            .instantiate(&channel, &request, org.node_admin().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ChaincodeError::NotInstalled { .. }));
        assert!(network.instantiations().is_empty());
    }

    #[tokio::test]
    async fn test_already_installed_peer_is_partial_failure() {
        let fixture = NetworkFixture::new();
        let network = MemoryNetwork::new();
        let request = InstallRequest::from_config(&fixture.config);
        network.preinstall("peer0.org1.example.com", &request.chaincode);
        let (org, channel) = ready_channel(&fixture.config, &network).await;
        let mut manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        let outcome = manager
            .install(&channel, &request, org.node_admin().unwrap())
            .await
            .unwrap();

        assert_eq!(outcome.successful, vec!["peer1.org1.example.com"]);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].reason.contains("already installed"));
        assert_eq!(manager.state("foo"), LifecycleState::Installed);
    }

    #[tokio::test]
    async fn test_install_below_quorum_fails() {
        let mut fixture = NetworkFixture::new();
        fixture.config.lifecycle.min_install_successes = 2;
        let network = MemoryNetwork::new();
        network.reject_install("peer1.org1.example.com", "chaincode package too large");
        let (org, channel) = ready_channel(&fixture.config, &network).await;
        let mut manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        let err = manager
            .install(
                &channel,
                &InstallRequest::from_config(&fixture.config),
                org.node_admin().unwrap(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ChaincodeError::ChaincodeLifecycle { stage: LifecycleStage::Install, successful: 1, .. }
        ));
        assert_eq!(manager.state("foo"), LifecycleState::NotInstalled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_timeout_is_per_peer() {
        let mut fixture = NetworkFixture::new();
        fixture.config.timeouts.proposal_wait = Duration::from_millis(500);
        let network = MemoryNetwork::new();
        network.delay_proposals("peer0.org1.example.com", Duration::from_secs(3));
        let (org, channel) = ready_channel(&fixture.config, &network).await;
        let mut manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        let outcome = manager
            .install(
                &channel,
                &InstallRequest::from_config(&fixture.config),
                org.node_admin().unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.successful, vec!["peer1.org1.example.com"]);
        assert_eq!(outcome.failed[0].peer, "peer0.org1.example.com");
        assert!(outcome.failed[0].status.is_none());
    }

    #[tokio::test]
    async fn test_unverified_instantiate_response_fails_stage() {
        let fixture = NetworkFixture::new();
        let network = MemoryNetwork::new();
        network.unverified_instantiate("peer1.org1.example.com");
        let (org, channel) = ready_channel(&fixture.config, &network).await;
        let admin = org.node_admin().unwrap();
        let mut manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        manager
            .install(&channel, &InstallRequest::from_config(&fixture.config), admin)
            .await
            .unwrap();
        let request = InstantiateRequest::from_config(&fixture.config).unwrap();
        let err = manager.instantiate(&channel, &request, admin).await.unwrap_err();

        match err {
            ChaincodeError::ChaincodeLifecycle { stage, successful, failed } => {
                assert_eq!(stage, LifecycleStage::Instantiate);
                assert_eq!(successful, 1);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].peer, "peer1.org1.example.com");
                assert!(!failed[0].verified);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(manager.state("foo"), LifecycleState::Installed);
    }

    #[tokio::test]
    async fn test_assume_installed_allows_instantiate() {
        let fixture = NetworkFixture::new();
        let network = MemoryNetwork::new();
        let chaincode = InstallRequest::from_config(&fixture.config).chaincode;
        network.preinstall("peer0.org1.example.com", &chaincode);
        network.preinstall("peer1.org1.example.com", &chaincode);
        let (org, channel) = ready_channel(&fixture.config, &network).await;
        let mut manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        manager.assume_installed(&channel).unwrap();
        assert!(manager.assume_installed(&channel).is_err());

        let request = InstantiateRequest::from_config(&fixture.config).unwrap();
        manager
            .instantiate(&channel, &request, org.node_admin().unwrap())
            .await
            .unwrap();
        assert!(network.installs().is_empty());
        assert!(network.is_instantiated("foo", &chaincode));
    }

    #[tokio::test]
    async fn test_channel_must_be_ready() {
        let fixture = NetworkFixture::new();
        let network = MemoryNetwork::new();
        let (org, _) = ready_channel(&fixture.config, &network).await;
        let mut manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        let channel = Channel::new("foo");
        let err = manager
            .install(
                &channel,
                &InstallRequest::from_config(&fixture.config),
                org.node_admin().unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChaincodeError::ChannelNotReady { .. }));
    }

    #[tokio::test]
    async fn test_event_listener_lifecycle() {
        let fixture = NetworkFixture::new();
        let network = MemoryNetwork::new();
        let manager = ChaincodeLifecycleManager::new(&fixture.config, &network);

        let handle = manager.register_event_listener(".*", "event").unwrap();
        assert_eq!(manager.events().listeners_for_channel("foo"), 1);
        manager.unregister_event_listener(&handle).unwrap();
        assert!(manager.unregister_event_listener(&handle).is_err());
    }

    #[tokio::test]
    async fn test_deliver_events_to_matching_listener() {
        let fixture = NetworkFixture::new();
        let network = MemoryNetwork::new();
        let (_org, channel) = ready_channel(&fixture.config, &network).await;
        let manager = ChaincodeLifecycleManager::new(&fixture.config, &network);
        let handle = manager.register_event_listener(".*", "event").unwrap();

        network.emit_event("foo", &ChaincodeId::new("example_cc_go", "1"), "event", b"!");
        network.emit_event("foo", &ChaincodeId::new("example_cc_go", "1"), "other", b"?");

        assert_eq!(manager.deliver_events(&channel).await, 1);
        let captures = manager.events().captures(&handle);
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].event.payload, b"!".to_vec());
        assert_eq!(captures[0].block.channel, "foo");

        assert_eq!(manager.deliver_events(&channel).await, 0);
    }
}
