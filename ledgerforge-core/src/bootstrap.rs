//! Network Bootstrap - Main Orchestrator
//!
//! Runs one complete bootstrap against the configured network:
//!
//! ```text
//! enroll every org ─▶ configure ─▶ join peers ─▶ attach orderers
//!     ─▶ install ─▶ instantiate ─▶ shutdown
//! ```
//!
//! Enrollment finishes for every organization before any channel step
//! starts. Per-organization enrollment failures are collected; the channel
//! organization failing, channel configuration failing or a lifecycle stage
//! failing ends the run. Either way the caller gets a [`RunReport`].

use crate::ca::CaConnector;
use crate::chaincode::{
    ChaincodeError, ChaincodeLifecycleManager, EventCapture, InstallRequest, InstantiateRequest,
    LifecycleStage, ListenerHandle, PeerFailure, StageOutcome,
};
use crate::channel::{Channel, ChannelBuilder, ChannelState, ChannelSummary, ChannelTransport};
use crate::config::NetworkConfig;
use crate::endpoint::EndpointFactory;
use crate::enrollment::{EnrollmentCoordinator, EnrollmentSummary};
use crate::error::{BootstrapError, BootstrapResult};
use crate::metrics::{self, Timer};
use crate::org::{Organization, OrganizationRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Collaborators a run talks to
#[derive(Clone)]
pub struct NetworkServices {
    pub ca: Arc<dyn CaConnector>,
    pub endpoints: Arc<dyn EndpointFactory>,
    pub transport: Arc<dyn ChannelTransport>,
}

/// Steps a run is divided into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapStep {
    Enrollment,
    Channel,
    Install,
    Instantiate,
    Shutdown,
}

impl BootstrapStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapStep::Enrollment => "enrollment",
            BootstrapStep::Channel => "channel",
            BootstrapStep::Install => "install",
            BootstrapStep::Instantiate => "instantiate",
            BootstrapStep::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrollmentOutcome {
    Enrolled(EnrollmentSummary),
    Failed { org: String, error: String },
}

impl EnrollmentOutcome {
    pub fn org(&self) -> &str {
        match self {
            EnrollmentOutcome::Enrolled(summary) => &summary.org,
            EnrollmentOutcome::Failed { org, .. } => org,
        }
    }

    pub fn is_enrolled(&self) -> bool {
        matches!(self, EnrollmentOutcome::Enrolled(_))
    }
}

/// Per-peer counts of one lifecycle stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: LifecycleStage,
    /// Install was not attempted; the package was assumed present
    pub skipped: bool,
    pub successful: usize,
    pub failed: Vec<PeerFailure>,
}

impl StageReport {
    fn skipped(stage: LifecycleStage) -> Self {
        Self {
            stage,
            skipped: true,
            successful: 0,
            failed: Vec::new(),
        }
    }
}

impl From<&StageOutcome> for StageReport {
    fn from(outcome: &StageOutcome) -> Self {
        Self {
            stage: outcome.stage,
            skipped: false,
            successful: outcome.successful.len(),
            failed: outcome.failed.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub step: BootstrapStep,
    pub duration_ms: f64,
}

/// The fatal error that ended a run
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub step: BootstrapStep,
    pub error: String,
}

/// Everything that happened during one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub enrollments: Vec<EnrollmentOutcome>,
    pub channel: Option<ChannelSummary>,
    pub install: Option<StageReport>,
    pub instantiate: Option<StageReport>,
    /// Events captured by the run's listener, in delivery order
    pub events: Vec<EventCapture>,
    pub steps: Vec<StepTiming>,
    pub failure: Option<RunFailure>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            enrollments: Vec::new(),
            channel: None,
            install: None,
            instantiate: None,
            events: Vec::new(),
            steps: Vec::new(),
            failure: None,
        }
    }

    /// No fatal error and every organization enrolled
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.enrollments.iter().all(EnrollmentOutcome::is_enrolled)
    }

    pub fn enrollment(&self, org: &str) -> Option<&EnrollmentOutcome> {
        self.enrollments.iter().find(|e| e.org() == org)
    }

    fn timed(&mut self, step: BootstrapStep, timer: Timer) {
        self.steps.push(StepTiming {
            step,
            duration_ms: timer.stop(),
        });
    }

    /// Record a stage from a failed lifecycle result
    fn stage_from_error(stage: LifecycleStage, e: &ChaincodeError) -> Option<StageReport> {
        match e {
            ChaincodeError::ChaincodeLifecycle {
                successful, failed, ..
            } => Some(StageReport {
                stage,
                skipped: false,
                successful: *successful,
                failed: failed.clone(),
            }),
            _ => None,
        }
    }
}

type StepResult<T> = Result<T, (BootstrapStep, BootstrapError)>;

fn at<E: Into<BootstrapError>>(
    step: BootstrapStep,
) -> impl FnOnce(E) -> (BootstrapStep, BootstrapError) {
    move |e| (step, e.into())
}

pub struct NetworkBootstrap<'a> {
    config: &'a NetworkConfig,
    services: NetworkServices,
}

impl<'a> NetworkBootstrap<'a> {
    pub fn new(config: &'a NetworkConfig, services: NetworkServices) -> Self {
        Self { config, services }
    }

    /// Run every step once
    ///
    /// Only an invalid topology is returned as `Err`; failures of network
    /// steps are recorded in the report.
    pub async fn run(&self) -> BootstrapResult<RunReport> {
        let mut registry = OrganizationRegistry::from_config(self.config)?;
        let mut report = RunReport::new();
        info!(
            channel = %self.config.channel.name,
            organizations = registry.len(),
            "Starting network bootstrap"
        );

        let timer = Timer::new(BootstrapStep::Enrollment.as_str());
        self.enroll_all(&mut registry, &mut report).await;
        report.timed(BootstrapStep::Enrollment, timer);

        if let Err((step, e)) = self.deploy(&registry, &mut report).await {
            error!(step = step.as_str(), error = %e, "Bootstrap failed");
            report.failure = Some(RunFailure {
                step,
                error: e.to_string(),
            });
        } else {
            info!(channel = %self.config.channel.name, "Bootstrap complete");
        }
        Ok(report)
    }

    async fn enroll_all(&self, registry: &mut OrganizationRegistry, report: &mut RunReport) {
        let coordinator = EnrollmentCoordinator::new(self.config);

        for org in registry.iter_mut() {
            let result = match self.services.ca.connect(org.ca()) {
                Ok(ca) => coordinator
                    .enroll_organization(org, ca.as_ref())
                    .await
                    .map_err(BootstrapError::from),
                Err(e) => Err(BootstrapError::from(e)),
            };

            let outcome = match result {
                Ok(summary) => EnrollmentOutcome::Enrolled(summary),
                Err(e) => {
                    warn!(org = %org.name(), error = %e, "Organization enrollment failed");
                    metrics::record_enrollment_failure(org.name());
                    EnrollmentOutcome::Failed {
                        org: org.name().to_string(),
                        error: e.to_string(),
                    }
                }
            };
            report.enrollments.push(outcome);
        }
    }

    async fn deploy(
        &self,
        registry: &OrganizationRegistry,
        report: &mut RunReport,
    ) -> StepResult<()> {
        let org = self.channel_organization(registry, report)?;

        let timer = Timer::new(BootstrapStep::Channel.as_str());
        let builder = ChannelBuilder::new(
            self.config,
            self.services.endpoints.as_ref(),
            self.services.transport.as_ref(),
        );
        let construction = builder.construct(org).await.map_err(at(BootstrapStep::Channel))?;
        report.channel = Some(construction.summary());
        report.timed(BootstrapStep::Channel, timer);

        let mut channel = construction.channel;
        let mut manager =
            ChaincodeLifecycleManager::new(self.config, self.services.transport.as_ref());

        let lifecycle = &self.config.lifecycle;
        let listener = if lifecycle.capture_events {
            let handle = manager
                .register_event_listener(
                    &lifecycle.event_channel_pattern,
                    &lifecycle.event_name_pattern,
                )
                .map_err(at(BootstrapStep::Channel))?;
            Some(handle)
        } else {
            None
        };

        let staged = self.stage_chaincode(&mut manager, &channel, org, report).await;
        let closed = self
            .close(&manager, &mut channel, listener.as_ref(), staged.is_ok(), report)
            .await;
        if let Some(summary) = report.channel.as_mut() {
            summary.state = channel.state();
        }

        staged?;
        closed
    }

    fn channel_organization<'r>(
        &self,
        registry: &'r OrganizationRegistry,
        report: &RunReport,
    ) -> StepResult<&'r Organization> {
        let name = &self.config.channel.organization;
        let org = registry.get(name).map_err(at(BootstrapStep::Channel))?;

        match report.enrollment(name) {
            Some(EnrollmentOutcome::Enrolled(_)) => Ok(org),
            Some(EnrollmentOutcome::Failed { error, .. }) => Err((
                BootstrapStep::Channel,
                BootstrapError::OrganizationUnavailable {
                    org: name.clone(),
                    reason: error.clone(),
                },
            )),
            None => Err((
                BootstrapStep::Channel,
                BootstrapError::OrganizationUnavailable {
                    org: name.clone(),
                    reason: "never enrolled".to_string(),
                },
            )),
        }
    }

    async fn stage_chaincode(
        &self,
        manager: &mut ChaincodeLifecycleManager<'_>,
        channel: &Channel,
        org: &Organization,
        report: &mut RunReport,
    ) -> StepResult<()> {
        let signer = org.node_admin().ok_or_else(|| {
            (
                BootstrapStep::Install,
                BootstrapError::OrganizationUnavailable {
                    org: org.name().to_string(),
                    reason: "no node administrator enrolled".to_string(),
                },
            )
        })?;

        let timer = Timer::new(BootstrapStep::Install.as_str());
        if self.config.lifecycle.install {
            let request = InstallRequest::from_config(self.config);
            match manager.install(channel, &request, signer).await {
                Ok(outcome) => report.install = Some(StageReport::from(&outcome)),
                Err(e) => {
                    report.install = RunReport::stage_from_error(LifecycleStage::Install, &e);
                    return Err((BootstrapStep::Install, e.into()));
                }
            }
        } else {
            manager.assume_installed(channel).map_err(at(BootstrapStep::Install))?;
            report.install = Some(StageReport::skipped(LifecycleStage::Install));
        }
        report.timed(BootstrapStep::Install, timer);

        let timer = Timer::new(BootstrapStep::Instantiate.as_str());
        let request =
            InstantiateRequest::from_config(self.config).map_err(at(BootstrapStep::Instantiate))?;
        match manager.instantiate(channel, &request, signer).await {
            Ok(outcome) => report.instantiate = Some(StageReport::from(&outcome)),
            Err(e) => {
                report.instantiate = RunReport::stage_from_error(LifecycleStage::Instantiate, &e);
                return Err((BootstrapStep::Instantiate, e.into()));
            }
        }
        report.timed(BootstrapStep::Instantiate, timer);
        Ok(())
    }

    /// Revoke the run's listener, then shut the channel down
    async fn close(
        &self,
        manager: &ChaincodeLifecycleManager<'_>,
        channel: &mut Channel,
        listener: Option<&ListenerHandle>,
        deliver: bool,
        report: &mut RunReport,
    ) -> StepResult<()> {
        if let Some(handle) = listener {
            if deliver {
                manager.deliver_events(channel).await;
                report.events = manager.events().captures(handle);
            }
            manager
                .unregister_event_listener(handle)
                .map_err(at(BootstrapStep::Shutdown))?;
        }

        if channel.state() != ChannelState::Closed {
            channel
                .shutdown(manager.events())
                .map_err(at(BootstrapStep::Shutdown))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{fixtures, MemoryCaConnector, MemoryNetwork, NetworkOperation};
    use crate::endpoint::DirectEndpointFactory;
    use tempfile::{tempdir, TempDir};

    struct Harness {
        _dir: TempDir,
        config: NetworkConfig,
        network: Arc<MemoryNetwork>,
        cas: Arc<MemoryCaConnector>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let mut config = NetworkConfig::default();
            config.paths.crypto_config = dir.path().join("crypto-config");
            config.paths.resources = dir.path().to_path_buf();
            fixtures::provision(&config).unwrap();

            Self {
                _dir: dir,
                config,
                network: Arc::new(MemoryNetwork::new()),
                cas: Arc::new(MemoryCaConnector::new()),
            }
        }

        async fn run(&self) -> RunReport {
            let services = NetworkServices {
                ca: self.cas.clone(),
                endpoints: Arc::new(DirectEndpointFactory),
                transport: self.network.clone(),
            };
            NetworkBootstrap::new(&self.config, services).run().await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_full_run_succeeds() {
        let harness = Harness::new();
        let report = harness.run().await;

        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(report.enrollments.len(), 2);
        let channel = report.channel.as_ref().unwrap();
        assert_eq!(channel.state, ChannelState::Closed);
        assert_eq!(channel.peers.len(), 2);
        assert_eq!(report.install.as_ref().unwrap().successful, 2);
        assert_eq!(report.instantiate.as_ref().unwrap().successful, 2);
        assert_eq!(report.steps.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_side_org_does_not_stop_channel() {
        let harness = Harness::new();
        harness.cas.unreachable("http://localhost:8054");

        let report = harness.run().await;

        assert!(report.failure.is_none());
        assert!(!report.is_success());
        assert!(!report.enrollment("peerOrg2").unwrap().is_enrolled());
        assert!(report.enrollment("peerOrg1").unwrap().is_enrolled());
        assert!(report.instantiate.is_some());
    }

    #[tokio::test]
    async fn test_channel_org_enrollment_failure_is_fatal() {
        let harness = Harness::new();
        harness.cas.unreachable("http://localhost:7054");

        let report = harness.run().await;

        let failure = report.failure.unwrap();
        assert_eq!(failure.step, BootstrapStep::Channel);
        assert!(failure.error.contains("peerOrg1"));
        assert!(report.channel.is_none());
        assert!(harness.network.calls().is_empty());
    }

    #[tokio::test]
    async fn test_skip_install_mode() {
        let mut harness = Harness::new();
        harness.config.lifecycle.install = false;
        let chaincode = InstallRequest::from_config(&harness.config).chaincode;
        harness.network.preinstall("peer0.org1.example.com", &chaincode);
        harness.network.preinstall("peer1.org1.example.com", &chaincode);

        let report = harness.run().await;

        assert!(report.is_success(), "{:?}", report.failure);
        assert!(report.install.as_ref().unwrap().skipped);
        assert!(harness.network.installs().is_empty());
    }

    #[tokio::test]
    async fn test_failed_instantiate_still_closes_channel() {
        let harness = Harness::new();
        harness
            .network
            .failed_instantiate("peer0.org1.example.com", "chaincode init failed");

        let report = harness.run().await;

        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.step, BootstrapStep::Instantiate);
        let instantiate = report.instantiate.as_ref().unwrap();
        assert_eq!(instantiate.successful, 1);
        assert_eq!(instantiate.failed[0].reason, "chaincode init failed");
        assert_eq!(report.channel.as_ref().unwrap().state, ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_events_captured_during_run() {
        let harness = Harness::new();
        let chaincode = InstallRequest::from_config(&harness.config).chaincode;
        // Committed before the run; the channel does not exist yet so the block number is 0.
        harness.network.emit_event("foo", &chaincode, "event", b"!");

        let report = harness.run().await;

        assert!(report.is_success());
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].event.event_name, "event");
        assert_eq!(report.events[0].event.payload, b"!".to_vec());
        assert!(harness
            .network
            .calls()
            .iter()
            .any(|c| c.operation() == NetworkOperation::Instantiate));
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let harness = Harness::new();
        let report = harness.run().await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["enrollments"][0]["status"], "enrolled");
        assert_eq!(json["channel"]["name"], "foo");
        assert_eq!(json["install"]["stage"], "install");
        assert!(json["failure"].is_null());
    }
}
