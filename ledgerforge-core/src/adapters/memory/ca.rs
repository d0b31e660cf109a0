//! Memory CA
//!
//! Knows one bootstrap identity (`admin` / `adminpw`). Registration hands out
//! a random secret; enrollment issues a fresh key and a certificate naming
//! the enrollment id.

use crate::ca::{CaClient, CaConnector, CaError, CaInfo, RegistrationRequest};
use crate::identity::{Credential, Identity, ROLE_ADMIN};
use crate::org::CaEndpoint;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const BOOTSTRAP_ADMIN: &str = "admin";
const BOOTSTRAP_SECRET: &str = "adminpw";

#[derive(Debug)]
struct CaState {
    reachable: bool,
    /// `register` and `enroll` never answer
    stalled: bool,
    secrets: BTreeMap<String, String>,
    registered: BTreeMap<String, String>,
}

/// Single certificate authority held in memory
#[derive(Debug)]
pub struct MemoryCa {
    ca_name: String,
    info_delay: Option<Duration>,
    state: Mutex<CaState>,
}

impl MemoryCa {
    pub fn new(ca_name: impl Into<String>) -> Self {
        let mut secrets = BTreeMap::new();
        secrets.insert(BOOTSTRAP_ADMIN.to_string(), BOOTSTRAP_SECRET.to_string());

        Self {
            ca_name: ca_name.into(),
            info_delay: None,
            state: Mutex::new(CaState {
                reachable: true,
                stalled: false,
                secrets,
                registered: BTreeMap::new(),
            }),
        }
    }

    /// Delay every liveness check by `delay`
    pub fn with_info_delay(mut self, delay: Duration) -> Self {
        self.info_delay = Some(delay);
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Keep answering `info` but never answer `register` or `enroll`
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Registered identities and their affiliations
    pub fn registered(&self) -> BTreeMap<String, String> {
        self.state().registered.clone()
    }

    fn state(&self) -> MutexGuard<'_, CaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_if_stalled(&self) {
        let stalled = self.state().stalled;
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    fn ensure_reachable(&self) -> Result<(), CaError> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(CaError::Unreachable(format!("CA {} is down", self.display_name())))
        }
    }

    fn display_name(&self) -> &str {
        if self.ca_name.is_empty() {
            "(default)"
        } else {
            &self.ca_name
        }
    }

    fn issue_certificate(&self, enrollment_id: &str) -> String {
        let body = STANDARD.encode(format!("CN={},O={}", enrollment_id, self.display_name()));
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            body
        )
    }
}

#[async_trait]
impl CaClient for MemoryCa {
    async fn info(&self) -> Result<CaInfo, CaError> {
        if let Some(delay) = self.info_delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_reachable()?;
        Ok(CaInfo {
            ca_name: self.ca_name.clone(),
            version: "1.4.0".to_string(),
        })
    }

    async fn register(
        &self,
        request: &RegistrationRequest,
        registrar: &Identity,
    ) -> Result<String, CaError> {
        self.wait_if_stalled().await;
        self.ensure_reachable()?;
        let rejected = |reason: &str| CaError::RegistrationRejected {
            name: request.enrollment_id.clone(),
            reason: reason.to_string(),
        };

        if !registrar.has_role(ROLE_ADMIN) {
            return Err(rejected("registrar is not an administrator"));
        }

        let mut state = self.state();
        if state.secrets.contains_key(&request.enrollment_id) {
            return Err(rejected("identity is already registered"));
        }

        let secret = Uuid::new_v4().simple().to_string();
        state
            .secrets
            .insert(request.enrollment_id.clone(), secret.clone());
        state
            .registered
            .insert(request.enrollment_id.clone(), request.affiliation.clone());

        debug!(
            ca = %self.display_name(),
            user = %request.enrollment_id,
            registrar = %registrar.name(),
            "Registered identity"
        );
        Ok(secret)
    }

    async fn enroll(&self, enrollment_id: &str, secret: &str) -> Result<Credential, CaError> {
        self.wait_if_stalled().await;
        self.ensure_reachable()?;

        let known = self.state().secrets.get(enrollment_id).cloned();
        match known {
            Some(expected) if expected == secret => {}
            Some(_) => {
                return Err(CaError::EnrollmentRejected {
                    name: enrollment_id.to_string(),
                    reason: "authentication failure".to_string(),
                })
            }
            None => {
                return Err(CaError::EnrollmentRejected {
                    name: enrollment_id.to_string(),
                    reason: "identity is not registered".to_string(),
                })
            }
        }

        let key = Uuid::new_v4().as_bytes().to_vec();
        Ok(Credential::new(key, self.issue_certificate(enrollment_id)))
    }
}

/// Hands out one [`MemoryCa`] per CA location
#[derive(Debug, Default)]
pub struct MemoryCaConnector {
    cas: Mutex<BTreeMap<String, Arc<MemoryCa>>>,
    unreachable: Mutex<HashSet<String>>,
}

impl MemoryCaConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connections to `location` fail
    pub fn unreachable(&self, location: impl Into<String>) {
        self.unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.into());
    }

    /// Serve `location` with `ca` instead of a fresh default CA
    pub fn insert(&self, location: impl Into<String>, ca: MemoryCa) -> Arc<MemoryCa> {
        let ca = Arc::new(ca);
        self.cas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.into(), ca.clone());
        ca
    }

    /// CA previously handed out for `location`
    pub fn ca(&self, location: &str) -> Option<Arc<MemoryCa>> {
        self.cas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location)
            .cloned()
    }
}

impl CaConnector for MemoryCaConnector {
    fn connect(&self, endpoint: &CaEndpoint) -> Result<Arc<dyn CaClient>, CaError> {
        let down = self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&endpoint.location);
        if down {
            return Err(CaError::Unreachable(format!(
                "connection refused: {}",
                endpoint.location
            )));
        }

        let mut cas = self.cas.lock().unwrap_or_else(PoisonError::into_inner);
        let ca: Arc<dyn CaClient> = cas
            .entry(endpoint.location.clone())
            .or_insert_with(|| Arc::new(MemoryCa::new(endpoint.name.clone().unwrap_or_default())))
            .clone();
        Ok(ca)
    }
}
