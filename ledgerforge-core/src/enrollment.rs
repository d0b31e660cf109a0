//! Enrollment Coordinator
//!
//! Produces every identity an organization needs before any channel work:
//!
//! 1. CA liveness (`info`), bounded by `timeouts.ca_liveness`
//! 2. bootstrap administrator enrollment → node administrator
//! 3. register + enroll each configured member → member users
//! 4. pre-provisioned key/certificate files → channel administrator
//!
//! Every `register` and `enroll` call is bounded by `timeouts.ca_request`.
//! Identities are attached to the [`Organization`] only once every step has
//! succeeded; a failed enrollment leaves it untouched. This is the only
//! component that writes identity state into an organization.

use crate::ca::{CaClient, CaError, RegistrationRequest};
use crate::config::NetworkConfig;
use crate::identity::{
    load_admin_material, Credential, Identity, IdentityDirectory, IdentityError, ROLE_ADMIN,
    ROLE_CHANNEL_ADMIN, ROLE_CLIENT,
};
use crate::metrics;
use crate::org::Organization;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Result type for enrollment operations
pub type EnrollmentResult<T> = Result<T, EnrollmentError>;

/// Enrollment errors
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("CA for organization {org} unreachable: {reason}")]
    CaUnreachable { org: String, reason: String },

    #[error("Registration of {name} rejected: {reason}")]
    RegistrationRejected { name: String, reason: String },

    #[error("Enrollment of {name} rejected: {reason}")]
    EnrollmentRejected { name: String, reason: String },

    #[error("Missing credential file at {}: {reason}", .path.display())]
    MissingCredentialFile { path: PathBuf, reason: String },

    #[error("Identity {0} is already enrolled")]
    DuplicateIdentity(String),

    #[error("Invalid credential material: {0}")]
    InvalidCredential(String),
}

impl From<IdentityError> for EnrollmentError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::DuplicateIdentity(name) => EnrollmentError::DuplicateIdentity(name),
            IdentityError::MissingCredentialFile { path, reason } => {
                EnrollmentError::MissingCredentialFile { path, reason }
            }
            other => EnrollmentError::InvalidCredential(other.to_string()),
        }
    }
}

impl EnrollmentError {
    fn from_ca(org: &str, e: CaError) -> Self {
        match e {
            CaError::Unreachable(reason) => EnrollmentError::CaUnreachable {
                org: org.to_string(),
                reason,
            },
            CaError::RegistrationRejected { name, reason } => {
                EnrollmentError::RegistrationRejected { name, reason }
            }
            CaError::EnrollmentRejected { name, reason } => {
                EnrollmentError::EnrollmentRejected { name, reason }
            }
        }
    }
}

/// Names of the identities attached to one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentSummary {
    pub org: String,
    pub ca_name: String,
    pub node_admin: String,
    pub members: Vec<String>,
    pub channel_admin: String,
}

/// Drives the CA protocol for one organization at a time
pub struct EnrollmentCoordinator<'a> {
    config: &'a NetworkConfig,
}

impl<'a> EnrollmentCoordinator<'a> {
    pub fn new(config: &'a NetworkConfig) -> Self {
        Self { config }
    }

    /// Enroll the node administrator, the configured members and the channel
    /// administrator of `org`
    pub async fn enroll_organization(
        &self,
        org: &mut Organization,
        ca: &dyn CaClient,
    ) -> EnrollmentResult<EnrollmentSummary> {
        let org_name = org.name().to_string();
        if let Some(admin) = org.node_admin() {
            return Err(EnrollmentError::DuplicateIdentity(admin.name().to_string()));
        }
        info!(org = %org_name, "Enrolling organization identities");

        let ca_info = timeout(self.config.timeouts.ca_liveness, ca.info())
            .await
            .map_err(|_| EnrollmentError::CaUnreachable {
                org: org_name.clone(),
                reason: format!("no CA info within {:?}", self.config.timeouts.ca_liveness),
            })?
            .map_err(|e| EnrollmentError::from_ca(&org_name, e))?;
        debug!(org = %org_name, ca = %ca_info.ca_name, version = %ca_info.version, "CA reachable");

        let enrollment = &self.config.enrollment;
        let admin_enroll = ca.enroll(&enrollment.admin_name, &enrollment.admin_secret);
        let admin_credential = self
            .ca_call(&org_name, admin_enroll, |reason| EnrollmentError::EnrollmentRejected {
                name: enrollment.admin_name.clone(),
                reason,
            })
            .await?;
        let admin = Identity::new(&enrollment.admin_name, org.msp_id(), admin_credential)
            .with_role(ROLE_ADMIN);

        let mut users = IdentityDirectory::new();
        for member in &enrollment.members {
            let identity = self.enroll_member(org, ca, &admin, member).await?;
            users.insert(identity)?;
        }
        let members: Vec<String> = enrollment.members.clone();

        let channel_admin = self.materialize_channel_admin(org)?;
        let channel_admin_name = channel_admin.name().to_string();

        let attached = 2 + users.len();
        org.attach_enrollment(admin, users, channel_admin)?;
        for _ in 0..attached {
            metrics::record_identity_enrolled(&org_name);
        }

        info!(
            org = %org_name,
            members = members.len(),
            channel_admin = %channel_admin_name,
            "Organization enrolled"
        );

        Ok(EnrollmentSummary {
            org: org_name,
            ca_name: ca_info.ca_name,
            node_admin: enrollment.admin_name.clone(),
            members,
            channel_admin: channel_admin_name,
        })
    }

    /// Await one CA call under `timeouts.ca_request`
    async fn ca_call<T, F>(
        &self,
        org: &str,
        call: F,
        timed_out: impl FnOnce(String) -> EnrollmentError,
    ) -> EnrollmentResult<T>
    where
        F: Future<Output = Result<T, CaError>>,
    {
        let ceiling = self.config.timeouts.ca_request;
        match timeout(ceiling, call).await {
            Ok(result) => result.map_err(|e| EnrollmentError::from_ca(org, e)),
            Err(_) => {
                warn!(org = %org, ceiling = ?ceiling, "CA request timed out");
                Err(timed_out(format!("CA request timed out after {:?}", ceiling)))
            }
        }
    }

    async fn enroll_member(
        &self,
        org: &Organization,
        ca: &dyn CaClient,
        registrar: &Identity,
        name: &str,
    ) -> EnrollmentResult<Identity> {
        let affiliation = &self.config.enrollment.affiliation;
        let request = RegistrationRequest::new(name, affiliation);
        let secret = self
            .ca_call(org.name(), ca.register(&request, registrar), |reason| {
                EnrollmentError::RegistrationRejected {
                    name: name.to_string(),
                    reason,
                }
            })
            .await?;
        let credential = self
            .ca_call(org.name(), ca.enroll(name, &secret), |reason| {
                EnrollmentError::EnrollmentRejected {
                    name: name.to_string(),
                    reason,
                }
            })
            .await?;

        debug!(org = %org.name(), user = %name, affiliation = %affiliation, "Member enrolled");

        Ok(Identity::new(name, org.msp_id(), credential)
            .with_role(ROLE_CLIENT)
            .with_affiliation(affiliation))
    }

    /// Build the channel administrator from pre-provisioned files
    fn materialize_channel_admin(&self, org: &Organization) -> EnrollmentResult<Identity> {
        let material = load_admin_material(&self.config.paths.crypto_config, org.domain_name())
            .map_err(|e| {
                warn!(
                    org = %org.name(),
                    error = %e,
                    "Pre-provisioned admin credentials unavailable"
                );
                EnrollmentError::from(e)
            })?;

        let name = self
            .config
            .enrollment
            .channel_admin_name
            .clone()
            .unwrap_or_else(|| format!("{}Admin", org.name()));

        debug!(
            org = %org.name(),
            key = %material.key_path.display(),
            certificate = %material.certificate_path.display(),
            "Loaded pre-provisioned admin credentials"
        );

        Ok(Identity::new(
            name,
            org.msp_id(),
            Credential::new(material.private_key, material.certificate),
        )
        .with_role(ROLE_ADMIN)
        .with_role(ROLE_CHANNEL_ADMIN))
    }
}
