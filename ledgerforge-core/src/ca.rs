//! Certificate authority collaborator
//!
//! The registration/enrollment protocol itself lives behind [`CaClient`];
//! this crate only sequences the calls.

use crate::identity::{Credential, Identity};
use crate::org::CaEndpoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// CA errors
#[derive(Debug, Error)]
pub enum CaError {
    #[error("CA unreachable: {0}")]
    Unreachable(String),

    #[error("Registration of {name} rejected: {reason}")]
    RegistrationRejected { name: String, reason: String },

    #[error("Enrollment of {name} rejected: {reason}")]
    EnrollmentRejected { name: String, reason: String },
}

/// Metadata returned by the CA liveness check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaInfo {
    pub ca_name: String,
    pub version: String,
}

/// Request to register a subordinate identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub enrollment_id: String,
    pub affiliation: String,
}

impl RegistrationRequest {
    pub fn new(enrollment_id: impl Into<String>, affiliation: impl Into<String>) -> Self {
        Self {
            enrollment_id: enrollment_id.into(),
            affiliation: affiliation.into(),
        }
    }
}

/// Client for one CA instance
#[async_trait]
pub trait CaClient: Send + Sync {
    /// Fetch CA metadata; doubles as the liveness check
    async fn info(&self) -> Result<CaInfo, CaError>;

    /// Register `request` under `registrar`, returning the enrollment secret
    async fn register(
        &self,
        request: &RegistrationRequest,
        registrar: &Identity,
    ) -> Result<String, CaError>;

    /// Exchange an enrollment id and secret for signed credential material
    async fn enroll(&self, enrollment_id: &str, secret: &str) -> Result<Credential, CaError>;
}

/// Opens a [`CaClient`] for an organization's CA endpoint
pub trait CaConnector: Send + Sync {
    fn connect(&self, endpoint: &CaEndpoint) -> Result<Arc<dyn CaClient>, CaError>;
}
