//! Top-level error type for a bootstrap run

use crate::ca::CaError;
use crate::chaincode::{ChaincodeError, PolicyError};
use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::endpoint::EndpointError;
use crate::enrollment::EnrollmentError;
use crate::org::RegistryError;
use thiserror::Error;

/// Result type for bootstrap operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Enrollment error: {0}")]
    Enrollment(#[from] EnrollmentError),

    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Chaincode error: {0}")]
    Chaincode(#[from] ChaincodeError),

    #[error("Endorsement policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Organization {org} is unavailable for channel construction: {reason}")]
    OrganizationUnavailable { org: String, reason: String },
}
