//! Enrolled identities and their credential material
//!
//! An [`Identity`] is the signing context every network call runs under. Its
//! [`Credential`] is fixed at construction: there is no setter, and neither
//! type is `Clone`, so a credential is owned by exactly one identity for its
//! whole lifetime. Consumers borrow identities, they never copy them.

pub mod credential_files;
mod directory;

pub use credential_files::{
    decode_pem_private_key, find_private_key_file, load_admin_material, AdminMaterial,
    PRIVATE_KEY_SUFFIX,
};
pub use directory::IdentityDirectory;

use secrecy::{ExposeSecret, SecretVec};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Role tag carried by organization administrators
pub const ROLE_ADMIN: &str = "admin";

/// Role tag carried by ordinary member users
pub const ROLE_CLIENT: &str = "client";

/// Role tag carried by the identity that signs channel configuration
pub const ROLE_CHANNEL_ADMIN: &str = "channel-admin";

/// Identity errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity already exists: {0}")]
    DuplicateIdentity(String),

    #[error("Missing credential file at {}: {reason}", .path.display())]
    MissingCredentialFile { path: PathBuf, reason: String },

    #[error("Invalid PEM material: {0}")]
    InvalidPem(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Signing key plus certificate issued for an identity
pub struct Credential {
    private_key: SecretVec<u8>,
    certificate: String,
}

impl Credential {
    /// Wrap key bytes (DER) and a PEM certificate
    pub fn new(private_key: Vec<u8>, certificate: impl Into<String>) -> Self {
        Self {
            private_key: SecretVec::new(private_key),
            certificate: certificate.into(),
        }
    }

    pub fn private_key(&self) -> &[u8] {
        self.private_key.expose_secret()
    }

    pub fn certificate(&self) -> &str {
        &self.certificate
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("private_key", &"[REDACTED]")
            .field("certificate_len", &self.certificate.len())
            .finish()
    }
}

/// A named, role-tagged member of an organization's trust domain
#[derive(Debug)]
pub struct Identity {
    name: String,
    roles: BTreeSet<String>,
    affiliation: Option<String>,
    msp_id: String,
    credential: Credential,
}

impl Identity {
    /// Create an identity bound to its credential
    pub fn new(name: impl Into<String>, msp_id: impl Into<String>, credential: Credential) -> Self {
        Self {
            name: name.into(),
            roles: BTreeSet::new(),
            affiliation: None,
            msp_id: msp_id.into(),
            credential,
        }
    }

    /// Add a role tag
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Set the affiliation path the identity was registered under
    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        self.affiliation = Some(affiliation.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn affiliation(&self) -> Option<&str> {
        self.affiliation.as_deref()
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}
