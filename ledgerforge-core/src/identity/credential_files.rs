//! Pre-provisioned administrator credentials on disk
//!
//! Layout, relative to the crypto-config root:
//!
//! ```text
//! peerOrganizations/<domain>/users/Admin@<domain>/msp/
//!     keystore/<anything>_sk
//!     signcerts/Admin@<domain>-cert.pem
//! ```
//!
//! The keystore must hold exactly one `_sk` file. Anything else is a fatal
//! configuration error for the organization.

use super::IdentityError;
use rustls_pki_types::{pem::PemObject, PrivateKeyDer};
use std::fs;
use std::path::{Path, PathBuf};

/// File name suffix marking a private key in a keystore directory
pub const PRIVATE_KEY_SUFFIX: &str = "_sk";

/// Key and certificate loaded for a locally-issued administrator
#[derive(Debug)]
pub struct AdminMaterial {
    /// DER bytes decoded from the PEM key file
    pub private_key: Vec<u8>,
    pub certificate: String,
    pub key_path: PathBuf,
    pub certificate_path: PathBuf,
}

/// Directory holding the administrator MSP for `domain`
pub fn admin_msp_dir(crypto_root: &Path, domain: &str) -> PathBuf {
    crypto_root
        .join("peerOrganizations")
        .join(domain)
        .join("users")
        .join(format!("Admin@{}", domain))
        .join("msp")
}

/// Locate the single `_sk` file in `dir`
pub fn find_private_key_file(dir: &Path) -> Result<PathBuf, IdentityError> {
    let entries = fs::read_dir(dir).map_err(|e| IdentityError::MissingCredentialFile {
        path: dir.to_path_buf(),
        reason: format!("keystore directory unreadable: {}", e),
    })?;

    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && entry.file_name().to_string_lossy().ends_with(PRIVATE_KEY_SUFFIX) {
            matches.push(path);
        }
    }

    if matches.len() != 1 {
        return Err(IdentityError::MissingCredentialFile {
            path: dir.to_path_buf(),
            reason: format!(
                "expected exactly 1 {} file but found {}",
                PRIVATE_KEY_SUFFIX,
                matches.len()
            ),
        });
    }

    Ok(matches.remove(0))
}

/// Decode the first PEM private key (PKCS#8, SEC1 or PKCS#1) into its DER body
pub fn decode_pem_private_key(pem: &str) -> Result<Vec<u8>, IdentityError> {
    let key = PrivateKeyDer::from_pem_slice(pem.as_bytes())
        .map_err(|e| IdentityError::InvalidPem(format!("{:?}", e)))?;
    Ok(key.secret_der().to_vec())
}

/// Load the administrator key and certificate for `domain`
pub fn load_admin_material(
    crypto_root: &Path,
    domain: &str,
) -> Result<AdminMaterial, IdentityError> {
    let msp = admin_msp_dir(crypto_root, domain);

    let certificate_path = msp
        .join("signcerts")
        .join(format!("Admin@{}-cert.pem", domain));
    if !certificate_path.is_file() {
        return Err(IdentityError::MissingCredentialFile {
            path: certificate_path,
            reason: "certificate file not found".to_string(),
        });
    }
    let certificate = fs::read_to_string(&certificate_path)?;

    let key_path = find_private_key_file(&msp.join("keystore"))?;
    let private_key = decode_pem_private_key(&fs::read_to_string(&key_path)?)?;

    Ok(AdminMaterial {
        private_key,
        certificate,
        key_path,
        certificate_path,
    })
}
