//! Synthetic on-disk material for the memory network
//!
//! Writes everything a run reads from disk: administrator MSP directories,
//! TLS files for every peer and orderer, the channel configuration artifact,
//! the endorsement policy and the chaincode source directories. Key and
//! certificate bodies are random bytes in PEM envelopes.

use crate::config::NetworkConfig;
use crate::endpoint::node_domain;
use crate::identity::{credential_files::admin_msp_dir, PRIVATE_KEY_SUFFIX};
use crate::org::NodeKind;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

fn random_bytes() -> Vec<u8> {
    Sha256::digest(Uuid::new_v4().as_bytes()).to_vec()
}

fn pem(label: &str, body: &[u8]) -> String {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        STANDARD.encode(body),
        label = label
    )
}

/// Administrator MSP for `domain` holding `key_files` private keys
pub fn write_admin_msp(crypto_root: &Path, domain: &str, key_files: usize) -> io::Result<PathBuf> {
    let msp = admin_msp_dir(crypto_root, domain);
    let keystore = msp.join("keystore");
    let signcerts = msp.join("signcerts");
    fs::create_dir_all(&keystore)?;
    fs::create_dir_all(&signcerts)?;

    fs::write(
        signcerts.join(format!("Admin@{}-cert.pem", domain)),
        pem("CERTIFICATE", format!("CN=Admin@{}", domain).as_bytes()),
    )?;
    for _ in 0..key_files {
        let key = random_bytes();
        let file = format!("{}{}", hex::encode(&key[..8]), PRIVATE_KEY_SUFFIX);
        fs::write(keystore.join(file), pem("PRIVATE KEY", &key))?;
    }
    Ok(msp)
}

/// Server certificate for `node` plus the client pair its connections use
pub fn write_tls_material(crypto_root: &Path, kind: NodeKind, node: &str) -> io::Result<()> {
    let domain =
        node_domain(node).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let org_dir = crypto_root
        .join(format!("{}Organizations", kind.as_str()))
        .join(domain);

    let server = org_dir
        .join(format!("{}s", kind.as_str()))
        .join(node)
        .join("tls");
    fs::create_dir_all(&server)?;
    fs::write(server.join("server.crt"), pem("CERTIFICATE", node.as_bytes()))?;

    let client_user = match kind {
        NodeKind::Orderer => format!("Admin@{}", domain),
        NodeKind::Peer => format!("User1@{}", domain),
    };
    let client = org_dir.join("users").join(client_user).join("tls");
    fs::create_dir_all(&client)?;
    fs::write(client.join("client.crt"), pem("CERTIFICATE", b"client"))?;
    fs::write(client.join("client.key"), pem("PRIVATE KEY", &random_bytes()))?;
    Ok(())
}

/// `<resources>/<channel>.tx`
pub fn write_channel_artifact(resources: &Path, channel: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(resources)?;
    let path = resources.join(format!("{}.tx", channel));
    let mut body = vec![0x0a, channel.len() as u8];
    body.extend_from_slice(channel.as_bytes());
    body.extend_from_slice(&random_bytes());
    fs::write(&path, body)?;
    Ok(path)
}

/// One-of policy with one member identity per MSP id
pub fn write_endorsement_policy(path: &Path, msp_ids: &[&str]) -> io::Result<()> {
    let mut yaml = String::from("identities:\n");
    for (i, msp_id) in msp_ids.iter().enumerate() {
        yaml.push_str(&format!(
            "  - user{}: {{\"role\": {{\"name\": \"member\", \"mspId\": \"{}\"}}}}\n",
            i + 1,
            msp_id
        ));
    }
    yaml.push_str("policy:\n  1-of:\n");
    for i in 0..msp_ids.len() {
        yaml.push_str(&format!("    - signed-by: \"user{}\"\n", i + 1));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, yaml)
}

/// Write every file a run of `config` reads
pub fn provision(config: &NetworkConfig) -> io::Result<()> {
    let crypto = &config.paths.crypto_config;

    for org in &config.organizations {
        write_admin_msp(crypto, &org.domain_name, 1)?;
        for peer in org.peers().map_err(invalid)? {
            write_tls_material(crypto, NodeKind::Peer, &peer.name)?;
        }
        for orderer in org.orderers().map_err(invalid)? {
            write_tls_material(crypto, NodeKind::Orderer, &orderer.name)?;
        }
    }

    write_channel_artifact(&config.paths.resources, &config.channel.name)?;

    let msp_ids: Vec<&str> = config.organizations.iter().map(|o| o.msp_id.as_str()).collect();
    write_endorsement_policy(&config.paths.resource(&config.chaincode.policy_file), &msp_ids)?;

    fs::create_dir_all(config.paths.resource(&config.chaincode.source))?;
    if let Some(meta_inf) = &config.chaincode.meta_inf {
        fs::create_dir_all(config.paths.resource(meta_inf))?;
    }

    info!(
        crypto_config = %crypto.display(),
        resources = %config.paths.resources.display(),
        organizations = config.organizations.len(),
        "Provisioned synthetic network material"
    );
    Ok(())
}

fn invalid(e: crate::config::ConfigError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
}
