//! Test utilities and helpers for ledgerforge
//!
//! Thin wrappers over [`crate::adapters::memory::fixtures`] that panic on I/O
//! errors, plus shortcuts to an enrolled organization and a ready channel.

use crate::adapters::memory::fixtures;
use crate::adapters::memory::MemoryNetwork;
use crate::channel::{Channel, ChannelBuilder};
use crate::config::NetworkConfig;
use crate::endpoint::DirectEndpointFactory;
use crate::identity::{
    Credential, Identity, IdentityDirectory, ROLE_ADMIN, ROLE_CHANNEL_ADMIN, ROLE_CLIENT,
};
use crate::org::{CaEndpoint, NodeKind, Organization};
use std::path::Path;
use tempfile::TempDir;

pub fn write_admin_credentials(crypto_root: &Path, domain: &str, key_files: usize) {
    fixtures::write_admin_msp(crypto_root, domain, key_files).unwrap();
}

pub fn write_tls_material(crypto_root: &Path, kind: NodeKind, node: &str) {
    fixtures::write_tls_material(crypto_root, kind, node).unwrap();
}

pub fn write_channel_artifact(resources: &Path, channel: &str) {
    fixtures::write_channel_artifact(resources, channel).unwrap();
}

/// Two-organization one-of policy at `<resources>/<file>`
pub fn write_policy(resources: &Path, file: &str) {
    fixtures::write_endorsement_policy(&resources.join(file), &["Org1MSP", "Org2MSP"]).unwrap();
}

/// Organization `name` from `config` with every identity slot filled
pub fn enrolled_organization(config: &NetworkConfig, name: &str) -> Organization {
    let org_config = config.organization(name).unwrap();
    let mut org = Organization::new(
        &org_config.name,
        &org_config.msp_id,
        &org_config.domain_name,
        CaEndpoint {
            name: org_config.ca_name.clone(),
            location: org_config.ca_location.clone(),
            properties: org_config.ca_properties.clone(),
        },
    );
    for peer in org_config.peers().unwrap() {
        org.add_peer(peer.name, peer.address).unwrap();
    }
    for orderer in org_config.orderers().unwrap() {
        org.add_orderer(orderer.name, orderer.address).unwrap();
    }

    let msp_id = org_config.msp_id.clone();
    let identity = |name: String, key: u8| {
        Identity::new(name, &msp_id, Credential::new(vec![key; 32], "CERT"))
    };

    let mut users = IdentityDirectory::new();
    users
        .insert(identity("user1".to_string(), 3).with_role(ROLE_CLIENT))
        .unwrap();
    org.attach_enrollment(
        identity("admin".to_string(), 1).with_role(ROLE_ADMIN),
        users,
        identity(format!("{}Admin", name), 2)
            .with_role(ROLE_ADMIN)
            .with_role(ROLE_CHANNEL_ADMIN),
    )
    .unwrap();
    org
}

/// Default configuration rooted in a provisioned temporary directory
pub struct NetworkFixture {
    pub dir: TempDir,
    pub config: NetworkConfig,
}

impl NetworkFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NetworkConfig::default();
        config.paths.crypto_config = dir.path().join("crypto-config");
        config.paths.resources = dir.path().to_path_buf();
        fixtures::provision(&config).unwrap();
        Self { dir, config }
    }
}

/// `peerOrg1` enrolled and channel `foo` constructed on `network`
pub async fn ready_channel(
    config: &NetworkConfig,
    network: &MemoryNetwork,
) -> (Organization, Channel) {
    let org = enrolled_organization(config, "peerOrg1");
    let construction = ChannelBuilder::new(config, &DirectEndpointFactory, network)
        .construct(&org)
        .await
        .unwrap();
    (org, construction.channel)
}
