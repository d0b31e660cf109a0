//! Organization topology: domain, MSP, CA endpoint, peers, orderers and the
//! identities attached by enrollment.

mod registry;

pub use registry::OrganizationRegistry;

use crate::identity::{Identity, IdentityDirectory, IdentityError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Node kinds addressable inside an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Peer,
    Orderer,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Peer => "peer",
            NodeKind::Orderer => "orderer",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named network address (`peer0.org1.example.com` → `grpc://host:7051`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub name: String,
    pub address: String,
}

impl NodeEndpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Where and how to reach an organization's certificate authority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaEndpoint {
    /// CA instance name; `None` addresses the server's default CA
    pub name: Option<String>,
    pub location: String,
    pub properties: BTreeMap<String, String>,
}

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Organization not found: {0}")]
    UnknownOrganization(String),

    #[error("Organization already registered: {0}")]
    DuplicateOrganization(String),

    #[error("Duplicate {kind} {name} in organization {org}")]
    DuplicateNode {
        org: String,
        kind: NodeKind,
        name: String,
    },

    #[error("Unknown {kind} {name} in organization {org}")]
    UnknownNode {
        org: String,
        kind: NodeKind,
        name: String,
    },
}

/// An administrative unit owning peers, orderers, an identity domain and a CA
#[derive(Debug)]
pub struct Organization {
    name: String,
    msp_id: String,
    domain_name: String,
    ca: CaEndpoint,
    peers: Vec<NodeEndpoint>,
    orderers: Vec<NodeEndpoint>,
    node_admin: Option<Identity>,
    channel_admin: Option<Identity>,
    users: IdentityDirectory,
}

impl Organization {
    pub fn new(
        name: impl Into<String>,
        msp_id: impl Into<String>,
        domain_name: impl Into<String>,
        ca: CaEndpoint,
    ) -> Self {
        Self {
            name: name.into(),
            msp_id: msp_id.into(),
            domain_name: domain_name.into(),
            ca,
            peers: Vec::new(),
            orderers: Vec::new(),
            node_admin: None,
            channel_admin: None,
            users: IdentityDirectory::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    pub fn ca(&self) -> &CaEndpoint {
        &self.ca
    }

    pub fn add_peer(
        &mut self,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let endpoint = NodeEndpoint::new(name, address);
        Self::push_unique(&self.name, NodeKind::Peer, &mut self.peers, endpoint)
    }

    pub fn add_orderer(
        &mut self,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let endpoint = NodeEndpoint::new(name, address);
        Self::push_unique(&self.name, NodeKind::Orderer, &mut self.orderers, endpoint)
    }

    fn push_unique(
        org: &str,
        kind: NodeKind,
        nodes: &mut Vec<NodeEndpoint>,
        endpoint: NodeEndpoint,
    ) -> Result<(), RegistryError> {
        if nodes.iter().any(|n| n.name == endpoint.name) {
            return Err(RegistryError::DuplicateNode {
                org: org.to_string(),
                kind,
                name: endpoint.name,
            });
        }
        nodes.push(endpoint);
        Ok(())
    }

    /// Peers in configuration order
    pub fn peers(&self) -> &[NodeEndpoint] {
        &self.peers
    }

    /// Orderers in configuration order
    pub fn orderers(&self) -> &[NodeEndpoint] {
        &self.orderers
    }

    pub fn peer_location(&self, name: &str) -> Result<&str, RegistryError> {
        self.location(NodeKind::Peer, name)
    }

    pub fn orderer_location(&self, name: &str) -> Result<&str, RegistryError> {
        self.location(NodeKind::Orderer, name)
    }

    fn location(&self, kind: NodeKind, name: &str) -> Result<&str, RegistryError> {
        let nodes = match kind {
            NodeKind::Peer => &self.peers,
            NodeKind::Orderer => &self.orderers,
        };
        nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.address.as_str())
            .ok_or_else(|| RegistryError::UnknownNode {
                org: self.name.clone(),
                kind,
                name: name.to_string(),
            })
    }

    /// CA-enrolled administrator, signer for node-level operations
    pub fn node_admin(&self) -> Option<&Identity> {
        self.node_admin.as_ref()
    }

    /// Pre-provisioned administrator that signs channel configuration
    pub fn channel_admin(&self) -> Option<&Identity> {
        self.channel_admin.as_ref()
    }

    pub fn users(&self) -> &IdentityDirectory {
        &self.users
    }

    pub fn user(&self, name: &str) -> Option<&Identity> {
        self.users.get(name)
    }

    /// Attach a whole enrollment, which is written at most once
    ///
    /// Identity state is written by enrollment only.
    pub(crate) fn attach_enrollment(
        &mut self,
        node_admin: Identity,
        users: IdentityDirectory,
        channel_admin: Identity,
    ) -> Result<(), IdentityError> {
        let occupied = [&self.node_admin, &self.channel_admin];
        if let Some(existing) = occupied.into_iter().flatten().next() {
            return Err(IdentityError::DuplicateIdentity(existing.name().to_string()));
        }

        self.node_admin = Some(node_admin);
        self.channel_admin = Some(channel_admin);
        self.users = users;
        Ok(())
    }
}
