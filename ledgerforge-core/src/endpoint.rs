//! Peer and orderer endpoint handles
//!
//! Each handle carries a [`ConnectionProfile`] computed from the node name and
//! the crypto-config tree. With TLS enabled, the node's server certificate and
//! a client certificate/key pair must all exist on disk:
//!
//! ```text
//! <crypto>/<kind>Organizations/<domain>/<kind>s/<node>/tls/server.crt
//! <crypto>/ordererOrganizations/<domain>/users/Admin@<domain>/tls/client.{crt,key}
//! <crypto>/peerOrganizations/<domain>/users/User1@<domain>/tls/client.{crt,key}
//! ```
//!
//! where `<domain>` is the node name after its first `.`.

use crate::config::NetworkConfig;
use crate::org::{NodeEndpoint, NodeKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Peers accept responses up to this many bytes
pub const PEER_MAX_INBOUND_MESSAGE_SIZE: usize = 9_000_000;

/// Endpoint errors
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Missing TLS material for {node} at {}", .path.display())]
    MissingTlsMaterial { node: String, path: PathBuf },

    #[error("Node name {0} has no domain part")]
    NoDomain(String),

    #[error("Invalid address {address} for {node}: {reason}")]
    InvalidAddress {
        node: String,
        address: String,
        reason: String,
    },
}

/// TLS files and session options for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsMaterial {
    pub server_certificate: PathBuf,
    pub client_certificate: PathBuf,
    pub client_key: PathBuf,
    pub hostname_override: String,
    pub ssl_provider: String,
    pub negotiation_type: String,
}

/// Connection keep-alive timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeepAlive {
    pub time: Duration,
    pub timeout: Duration,
    pub without_calls: bool,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            time: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(8),
            without_calls: true,
        }
    }
}

/// Everything needed to open a connection to one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionProfile {
    pub tls: Option<TlsMaterial>,
    pub keep_alive: Option<KeepAlive>,
    pub max_inbound_message_size: Option<usize>,
}

impl ConnectionProfile {
    pub fn for_peer(name: &str, config: &NetworkConfig) -> Result<Self, EndpointError> {
        Ok(Self {
            tls: tls_material(NodeKind::Peer, name, config)?,
            keep_alive: None,
            max_inbound_message_size: Some(PEER_MAX_INBOUND_MESSAGE_SIZE),
        })
    }

    pub fn for_orderer(name: &str, config: &NetworkConfig) -> Result<Self, EndpointError> {
        Ok(Self {
            tls: tls_material(NodeKind::Orderer, name, config)?,
            keep_alive: Some(KeepAlive::default()),
            max_inbound_message_size: None,
        })
    }
}

/// Domain part of a node name: `peer0.org1.example.com` → `org1.example.com`
pub fn node_domain(name: &str) -> Result<&str, EndpointError> {
    match name.split_once('.') {
        Some((_, domain)) if !domain.is_empty() => Ok(domain),
        _ => Err(EndpointError::NoDomain(name.to_string())),
    }
}

fn tls_material(
    kind: NodeKind,
    name: &str,
    config: &NetworkConfig,
) -> Result<Option<TlsMaterial>, EndpointError> {
    if !config.tls.enabled {
        return Ok(None);
    }

    let root = &config.paths.crypto_config;
    let domain = node_domain(name)?;
    let org_dir = root
        .join(format!("{}Organizations", kind.as_str()))
        .join(domain);

    let server_certificate = org_dir
        .join(format!("{}s", kind.as_str()))
        .join(name)
        .join("tls")
        .join("server.crt");

    let client_user = match kind {
        NodeKind::Orderer => format!("Admin@{}", domain),
        NodeKind::Peer => format!("User1@{}", domain),
    };
    let client_dir = org_dir.join("users").join(client_user).join("tls");
    let client_certificate = client_dir.join("client.crt");
    let client_key = client_dir.join("client.key");

    for path in [&server_certificate, &client_certificate, &client_key] {
        require_file(name, path)?;
    }

    Ok(Some(TlsMaterial {
        server_certificate,
        client_certificate,
        client_key,
        hostname_override: name.to_string(),
        ssl_provider: config.tls.ssl_provider.clone(),
        negotiation_type: config.tls.negotiation_type.clone(),
    }))
}

fn require_file(node: &str, path: &Path) -> Result<(), EndpointError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EndpointError::MissingTlsMaterial {
            node: node.to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// Address to dial: `grpc://` becomes `grpcs://` when TLS is enabled
pub fn effective_address(address: &str, tls_enabled: bool) -> String {
    match address.strip_prefix("grpc://") {
        Some(rest) if tls_enabled => format!("grpcs://{}", rest),
        _ => address.to_string(),
    }
}

/// Opened peer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerHandle {
    pub name: String,
    pub address: String,
    pub profile: ConnectionProfile,
}

/// Opened orderer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrdererHandle {
    pub name: String,
    pub address: String,
    pub profile: ConnectionProfile,
}

impl OrdererHandle {
    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint::new(&self.name, &self.address)
    }
}

/// Creates endpoint handles from a name, address and profile
pub trait EndpointFactory: Send + Sync {
    fn new_peer(
        &self,
        name: &str,
        address: &str,
        profile: ConnectionProfile,
    ) -> Result<PeerHandle, EndpointError>;

    fn new_orderer(
        &self,
        name: &str,
        address: &str,
        profile: ConnectionProfile,
    ) -> Result<OrdererHandle, EndpointError>;
}

/// Factory that checks the address scheme and wraps the inputs as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectEndpointFactory;

impl DirectEndpointFactory {
    fn check_address(name: &str, address: &str) -> Result<(), EndpointError> {
        let invalid = |reason: &str| EndpointError::InvalidAddress {
            node: name.to_string(),
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let rest = if let Some(rest) = address.strip_prefix("grpcs://") {
            rest
        } else if let Some(rest) = address.strip_prefix("grpc://") {
            rest
        } else {
            return Err(invalid("expected grpc:// or grpcs:// scheme"));
        };

        let (host, port) = rest.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
        Ok(())
    }
}

impl EndpointFactory for DirectEndpointFactory {
    fn new_peer(
        &self,
        name: &str,
        address: &str,
        profile: ConnectionProfile,
    ) -> Result<PeerHandle, EndpointError> {
        Self::check_address(name, address)?;
        Ok(PeerHandle {
            name: name.to_string(),
            address: address.to_string(),
            profile,
        })
    }

    fn new_orderer(
        &self,
        name: &str,
        address: &str,
        profile: ConnectionProfile,
    ) -> Result<OrdererHandle, EndpointError> {
        Self::check_address(name, address)?;
        Ok(OrdererHandle {
            name: name.to_string(),
            address: address.to_string(),
            profile,
        })
    }
}
