//! Organization registry built once from configuration

use super::{CaEndpoint, Organization, RegistryError};
use crate::config::{ConfigError, NetworkConfig};
use crate::error::BootstrapError;
use std::collections::BTreeMap;
use tracing::debug;

/// All organizations of the network, keyed by name
#[derive(Debug, Default)]
pub struct OrganizationRegistry {
    orgs: BTreeMap<String, Organization>,
}

impl OrganizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured organization with its peers and orderers
    pub fn from_config(config: &NetworkConfig) -> Result<Self, BootstrapError> {
        let mut registry = Self::new();

        for org_config in &config.organizations {
            let ca = CaEndpoint {
                name: org_config.ca_name.clone(),
                location: org_config.ca_location.clone(),
                properties: org_config.ca_properties.clone(),
            };
            let mut org = Organization::new(
                &org_config.name,
                &org_config.msp_id,
                &org_config.domain_name,
                ca,
            );

            for peer in org_config.peers().map_err(BootstrapError::from)? {
                org.add_peer(peer.name, peer.address)?;
            }
            for orderer in org_config.orderers().map_err(BootstrapError::from)? {
                org.add_orderer(orderer.name, orderer.address)?;
            }

            debug!(
                org = %org.name(),
                peers = org.peers().len(),
                orderers = org.orderers().len(),
                "Registered organization"
            );
            registry.insert(org)?;
        }

        if registry.is_empty() {
            return Err(
                ConfigError::ValidationFailed("no organizations configured".to_string()).into(),
            );
        }

        Ok(registry)
    }

    pub fn insert(&mut self, org: Organization) -> Result<(), RegistryError> {
        if self.orgs.contains_key(org.name()) {
            return Err(RegistryError::DuplicateOrganization(org.name().to_string()));
        }
        self.orgs.insert(org.name().to_string(), org);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Organization, RegistryError> {
        self.orgs
            .get(name)
            .ok_or_else(|| RegistryError::UnknownOrganization(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Organization, RegistryError> {
        self.orgs
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownOrganization(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Organization> {
        self.orgs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Organization> {
        self.orgs.values_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.orgs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.orgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orgs.is_empty()
    }
}
