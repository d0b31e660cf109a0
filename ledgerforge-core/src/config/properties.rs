//! Flat `key = value` property surface
//!
//! Organizations are described by keys of the form
//! `ledgerforge.org.<org>.<field>`:
//!
//! ```text
//! ledgerforge.org.peerOrg1.mspid = Org1MSP
//! ledgerforge.org.peerOrg1.domname = org1.example.com
//! ledgerforge.org.peerOrg1.ca_location = http://localhost:7054
//! ledgerforge.org.peerOrg1.caName = ca0
//! ledgerforge.org.peerOrg1.peer_locations = peer0.org1.example.com@grpc://localhost:7051, peer1.org1.example.com@grpc://localhost:7056
//! ledgerforge.org.peerOrg1.orderer_locations = orderer.example.com@grpc://localhost:7050
//! ```
//!
//! Wait times use `ledgerforge.ProposalWaitTime` / `ledgerforge.DeployWaitTime`
//! in milliseconds.

use super::{ConfigError, OrganizationConfig};
use crate::org::NodeEndpoint;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

pub const ORG_PREFIX: &str = "ledgerforge.org.";
pub const PROPOSAL_WAIT_KEY: &str = "ledgerforge.ProposalWaitTime";
pub const DEPLOY_WAIT_KEY: &str = "ledgerforge.DeployWaitTime";

/// Parse `name@address` pairs separated by commas
pub fn parse_node_locations(raw: &str) -> Result<Vec<NodeEndpoint>, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::MalformedNodeLocation {
            entry: raw.to_string(),
            reason: "empty node list".to_string(),
        });
    }

    raw.split(',')
        .map(str::trim)
        .map(|entry| {
            let (name, address) =
                entry
                    .split_once('@')
                    .ok_or_else(|| ConfigError::MalformedNodeLocation {
                        entry: entry.to_string(),
                        reason: "expected name@address".to_string(),
                    })?;
            let (name, address) = (name.trim(), address.trim());
            if name.is_empty() || address.is_empty() {
                return Err(ConfigError::MalformedNodeLocation {
                    entry: entry.to_string(),
                    reason: "name and address must be non-empty".to_string(),
                });
            }
            Ok(NodeEndpoint::new(name, address))
        })
        .collect()
}

/// Split property text into an ordered key/value table
pub fn parse_property_lines(text: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut table = BTreeMap::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let split = line
            .find(|c| c == '=' || c == ':')
            .ok_or_else(|| {
                ConfigError::ParseError(format!("line {}: expected key = value", index + 1))
            })?;
        let key = line[..split].trim();
        let value = line[split + 1..].trim();
        if key.is_empty() {
            return Err(ConfigError::ParseError(format!("line {}: empty key", index + 1)));
        }
        table.insert(key.to_string(), value.to_string());
    }

    Ok(table)
}

/// Organizations declared under [`ORG_PREFIX`], in name order
pub fn organizations_from_properties(
    table: &BTreeMap<String, String>,
) -> Result<Vec<OrganizationConfig>, ConfigError> {
    let mut fields: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();

    for (key, value) in table {
        let Some(rest) = key.strip_prefix(ORG_PREFIX) else {
            continue;
        };
        let Some((org, field)) = rest.rsplit_once('.') else {
            return Err(ConfigError::ParseError(format!("property {} names no field", key)));
        };
        fields.entry(org).or_default().insert(field, value.as_str());
    }

    fields
        .into_iter()
        .map(|(org, values)| {
            let require = |field: &str| {
                values
                    .get(field)
                    .map(|v| v.to_string())
                    .ok_or_else(|| {
                        ConfigError::MissingValue(format!("{}{}.{}", ORG_PREFIX, org, field))
                    })
            };

            for field in values.keys() {
                if !matches!(
                    *field,
                    "mspid"
                        | "domname"
                        | "ca_location"
                        | "caName"
                        | "peer_locations"
                        | "orderer_locations"
                ) {
                    warn!(org = %org, field = %field, "Ignoring unknown organization property");
                }
            }

            let config = OrganizationConfig {
                name: org.to_string(),
                msp_id: require("mspid")?,
                domain_name: require("domname")?,
                ca_location: require("ca_location")?,
                ca_name: values.get("caName").map(|v| v.to_string()).filter(|v| !v.is_empty()),
                ca_properties: BTreeMap::new(),
                peer_locations: require("peer_locations")?,
                orderer_locations: require("orderer_locations")?,
            };
            parse_node_locations(&config.peer_locations)?;
            parse_node_locations(&config.orderer_locations)?;
            Ok(config)
        })
        .collect()
}

/// Millisecond wait time, if present
pub fn wait_time(
    table: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    table
        .get(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
        })
        .transpose()
}
