//! Endorsement policy documents
//!
//! ```yaml
//! identities:
//!   - user1: {"role": {"name": "member", "mspId": "Org1MSP"}}
//!   - user2: {"role": {"name": "member", "mspId": "Org2MSP"}}
//! policy:
//!   1-of:
//!     - signed-by: "user1"
//!     - signed-by: "user2"
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Policy errors
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read policy file: {0}")]
    FileReadError(String),

    #[error("Failed to parse policy document: {0}")]
    ParseError(String),

    #[error("Identity {0} declared twice")]
    DuplicateIdentity(String),

    #[error("Unknown role {0}; expected member, admin, client or peer")]
    UnknownRole(String),

    #[error("signed-by references undeclared identity {0}")]
    UndeclaredIdentity(String),

    #[error("Invalid policy rule: {0}")]
    InvalidRule(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MspRole {
    Member,
    Admin,
    Client,
    Peer,
}

impl MspRole {
    fn parse(name: &str) -> Result<Self, PolicyError> {
        match name {
            "member" => Ok(MspRole::Member),
            "admin" => Ok(MspRole::Admin),
            "client" => Ok(MspRole::Client),
            "peer" => Ok(MspRole::Peer),
            other => Err(PolicyError::UnknownRole(other.to_string())),
        }
    }
}

/// A principal a rule can require a signature from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyIdentity {
    pub role: MspRole,
    pub msp_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    SignedBy(String),
    /// At least `required` of `rules` must be satisfied
    OutOf { required: usize, rules: Vec<PolicyRule> },
}

impl PolicyRule {
    fn parse(value: &Value) -> Result<Self, PolicyError> {
        let mapping = value
            .as_mapping()
            .ok_or_else(|| PolicyError::InvalidRule("rule must be a mapping".to_string()))?;
        let (key, body) = single_entry(mapping)?;

        if key == "signed-by" {
            let name = body.as_str().ok_or_else(|| {
                PolicyError::InvalidRule("signed-by takes an identity name".to_string())
            })?;
            return Ok(PolicyRule::SignedBy(name.to_string()));
        }

        let required = key
            .strip_suffix("-of")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| PolicyError::InvalidRule(format!("unknown rule {}", key)))?;
        let rules = body
            .as_sequence()
            .ok_or_else(|| PolicyError::InvalidRule(format!("{} takes a list of rules", key)))?
            .iter()
            .map(PolicyRule::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if rules.is_empty() {
            return Err(PolicyError::InvalidRule(format!("{} has no rules", key)));
        }
        if required == 0 {
            return Err(PolicyError::InvalidRule(format!(
                "{} is satisfied without any signature",
                key
            )));
        }
        if required > rules.len() {
            return Err(PolicyError::InvalidRule(format!(
                "{} requires more rules than the {} given",
                key,
                rules.len()
            )));
        }
        Ok(PolicyRule::OutOf { required, rules })
    }

    fn signers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PolicyRule::SignedBy(name) => out.push(name),
            PolicyRule::OutOf { rules, .. } => rules.iter().for_each(|r| r.signers(out)),
        }
    }
}

fn single_entry(mapping: &Mapping) -> Result<(&str, &Value), PolicyError> {
    let mut entries = mapping.iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => key
            .as_str()
            .map(|k| (k, value))
            .ok_or_else(|| PolicyError::InvalidRule("rule key must be a string".to_string())),
        _ => Err(PolicyError::InvalidRule("rule must have exactly one key".to_string())),
    }
}

#[derive(Deserialize)]
struct PolicyDocument {
    identities: Vec<BTreeMap<String, IdentityDocument>>,
    policy: Value,
}

#[derive(Deserialize)]
struct IdentityDocument {
    role: RoleDocument,
}

#[derive(Deserialize)]
struct RoleDocument {
    name: String,
    #[serde(rename = "mspId")]
    msp_id: String,
}

/// Parsed and checked endorsement policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndorsementPolicy {
    identities: BTreeMap<String, PolicyIdentity>,
    rule: PolicyRule,
}

impl EndorsementPolicy {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| PolicyError::FileReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument =
            serde_yaml::from_str(contents).map_err(|e| PolicyError::ParseError(e.to_string()))?;

        let mut identities = BTreeMap::new();
        for entry in document.identities {
            for (name, identity) in entry {
                let parsed = PolicyIdentity {
                    role: MspRole::parse(&identity.role.name)?,
                    msp_id: identity.role.msp_id,
                };
                if identities.insert(name.clone(), parsed).is_some() {
                    return Err(PolicyError::DuplicateIdentity(name));
                }
            }
        }

        let rule = PolicyRule::parse(&document.policy)?;
        let mut signers = Vec::new();
        rule.signers(&mut signers);
        if let Some(missing) = signers.iter().find(|s| !identities.contains_key(**s)) {
            return Err(PolicyError::UndeclaredIdentity(missing.to_string()));
        }

        Ok(Self { identities, rule })
    }

    pub fn identities(&self) -> &BTreeMap<String, PolicyIdentity> {
        &self.identities
    }

    pub fn rule(&self) -> &PolicyRule {
        &self.rule
    }

    /// MSP ids referenced by any declared identity, deduplicated
    pub fn msp_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.identities.values().map(|i| i.msp_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
