//! Configuration management for ledgerforge
//!
//! A [`NetworkConfig`] is built once at startup (from TOML, from the flat
//! property surface, or from defaults plus environment overrides) and passed
//! by reference into every orchestration step. There is no process-wide
//! configuration instance; "resetting" configuration is constructing a new one.

use crate::chaincode::ChaincodeLanguage;
use crate::org::NodeEndpoint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
pub mod properties;

pub use error::ConfigError;
pub use properties::parse_node_locations;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network call ceilings
    pub timeouts: TimeoutConfig,

    /// Filesystem locations of artifacts and crypto material
    pub paths: PathConfig,

    /// Endpoint TLS settings
    pub tls: TlsConfig,

    /// Identities to enroll per organization
    pub enrollment: EnrollmentConfig,

    /// Channel to construct
    pub channel: ChannelConfig,

    /// Chaincode package to deploy
    pub chaincode: ChaincodeConfig,

    /// Lifecycle staging options
    pub lifecycle: LifecycleConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Organization topology
    pub organizations: Vec<OrganizationConfig>,
}

/// Per-call wait ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// CA metadata request; exceeding it is fatal for the organization
    #[serde(with = "humantime_serde")]
    pub ca_liveness: Duration,

    /// Each CA registration or enrollment; exceeding it fails the organization
    #[serde(with = "humantime_serde")]
    pub ca_request: Duration,

    /// Channel creation on the signing orderer; exceeding it is fatal for the channel
    #[serde(with = "humantime_serde")]
    pub channel_configuration: Duration,

    /// Install and instantiate proposals
    #[serde(with = "humantime_serde")]
    pub proposal_wait: Duration,

    /// Peer join, orderer attach and channel initialization
    #[serde(with = "humantime_serde")]
    pub deploy_wait: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root of the generated crypto-config tree
    pub crypto_config: PathBuf,

    /// Directory holding `<channel>.tx`, the chaincode source and policy documents
    pub resources: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Require TLS material for every endpoint
    pub enabled: bool,
    pub ssl_provider: String,
    pub negotiation_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    /// Bootstrap administrator known to every CA
    pub admin_name: String,
    pub admin_secret: String,

    /// Affiliation path members are registered under
    pub affiliation: String,

    /// Member users registered and enrolled per organization
    pub members: Vec<String>,

    /// Name for the pre-provisioned channel administrator; defaults to `<org>Admin`
    pub channel_admin_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,

    /// Organization whose peers and orderers form the channel
    pub organization: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaincodeConfig {
    pub name: String,
    pub version: String,
    pub path: String,
    pub language: ChaincodeLanguage,

    /// Source directory, relative to `paths.resources`
    pub source: PathBuf,

    /// Optional META-INF directory, relative to `paths.resources`
    pub meta_inf: Option<PathBuf>,

    pub init_function: String,
    pub init_args: Vec<String>,

    /// Added to the last initialization argument when it is an integer
    pub args_delta: i64,

    /// Side-channel metadata sent with instantiation, not written to the ledger
    pub transient: BTreeMap<String, String>,

    /// Endorsement policy document, relative to `paths.resources`
    pub policy_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Send install proposals; `false` assumes the package is already on the peers
    pub install: bool,

    /// Successful install responses required before instantiation
    pub min_install_successes: usize,

    /// Keep a chaincode event listener registered for the run
    pub capture_events: bool,
    pub event_channel_pattern: String,
    pub event_name_pattern: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,
}

/// One organization as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationConfig {
    pub name: String,
    pub msp_id: String,
    pub domain_name: String,
    pub ca_location: String,
    #[serde(default)]
    pub ca_name: Option<String>,
    #[serde(default)]
    pub ca_properties: BTreeMap<String, String>,

    /// `name@address` pairs, comma separated
    pub peer_locations: String,
    pub orderer_locations: String,
}

impl OrganizationConfig {
    pub fn peers(&self) -> Result<Vec<NodeEndpoint>, ConfigError> {
        parse_node_locations(&self.peer_locations)
    }

    pub fn orderers(&self) -> Result<Vec<NodeEndpoint>, ConfigError> {
        parse_node_locations(&self.orderer_locations)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            paths: PathConfig::default(),
            tls: TlsConfig::default(),
            enrollment: EnrollmentConfig::default(),
            channel: ChannelConfig::default(),
            chaincode: ChaincodeConfig::default(),
            lifecycle: LifecycleConfig::default(),
            logging: LoggingConfig::default(),
            organizations: vec![
                sample_organization("peerOrg1", "Org1MSP", "org1.example.com", 7, Some("ca0")),
                sample_organization("peerOrg2", "Org2MSP", "org2.example.com", 8, None),
            ],
        }
    }
}

fn sample_organization(
    name: &str,
    msp_id: &str,
    domain: &str,
    port_prefix: u16,
    ca_name: Option<&str>,
) -> OrganizationConfig {
    OrganizationConfig {
        name: name.to_string(),
        msp_id: msp_id.to_string(),
        domain_name: domain.to_string(),
        ca_location: format!("http://localhost:{}054", port_prefix),
        ca_name: ca_name.map(str::to_string),
        ca_properties: BTreeMap::new(),
        peer_locations: format!(
            "peer0.{d}@grpc://localhost:{p}051, peer1.{d}@grpc://localhost:{p}056",
            d = domain,
            p = port_prefix
        ),
        orderer_locations: "orderer.example.com@grpc://localhost:7050".to_string(),
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ca_liveness: Duration::from_secs(10),
            ca_request: Duration::from_secs(30),
            channel_configuration: Duration::from_secs(30),
            proposal_wait: Duration::from_millis(120_000),
            deploy_wait: Duration::from_millis(120_000),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            crypto_config: PathBuf::from("./resources/crypto-config"),
            resources: PathBuf::from("./resources"),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ssl_provider: "openSSL".to_string(),
            negotiation_type: "TLS".to_string(),
        }
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            admin_name: "admin".to_string(),
            admin_secret: "adminpw".to_string(),
            affiliation: "org1.department1".to_string(),
            members: vec!["user1".to_string()],
            channel_admin_name: None,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "foo".to_string(),
            organization: "peerOrg1".to_string(),
        }
    }
}

impl Default for ChaincodeConfig {
    fn default() -> Self {
        let mut transient = BTreeMap::new();
        transient.insert("ledgerforge".to_string(), "InstantiateProposalRequest".to_string());
        transient.insert("method".to_string(), "InstantiateProposalRequest".to_string());

        Self {
            name: "example_cc_go".to_string(),
            version: "1".to_string(),
            path: "github.com/example_cc".to_string(),
            language: ChaincodeLanguage::Go,
            source: PathBuf::from("chaincode/sample1"),
            meta_inf: Some(PathBuf::from("meta-infs/end2endit")),
            init_function: "init".to_string(),
            init_args: ["a", "500", "b", "200"].iter().map(|s| s.to_string()).collect(),
            args_delta: 0,
            transient,
            policy_file: PathBuf::from("chaincodeendorsementpolicy.yaml"),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            install: true,
            min_install_successes: 1,
            capture_events: true,
            event_channel_pattern: ".*".to_string(),
            event_name_pattern: "event".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl ChaincodeConfig {
    /// Initialization arguments with `args_delta` applied to the last one
    ///
    /// A last argument that is not an integer, or that would overflow, is
    /// left unchanged; [`NetworkConfig::validate`] rejects the overflow.
    pub fn resolved_init_args(&self) -> Vec<String> {
        let mut args = self.init_args.clone();
        if self.args_delta != 0 {
            if let Some(last) = args.last_mut() {
                if let Some(value) = last
                    .parse::<i64>()
                    .ok()
                    .and_then(|v| v.checked_add(self.args_delta))
                {
                    *last = value.to_string();
                }
            }
        }
        args
    }
}

impl PathConfig {
    /// `resources/<channel>.tx`
    pub fn channel_artifact(&self, channel: &str) -> PathBuf {
        self.resources.join(format!("{}.tx", channel))
    }

    pub fn resource(&self, relative: &Path) -> PathBuf {
        self.resources.join(relative)
    }
}

impl NetworkConfig {
    /// Defaults plus `LEDGERFORGE_*` environment overrides
    ///
    /// Example: LEDGERFORGE_CHANNEL_NAME=bar
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEDGERFORGE_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_with(|key| env::var(key).ok())
    }

    /// Apply overrides resolved through `lookup`
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("LEDGERFORGE_CRYPTO_CONFIG") {
            self.paths.crypto_config = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("LEDGERFORGE_RESOURCES") {
            self.paths.resources = PathBuf::from(dir);
        }
        if let Some(name) = lookup("LEDGERFORGE_CHANNEL_NAME") {
            self.channel.name = name;
        }
        if let Some(org) = lookup("LEDGERFORGE_CHANNEL_ORG") {
            self.channel.organization = org;
        }
        if let Some(ms) = lookup("LEDGERFORGE_PROPOSAL_WAIT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid proposal wait: {}", e)))?;
            self.timeouts.proposal_wait = Duration::from_millis(ms);
        }
        if let Some(enabled) = lookup("LEDGERFORGE_TLS_ENABLED") {
            self.tls.enabled = enabled
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid TLS flag: {}", e)))?;
        }
        if let Some(install) = lookup("LEDGERFORGE_INSTALL") {
            self.lifecycle.install = install
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid install flag: {}", e)))?;
        }
        if let Some(level) = lookup("LEDGERFORGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("LEDGERFORGE_LOG_JSON") {
            self.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load organizations and wait times from a property file
    pub fn from_properties_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_properties_str(&contents)
    }

    /// Defaults with organizations and wait times taken from property text
    pub fn from_properties_str(contents: &str) -> Result<Self, ConfigError> {
        let table = properties::parse_property_lines(contents)?;

        let mut config = Self {
            organizations: properties::organizations_from_properties(&table)?,
            ..Self::default()
        };
        if let Some(wait) = properties::wait_time(&table, properties::PROPOSAL_WAIT_KEY)? {
            config.timeouts.proposal_wait = wait;
        }
        if let Some(wait) = properties::wait_time(&table, properties::DEPLOY_WAIT_KEY)? {
            config.timeouts.deploy_wait = wait;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn organization(&self, name: &str) -> Option<&OrganizationConfig> {
        self.organizations.iter().find(|o| o.name == name)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.organizations.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one organization must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for org in &self.organizations {
            if !seen.insert(org.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "organization {} declared twice",
                    org.name
                )));
            }
            if org.msp_id.is_empty() || org.domain_name.is_empty() || org.ca_location.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "organization {} needs msp_id, domain_name and ca_location",
                    org.name
                )));
            }
            org.peers()?;
            org.orderers()?;
        }

        if self.channel.name.is_empty() {
            return Err(ConfigError::ValidationFailed("channel name must not be empty".to_string()));
        }
        if self.organization(&self.channel.organization).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "channel organization {} is not configured",
                self.channel.organization
            )));
        }

        let timeouts = [
            ("ca_liveness", self.timeouts.ca_liveness),
            ("ca_request", self.timeouts.ca_request),
            ("channel_configuration", self.timeouts.channel_configuration),
            ("proposal_wait", self.timeouts.proposal_wait),
            ("deploy_wait", self.timeouts.deploy_wait),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.enrollment.admin_name.is_empty() {
            return Err(ConfigError::ValidationFailed("admin_name must not be empty".to_string()));
        }

        if self.chaincode.name.is_empty() || self.chaincode.version.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "chaincode name and version must not be empty".to_string(),
            ));
        }

        if self.chaincode.args_delta != 0 {
            let last = self.chaincode.init_args.last().map(|a| a.parse::<i64>());
            if let Some(Ok(value)) = last {
                if value.checked_add(self.chaincode.args_delta).is_none() {
                    return Err(ConfigError::InvalidValue(format!(
                        "args_delta {} overflows the last init argument {}",
                        self.chaincode.args_delta, value
                    )));
                }
            }
        }

        if self.lifecycle.min_install_successes == 0 {
            return Err(ConfigError::ValidationFailed(
                "min_install_successes must be greater than 0".to_string(),
            ));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.proposal_wait, Duration::from_millis(120_000));
        assert_eq!(config.organizations.len(), 2);
    }

    #[test]
    fn test_config_validation() {
        let mut config = NetworkConfig::default();
        config.channel.organization = "peerOrg9".to_string();
        assert!(config.validate().is_err());

        config = NetworkConfig::default();
        config.timeouts.proposal_wait = Duration::ZERO;
        assert!(config.validate().is_err());

        config = NetworkConfig::default();
        config.organizations[0].peer_locations = "peer0-without-address".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MalformedNodeLocation { .. })
        ));

        config = NetworkConfig::default();
        config.organizations.push(config.organizations[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = NetworkConfig::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_of_partial_file() {
        let toml = r#"
            [timeouts]
            proposal_wait = "5s"

            [channel]
            name = "bar"
            organization = "peerOrg1"

            [[organizations]]
            name = "peerOrg1"
            msp_id = "Org1MSP"
            domain_name = "org1.example.com"
            ca_location = "http://localhost:7054"
            peer_locations = "peer0.org1.example.com@grpc://localhost:7051"
            orderer_locations = "orderer.example.com@grpc://localhost:7050"
        "#;

        let config = NetworkConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.timeouts.proposal_wait, Duration::from_secs(5));
        assert_eq!(config.timeouts.deploy_wait, Duration::from_millis(120_000));
        assert_eq!(config.channel.name, "bar");
        assert_eq!(config.organizations.len(), 1);
        assert_eq!(config.chaincode.name, "example_cc_go");
    }

    #[test]
    fn test_from_properties() {
        let text = "\
ledgerforge.ProposalWaitTime = 60000
ledgerforge.org.peerOrg1.mspid = Org1MSP
ledgerforge.org.peerOrg1.domname = org1.example.com
ledgerforge.org.peerOrg1.ca_location = http://localhost:7054
ledgerforge.org.peerOrg1.peer_locations = peer0.org1.example.com@grpc://localhost:7051
ledgerforge.org.peerOrg1.orderer_locations = orderer.example.com@grpc://localhost:7050
";
        let config = NetworkConfig::from_properties_str(text).unwrap();
        assert_eq!(config.timeouts.proposal_wait, Duration::from_millis(60_000));
        assert_eq!(config.organizations.len(), 1);
        assert!(config.organizations[0].ca_name.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LEDGERFORGE_CHANNEL_NAME", "bar"),
            ("LEDGERFORGE_PROPOSAL_WAIT_MS", "1500"),
            ("LEDGERFORGE_TLS_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = NetworkConfig::default();
        config
            .apply_overrides_with(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.channel.name, "bar");
        assert_eq!(config.timeouts.proposal_wait, Duration::from_millis(1500));
        assert!(!config.tls.enabled);

        let mut config = NetworkConfig::default();
        let result = config.apply_overrides_with(|key| {
            (key == "LEDGERFORGE_INSTALL").then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_resolved_init_args() {
        let mut chaincode = ChaincodeConfig::default();
        assert_eq!(chaincode.resolved_init_args(), vec!["a", "500", "b", "200"]);

        chaincode.args_delta = 7;
        assert_eq!(chaincode.resolved_init_args(), vec!["a", "500", "b", "207"]);
    }

    #[test]
    fn test_overflowing_args_delta_rejected() {
        let mut config = NetworkConfig::default();
        config.chaincode.init_args = vec!["a".to_string(), i64::MAX.to_string()];
        config.chaincode.args_delta = 1;

        assert_eq!(
            config.chaincode.resolved_init_args(),
            vec!["a".to_string(), i64::MAX.to_string()]
        );
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        config.chaincode.args_delta = -1;
        assert!(config.validate().is_ok());
        assert_eq!(config.chaincode.resolved_init_args()[1], (i64::MAX - 1).to_string());
    }

    #[test]
    fn test_zero_ca_request_timeout_rejected() {
        let mut config = NetworkConfig::default();
        config.timeouts.ca_request = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
