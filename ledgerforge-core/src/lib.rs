//! Permissioned-ledger network bootstrap
//!
//! Enrolls organization identities against their certificate authorities,
//! constructs a channel, installs and instantiates chaincode and reports
//! what happened. Network access goes through the traits in [`ca`],
//! [`endpoint`] and [`channel`]; [`adapters::memory`] implements all of them
//! in process.

pub mod adapters;
pub mod bootstrap;
pub mod ca;
pub mod chaincode;
pub mod channel;
pub mod config;
pub mod endpoint;
pub mod enrollment;
pub mod error;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod org;
pub mod proposal;

#[cfg(test)]
mod test_utils;

pub use bootstrap::{NetworkBootstrap, NetworkServices, RunReport};
pub use config::NetworkConfig;
pub use error::{BootstrapError, BootstrapResult};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let config = NetworkConfig::default();
        assert_eq!(config.channel.name, "foo");
    }
}
