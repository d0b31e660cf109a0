use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledgerforge_core::adapters::memory::{fixtures, MemoryCaConnector, MemoryNetwork};
use ledgerforge_core::endpoint::DirectEndpointFactory;
use ledgerforge_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use ledgerforge_core::org::OrganizationRegistry;
use ledgerforge_core::{metrics, NetworkBootstrap, NetworkConfig, NetworkServices};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ledgerforge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); defaults to the config file's
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Enable JSON formatted logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a network configuration and print the organizations it declares
    Validate {
        /// TOML file, or a `.properties` file
        #[arg(short, long)]
        config: String,
    },

    /// Run a full bootstrap against the in-memory network and print the report
    Simulate {
        #[arg(short, long)]
        config: String,

        /// Directory holding the pre-provisioned crypto material
        #[arg(long)]
        credentials: Option<String>,

        /// Write synthetic credentials and artifacts before running
        #[arg(long)]
        provision: bool,
    },
}

fn expand(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).with_context(|| format!("cannot expand {}", path))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn load_config(path: &str) -> Result<NetworkConfig> {
    let path = expand(path)?;
    let mut config = if path.extension().map_or(false, |ext| ext == "properties") {
        NetworkConfig::from_properties_file(&path)
    } else {
        NetworkConfig::from_file(&path)
    }
    .with_context(|| format!("failed to load {}", path.display()))?;

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn init_logging(args: &Args, config: &NetworkConfig) -> Result<()> {
    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = args.log_level {
        log_config.level = level;
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;
    Ok(())
}

fn validate(config: &NetworkConfig) -> Result<()> {
    let registry = OrganizationRegistry::from_config(config)?;
    let organizations: Vec<_> = registry
        .iter()
        .map(|org| {
            json!({
                "name": org.name(),
                "msp_id": org.msp_id(),
                "domain": org.domain_name(),
                "ca": org.ca().location,
                "peers": org.peers().iter().map(|p| &p.name).collect::<Vec<_>>(),
                "orderers": org.orderers().iter().map(|o| &o.name).collect::<Vec<_>>(),
            })
        })
        .collect();

    let summary = json!({
        "channel": config.channel.name,
        "channel_organization": config.channel.organization,
        "organizations": organizations,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn simulate(
    mut config: NetworkConfig,
    credentials: Option<String>,
    provision: bool,
) -> Result<()> {
    if let Some(dir) = credentials {
        config.paths.crypto_config = expand(&dir)?;
    }
    if provision {
        fixtures::provision(&config).context("failed to provision network material")?;
    }

    metrics::init_metrics();
    let services = NetworkServices {
        ca: Arc::new(MemoryCaConnector::new()),
        endpoints: Arc::new(DirectEndpointFactory),
        transport: Arc::new(MemoryNetwork::new()),
    };

    let report = NetworkBootstrap::new(&config, services).run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(failure) = &report.failure {
        bail!("bootstrap failed during {}: {}", failure.step.as_str(), failure.error);
    }
    if !report.is_success() {
        bail!("bootstrap completed with enrollment failures");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.command {
        Command::Validate { config } | Command::Simulate { config, .. } => config.clone(),
    };
    let config = load_config(&config_path)?;
    init_logging(&args, &config)?;

    info!(config = %config_path, "ledgerforge started");

    match args.command {
        Command::Validate { .. } => validate(&config)?,
        Command::Simulate {
            credentials,
            provision,
            ..
        } => simulate(config, credentials, provision).await?,
    }

    info!("ledgerforge finished");
    Ok(())
}
