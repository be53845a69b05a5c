//! provisionr CLI - drive pool specs against the in-memory cloud

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use provisionr::cloud::InMemoryCloud;
use provisionr::image::{ImageTable, EBS_TYPE, INSTANCE_STORE_TYPE};
use provisionr::models::{options, PoolSpec};
use provisionr::providers::{AmazonProvisionr, CloudStackProvisionr, AMAZON_ID, CLOUDSTACK_ID};
use provisionr::{Error, PoolState, Provisionr, ProvisionrConfig, Result};

#[derive(Parser)]
#[command(name = "provisionr")]
#[command(about = "Declarative compute pool provisioning")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pool spec and print it normalised
    Validate {
        #[arg(long)]
        spec: PathBuf,
    },
    /// List images from the built-in table
    Images {
        #[arg(long, default_value = options::DEFAULT_REGION)]
        region: String,
        #[arg(long, default_value = options::DEFAULT_BASE_OPERATING_SYSTEM_VERSION)]
        version: String,
    },
    /// Run a pool through its whole lifecycle against the in-memory cloud
    Run {
        #[arg(long)]
        spec: PathBuf,
        /// Business key of the pool
        #[arg(long)]
        key: String,
        /// Override the provider id in the spec (amazon or cloudstack)
        #[arg(long)]
        provider: Option<String>,
        /// Seconds to keep the pool READY before terminating it
        #[arg(long, default_value = "0")]
        hold_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ProvisionrConfig::from_json_file(path)?,
        None => ProvisionrConfig::default(),
    };

    match cli.command {
        Commands::Validate { spec } => cmd_validate(&spec),
        Commands::Images { region, version } => cmd_images(&region, &version),
        Commands::Run {
            spec,
            key,
            provider,
            hold_secs,
        } => cmd_run(config, &spec, &key, provider.as_deref(), Duration::from_secs(hold_secs)).await,
    }
}

fn load_spec(path: &Path) -> Result<PoolSpec> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn cmd_validate(path: &Path) -> Result<()> {
    let spec = load_spec(path)?;
    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(())
}

fn cmd_images(region: &str, version: &str) -> Result<()> {
    let table = ImageTable::builtin()?;
    let query = table
        .query()
        .filter_by(options::REGION, region)
        .filter_by("version", version);

    println!("{:<12} {:<10} {:<16} {}", "REGION", "VERSION", "DEVICE", "IMAGE");
    println!("{}", "-".repeat(56));
    for device in [EBS_TYPE, INSTANCE_STORE_TYPE] {
        for image in query.clone().filter_by("type", device).results()? {
            println!("{:<12} {:<10} {:<16} {}", region, version, device, image);
        }
    }
    Ok(())
}

async fn cmd_run(
    config: ProvisionrConfig,
    path: &Path,
    key: &str,
    provider_id: Option<&str>,
    hold: Duration,
) -> Result<()> {
    let mut spec = load_spec(path)?;
    if let Some(id) = provider_id {
        let provider = spec.provider().to_builder().id(id).build()?;
        spec = spec.to_builder().provider(provider).build()?;
    }

    let cloud = InMemoryCloud::new().with_boot_after(2);
    let facade: Arc<dyn Provisionr> = match spec.provider().id.as_str() {
        AMAZON_ID => Arc::new(AmazonProvisionr::new(config, cloud.factory())?),
        CLOUDSTACK_ID => Arc::new(CloudStackProvisionr::new(config, cloud.factory())?),
        other => return Err(Error::Config(format!("unknown provider {}", other))),
    };

    let process_id = facade.start_pool_management_process(key, spec)?;
    println!("Started {} for pool {}", process_id, key);

    let status = watch(facade.as_ref(), key, |s| s == PoolState::Ready.as_str() || is_terminal(s)).await?;
    if status == PoolState::Ready.as_str() {
        let pool = facade.get_pool_instance(key)?;
        println!("Pool {} ready with {} machines", key, pool.machines.len());
        if !hold.is_zero() {
            tokio::time::sleep(hold).await;
        }
        facade.trigger_pool_management_process_termination(key)?;
        watch(facade.as_ref(), key, is_terminal).await?;
    }

    let pool = facade.get_pool_instance(key)?;
    println!("{}", serde_json::to_string_pretty(&pool)?);
    println!("Instances still alive: {}", cloud.live_instances());
    Ok(())
}

fn is_terminal(status: &str) -> bool {
    status == PoolState::Terminated.as_str() || status == PoolState::Failed.as_str()
}

/// Print every status change until `done` accepts one
async fn watch(facade: &dyn Provisionr, key: &str, done: impl Fn(&str) -> bool) -> Result<String> {
    let mut last = String::new();
    loop {
        let status = facade.get_pool_instance(key)?.status;
        if status != last {
            println!("  {} -> {}", key, status);
            last = status;
        }
        if done(&last) {
            return Ok(last);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
