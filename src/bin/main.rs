//! azbatch-pool CLI - create a Batch pool if needed and wait for its nodes

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use azbatch_pool::config::DEFAULT_CONFIG_FILE;
use azbatch_pool::{
    build_pool_spec, BatchAccount, ControllerConfig, Error, OsType, PoolController, RemoteError,
    RestBatchClient, Result, Settings,
};
use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(name = "azbatch-pool")]
#[command(about = "Create an Azure Batch pool if it does not exist and wait for its nodes")]
#[command(version)]
struct Cli {
    /// Name of the pool
    #[arg(short, long = "pool", default_value = "testpool")]
    pool_id: String,

    /// Operating system of the pool nodes
    #[arg(long, value_enum, default_value = "linux")]
    os_type: OsArg,

    /// Size of the pool's virtual machines
    #[arg(long, default_value = "standard_a1_v2")]
    vm_size: String,

    /// Configuration files, later ones override earlier ones
    #[arg(short, long = "config", default_value = DEFAULT_CONFIG_FILE)]
    configs: Vec<PathBuf>,

    /// Seconds between readiness polls
    #[arg(long, default_value = "10")]
    poll_interval_secs: u64,

    /// Seconds to wait for nodes after creating the pool
    #[arg(long, default_value = "1200")]
    ready_timeout_secs: u64,

    /// Seconds allowed for each Batch service call
    #[arg(long, default_value = "60")]
    call_timeout_secs: u64,

    /// Print the pool creation body and exit without contacting the service
    #[arg(long)]
    dry_run: bool,

    /// Print the loaded configuration (secrets masked) before running
    #[arg(long)]
    print_config: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OsArg {
    Linux,
    Windows,
}

impl From<OsArg> for OsType {
    fn from(arg: OsArg) -> Self {
        match arg {
            OsArg::Linux => OsType::Linux,
            OsArg::Windows => OsType::Windows,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("azbatch_pool=info".parse().expect("static directive")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load_all(&cli.configs)?;

    if cli.print_config {
        print_configuration(&settings)?;
    }

    let os_type = OsType::from(cli.os_type);
    let spec = build_pool_spec(&settings, &cli.pool_id, os_type, &cli.vm_size)?;

    if cli.dry_run {
        println!("{}", serde_json::to_string_pretty(&spec)?);
        return Ok(());
    }

    let account = BatchAccount::from_config(&settings)?;
    let call_timeout = Duration::from_secs(cli.call_timeout_secs);
    let client = RestBatchClient::with_timeout(&account, call_timeout)?;

    let config = ControllerConfig::default()
        .call_timeout(call_timeout)
        .poll_interval(Duration::from_secs(cli.poll_interval_secs))
        .ready_timeout(Duration::from_secs(cli.ready_timeout_secs));

    tracing::info!(account = %account.name, pool = %cli.pool_id, os = %os_type, "Ensuring pool");
    let handle = PoolController::with_config(client, config)
        .ensure_pool(&cli.pool_id, spec)
        .await?;

    println!("{}", serde_json::to_string_pretty(&handle)?);
    Ok(())
}

fn print_configuration(settings: &Settings) -> Result<()> {
    println!("----------------------");
    println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
    println!("----------------------");
    Ok(())
}

fn report(error: &Error) {
    eprintln!("-------------------------------------------");
    eprintln!("Error: {}", error);
    if let Some(remote) = error.remote() {
        print_remote_error(remote);
    }
    eprintln!("-------------------------------------------");
}

fn print_remote_error(remote: &RemoteError) {
    if let Some(message) = &remote.message {
        eprintln!("{}", message);
    }
    if !remote.values.is_empty() {
        eprintln!();
        for (key, value) in &remote.values {
            eprintln!("{}:\t{}", key, value);
        }
    }
}
