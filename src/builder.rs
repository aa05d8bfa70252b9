//! Builds a [`PoolSpec`] from configuration
//!
//! Each OS has its own section (`[linux]`, `[windows]`) with independent
//! image, agent SKU and node count. Instrumentation settings come from the
//! optional `[insights]` section and are handed to the start task as
//! environment variables. Nothing here touches the network.

use crate::config::ConfigSource;
use crate::models::{
    EnvironmentSetting, ImageReference, OsType, PoolSpec, StartTaskSpec, UserIdentity,
    VirtualMachineConfiguration,
};
use crate::{Error, Result};

pub const INSIGHTS_SECTION: &str = "insights";

/// Start task retries before the node is marked as failed
pub const START_TASK_MAX_RETRIES: i32 = 2;

const MAX_POOL_ID_LEN: usize = 64;

const INSIGHTS_RELEASES: &str = "https://github.com/Azure/batch-insights/releases/download";

const INSIGHTS_LINUX_BOOTSTRAP: &str =
    "wget -O - https://raw.githubusercontent.com/Azure/batch-insights/master/scripts/run-linux.sh | bash";

const INSIGHTS_WINDOWS_BOOTSTRAP: &str = "powershell.exe -NoProfile -ExecutionPolicy Bypass -Command \"iex ((New-Object System.Net.WebClient).DownloadString('https://raw.githubusercontent.com/Azure/batch-insights/master/scripts/run-windows.ps1'))\"";

/// Build the pool descriptor for `pool_id` from the section matching `os_type`.
pub fn build_pool_spec(
    config: &impl ConfigSource,
    pool_id: &str,
    os_type: OsType,
    vm_size: &str,
) -> Result<PoolSpec> {
    validate_pool_id(pool_id)?;
    if vm_size.trim().is_empty() {
        return Err(Error::Config("vm_size cannot be empty".into()));
    }

    let section = os_type.section();
    let image = ImageReference {
        publisher: config.get(section, "publisher")?,
        offer: config.get(section, "offer")?,
        sku: config.get(section, "sku")?,
        version: config.get(section, "version")?,
    };
    let node_agent_sku_id = config.get(section, "node_agent_sku_id")?;
    let target_dedicated_nodes = parse_node_count(section, &config.get(section, "target_dedicated_nodes")?)?;
    let inter_node_communication = match config.lookup(section, "inter_node_communication") {
        Some(value) => parse_bool(section, "inter_node_communication", &value)?,
        None => false,
    };

    let environment = environment_settings(config)?;
    let commands = start_commands(config, os_type, !environment.is_empty())?;

    let spec = PoolSpec {
        pool_id: pool_id.to_string(),
        os_type,
        vm_size: vm_size.to_string(),
        virtual_machine_configuration: VirtualMachineConfiguration {
            image_reference: image,
            node_agent_sku_id,
        },
        target_dedicated_nodes,
        inter_node_communication,
        start_task: StartTaskSpec {
            command_line: os_type.wrap_commands(&commands),
            environment,
            run_as: UserIdentity::pool_admin(),
            max_retry_count: START_TASK_MAX_RETRIES,
            wait_for_completion: true,
        },
    };

    tracing::debug!(
        pool = %spec.pool_id,
        os = %os_type,
        vm_size = %spec.vm_size,
        nodes = spec.target_dedicated_nodes,
        "Built pool specification"
    );
    Ok(spec)
}

/// Pool ids: 1-64 characters, ASCII alphanumerics, hyphens and underscores
pub fn validate_pool_id(pool_id: &str) -> Result<()> {
    if pool_id.is_empty() {
        return Err(Error::Config("pool id cannot be empty".into()));
    }
    if pool_id.len() > MAX_POOL_ID_LEN {
        return Err(Error::Config(format!(
            "pool id '{}' is longer than {} characters",
            pool_id, MAX_POOL_ID_LEN
        )));
    }
    if !pool_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::Config(format!(
            "pool id '{}' may only contain letters, digits, hyphens and underscores",
            pool_id
        )));
    }
    Ok(())
}

fn environment_settings(config: &impl ConfigSource) -> Result<Vec<EnvironmentSetting>> {
    if !config.has_section(INSIGHTS_SECTION) {
        return Ok(Vec::new());
    }

    let version = config.get(INSIGHTS_SECTION, "batch_insights_version")?;
    Ok(vec![
        EnvironmentSetting::new(
            "BATCH_INSIGHTS_DOWNLOAD_URL",
            format!("{}/{}/batch-insights", INSIGHTS_RELEASES, version),
        ),
        EnvironmentSetting::new(
            "APP_INSIGHTS_APP_ID",
            config.get(INSIGHTS_SECTION, "app_insights_app_id")?,
        ),
        EnvironmentSetting::new(
            "APP_INSIGHTS_INSTRUMENTATION_KEY",
            config.get(INSIGHTS_SECTION, "app_insights_instrumentation_key")?,
        ),
    ])
}

fn start_commands(config: &impl ConfigSource, os_type: OsType, insights: bool) -> Result<Vec<String>> {
    let section = os_type.section();
    if let Some(items) = config.lookup_list(section, "start_task_commands") {
        let commands: Vec<String> = items
            .iter()
            .map(|command| command.trim())
            .filter(|command| !command.is_empty())
            .map(String::from)
            .collect();
        if commands.is_empty() {
            return Err(Error::Config(format!("[{}] start_task_commands is empty", section)));
        }
        return Ok(commands);
    }

    if !insights {
        return Err(Error::missing(section, "start_task_commands"));
    }

    let bootstrap = match os_type {
        OsType::Linux => INSIGHTS_LINUX_BOOTSTRAP,
        OsType::Windows => INSIGHTS_WINDOWS_BOOTSTRAP,
    };
    Ok(vec![bootstrap.to_string()])
}

fn parse_node_count(section: &str, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "[{}] target_dedicated_nodes must be a non-negative integer, got '{}'",
            section, value
        ))
    })
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::Config(format!(
            "[{}] {} must be a boolean, got '{}'",
            section, key, value
        ))),
    }
}
