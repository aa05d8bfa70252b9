//! Pool specification model
//!
//! These types serialize directly into the body of the Batch "add pool"
//! request, so field names follow the service's camelCase schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating system family of the pool's nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
}

impl OsType {
    /// Name of the configuration section holding this OS's pool settings
    pub fn section(&self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Windows => "windows",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

impl FromStr for OsType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(OsType::Linux),
            "windows" => Ok(OsType::Windows),
            _ => Err(crate::Error::UnsupportedOs(s.to_string())),
        }
    }
}

/// Marketplace image the nodes boot from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineConfiguration {
    pub image_reference: ImageReference,
    #[serde(rename = "nodeAgentSKUId")]
    pub node_agent_sku_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSetting {
    pub name: String,
    pub value: String,
}

impl EnvironmentSetting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoUserScope {
    Task,
    Pool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationLevel {
    NonAdmin,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoUser {
    pub scope: AutoUserScope,
    pub elevation_level: ElevationLevel,
}

/// Identity the start task runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub auto_user: AutoUser,
}

impl UserIdentity {
    /// Pool-scoped administrator, able to install agents system-wide
    pub fn pool_admin() -> Self {
        Self {
            auto_user: AutoUser {
                scope: AutoUserScope::Pool,
                elevation_level: ElevationLevel::Admin,
            },
        }
    }
}

/// Command run on every node after provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskSpec {
    pub command_line: String,
    #[serde(rename = "environmentSettings")]
    pub environment: Vec<EnvironmentSetting>,
    #[serde(rename = "userIdentity")]
    pub run_as: UserIdentity,
    /// -1 retries forever
    #[serde(rename = "maxTaskRetryCount")]
    pub max_retry_count: i32,
    #[serde(rename = "waitForSuccess")]
    pub wait_for_completion: bool,
}

/// Declarative description of a Batch pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    #[serde(rename = "id")]
    pub pool_id: String,
    #[serde(skip)]
    pub os_type: OsType,
    pub vm_size: String,
    pub virtual_machine_configuration: VirtualMachineConfiguration,
    pub target_dedicated_nodes: u32,
    #[serde(rename = "enableInterNodeCommunication")]
    pub inter_node_communication: bool,
    pub start_task: StartTaskSpec,
}

impl PoolSpec {
    pub fn image(&self) -> &ImageReference {
        &self.virtual_machine_configuration.image_reference
    }
}

/// How `ensure_pool` arrived at a usable pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    /// This call created the pool and waited for its nodes
    Created,
    /// The pool was already there before the existence check
    AlreadyExisted,
    /// Another caller created the pool between our check and our create
    CreatedConcurrently,
}

/// A pool ready for job submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHandle {
    pub pool_id: String,
    pub outcome: EnsureOutcome,
    /// Readiness polls performed; zero when nothing was created
    pub polls: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> PoolSpec {
        PoolSpec {
            pool_id: "testpool".into(),
            os_type: OsType::Linux,
            vm_size: "standard_a1_v2".into(),
            virtual_machine_configuration: VirtualMachineConfiguration {
                image_reference: ImageReference {
                    publisher: "canonical".into(),
                    offer: "0001-com-ubuntu-server-focal".into(),
                    sku: "20_04-lts".into(),
                    version: "latest".into(),
                },
                node_agent_sku_id: "batch.node.ubuntu 20.04".into(),
            },
            target_dedicated_nodes: 2,
            inter_node_communication: false,
            start_task: StartTaskSpec {
                command_line: "/bin/bash -c 'set -e; set -o pipefail; true'".into(),
                environment: vec![EnvironmentSetting::new("APP_INSIGHTS_APP_ID", "abc")],
                run_as: UserIdentity::pool_admin(),
                max_retry_count: 2,
                wait_for_completion: true,
            },
        }
    }

    #[test]
    fn test_os_type_parse_is_case_insensitive() {
        assert_eq!("Linux".parse::<OsType>().unwrap(), OsType::Linux);
        assert_eq!("WINDOWS".parse::<OsType>().unwrap(), OsType::Windows);
        assert!(matches!(
            "winbdows".parse::<OsType>(),
            Err(crate::Error::UnsupportedOs(s)) if s == "winbdows"
        ));
    }

    #[test]
    fn test_pool_spec_wire_format() {
        let body = serde_json::to_value(sample_spec()).unwrap();

        assert_eq!(body["id"], "testpool");
        assert_eq!(body["vmSize"], "standard_a1_v2");
        assert_eq!(body["targetDedicatedNodes"], 2);
        assert_eq!(body["enableInterNodeCommunication"], false);
        assert!(body.get("osType").is_none());

        let vm = &body["virtualMachineConfiguration"];
        assert_eq!(vm["imageReference"]["sku"], "20_04-lts");
        assert_eq!(vm["nodeAgentSKUId"], "batch.node.ubuntu 20.04");

        let task = &body["startTask"];
        assert_eq!(task["maxTaskRetryCount"], 2);
        assert_eq!(task["waitForSuccess"], true);
        assert_eq!(task["userIdentity"]["autoUser"]["scope"], "pool");
        assert_eq!(task["userIdentity"]["autoUser"]["elevationLevel"], "admin");
        assert_eq!(task["environmentSettings"][0]["name"], "APP_INSIGHTS_APP_ID");
    }
}
