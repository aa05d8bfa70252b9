//! Azure Batch pool provisioning
//!
//! Makes sure a Batch compute pool exists and has nodes ready for work before
//! jobs are submitted to it. Safe to run from many submitters at once: an
//! existing pool is left alone, and losing a creation race to another caller
//! counts as success.
//!
//! # Key Pieces
//!
//! - [`build_pool_spec`] - OS-specific pool descriptor from configuration
//! - [`PoolController`] - check, create, wait for nodes
//! - [`BatchClient`] - the service calls the controller needs
//! - [`RestBatchClient`] - Shared Key authenticated REST implementation
//!
//! # Example
//!
//! ```no_run
//! use azbatch_pool::{build_pool_spec, BatchAccount, OsType, PoolController, RestBatchClient, Settings};
//!
//! # async fn run() -> azbatch_pool::Result<()> {
//! let settings = Settings::load("azure-configuration.toml")?;
//! let spec = build_pool_spec(&settings, "testpool", OsType::Linux, "standard_a1_v2")?;
//!
//! let client = RestBatchClient::new(&BatchAccount::from_config(&settings)?)?;
//! let handle = PoolController::new(client).ensure_pool("testpool", spec).await?;
//! println!("pool {} ready ({:?})", handle.pool_id, handle.outcome);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod rest;
pub mod shell;

pub use builder::build_pool_spec;
pub use client::{BatchClient, CreateOutcome};
pub use config::{BatchAccount, ConfigSource, Settings};
pub use error::{Error, RemoteError, Result};
pub use models::{EnsureOutcome, OsType, PoolHandle, PoolSpec, PoolState};
pub use pool::{ensure_pool, ControllerConfig, PoolController};
pub use rest::RestBatchClient;
pub use shell::wrap_commands;
