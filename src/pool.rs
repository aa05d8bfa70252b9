//! Pool lifecycle controller
//!
//! Makes sure a Batch pool exists and has nodes that can take work:
//!
//! ```text
//! Unknown -> Checking -> Exists                        (done, nothing created)
//!                     -> NotFound -> Creating -> Exists (created concurrently)
//!                                             -> Waiting -> Ready
//! any non-terminal state -> Error
//! ```
//!
//! The controller never assumes it owns the pool. Another process may create
//! or delete it between any two steps, and a dropped `ensure_pool` future
//! simply stops waiting; nothing is ever deleted.

use std::future::Future;
use std::time::Duration;

use crate::client::{BatchClient, CreateOutcome};
use crate::error::RemoteError;
use crate::models::{EnsureOutcome, PoolHandle, PoolSpec, PoolState};
use crate::{Error, Result};

/// Controller timing
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Upper bound for each individual service call
    pub call_timeout: Duration,
    /// Delay between readiness polls
    pub poll_interval: Duration,
    /// How long to wait for nodes after creating the pool
    pub ready_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(20 * 60),
        }
    }
}

impl ControllerConfig {
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// Where a single `ensure_pool` run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unknown,
    Checking,
    Exists,
    NotFound,
    Creating,
    Waiting,
    Ready,
    Error,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Exists | Phase::Ready | Phase::Error)
    }

    fn can_advance_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (Unknown, Checking)
            | (Checking, Exists)
            | (Checking, NotFound)
            | (NotFound, Creating)
            | (Creating, Exists)
            | (Creating, Waiting)
            | (Waiting, Ready) => true,
            _ => false,
        }
    }
}

struct Run<'a> {
    pool_id: &'a str,
    phase: Phase,
}

impl<'a> Run<'a> {
    fn new(pool_id: &'a str) -> Self {
        Self { pool_id, phase: Phase::Unknown }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "invalid pool phase transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::debug!(pool = %self.pool_id, from = ?self.phase, to = ?next, "Pool phase transition");
        self.phase = next;
    }
}

/// Drives one pool from "maybe absent" to "nodes ready"
pub struct PoolController<C> {
    client: C,
    config: ControllerConfig,
}

impl<C: BatchClient> PoolController<C> {
    pub fn new(client: C) -> Self {
        Self::with_config(client, ControllerConfig::default())
    }

    pub fn with_config(client: C, config: ControllerConfig) -> Self {
        Self { client, config }
    }

    /// Create `pool_id` from `spec` unless it already exists, then wait for
    /// its nodes. An existing pool is accepted as-is even if its size or
    /// image differ from `spec`.
    pub async fn ensure_pool(&self, pool_id: &str, spec: PoolSpec) -> Result<PoolHandle> {
        let mut run = Run::new(pool_id);
        let result = self.drive(&mut run, spec).await;

        if let Err(e) = &result {
            if !run.phase.is_terminal() {
                run.advance(Phase::Error);
            }
            tracing::error!(pool = %pool_id, error = %e, "Failed to ensure pool");
        }
        result
    }

    async fn drive(&self, run: &mut Run<'_>, spec: PoolSpec) -> Result<PoolHandle> {
        let pool_id = run.pool_id;
        if spec.pool_id != pool_id {
            return Err(Error::Config(format!(
                "pool id '{}' does not match specification id '{}'",
                pool_id, spec.pool_id
            )));
        }

        run.advance(Phase::Checking);
        let exists = self.bounded("exists", self.client.exists(pool_id)).await??;

        if exists {
            run.advance(Phase::Exists);
            tracing::info!(pool = %pool_id, "Pool already exists");
            return Ok(PoolHandle {
                pool_id: pool_id.to_string(),
                outcome: EnsureOutcome::AlreadyExisted,
                polls: 0,
            });
        }

        run.advance(Phase::NotFound);
        run.advance(Phase::Creating);
        tracing::info!(
            pool = %pool_id,
            os = %spec.os_type,
            vm_size = %spec.vm_size,
            nodes = spec.target_dedicated_nodes,
            "Creating pool"
        );

        match self.bounded("create", self.client.create(&spec)).await? {
            Ok(CreateOutcome::Created) => {
                tracing::info!(pool = %pool_id, "Created pool");
            }
            Ok(CreateOutcome::AlreadyExists) => {
                run.advance(Phase::Exists);
                tracing::info!(pool = %pool_id, "Pool was created concurrently by another caller");
                return Ok(PoolHandle {
                    pool_id: pool_id.to_string(),
                    outcome: EnsureOutcome::CreatedConcurrently,
                    polls: 0,
                });
            }
            Err(e) => return Err(creation_error(pool_id, e)),
        }

        run.advance(Phase::Waiting);
        let polls = self.wait_for_nodes(pool_id).await?;

        run.advance(Phase::Ready);
        tracing::info!(pool = %pool_id, polls, "Pool nodes ready");
        Ok(PoolHandle {
            pool_id: pool_id.to_string(),
            outcome: EnsureOutcome::Created,
            polls,
        })
    }

    /// Poll until the pool reports ready nodes; returns the number of polls.
    /// The pool is left in place on timeout.
    pub async fn wait_for_nodes(&self, pool_id: &str) -> Result<u32> {
        let mut polls = 0;
        let waited = self.config.ready_timeout;

        match tokio::time::timeout(waited, self.poll_until_ready(pool_id, &mut polls)).await {
            Ok(result) => result.map(|()| polls),
            Err(_) => {
                tracing::warn!(pool = %pool_id, polls, ?waited, "Timed out waiting for pool nodes");
                Err(Error::PoolTimeout {
                    pool_id: pool_id.to_string(),
                    waited,
                })
            }
        }
    }

    async fn poll_until_ready(&self, pool_id: &str, polls: &mut u32) -> Result<()> {
        loop {
            let state = self.bounded("get_state", self.client.get_state(pool_id)).await??;
            *polls += 1;

            if state.is_ready() {
                return Ok(());
            }
            match state {
                PoolState::Absent => {
                    tracing::warn!(pool = %pool_id, "Pool not found while waiting for nodes");
                }
                state => {
                    tracing::debug!(pool = %pool_id, %state, poll = *polls, "Waiting for pool nodes");
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<std::result::Result<T, RemoteError>>
    where
        F: Future<Output = std::result::Result<T, RemoteError>>,
    {
        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .map_err(|_| Error::RequestTimeout {
                operation,
                after: self.config.call_timeout,
            })
    }
}

/// Ensure a pool with the default controller timing
pub async fn ensure_pool<C: BatchClient>(client: &C, pool_id: &str, spec: PoolSpec) -> Result<PoolHandle> {
    PoolController::new(client).ensure_pool(pool_id, spec).await
}

fn creation_error(pool_id: &str, source: RemoteError) -> Error {
    Error::PoolCreation {
        pool_id: pool_id.to_string(),
        code: source.code().to_string(),
        message: source.message().to_string(),
        source,
    }
}
