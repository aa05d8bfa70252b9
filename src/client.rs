//! The narrow slice of the Batch service the controller depends on

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::models::{PoolSpec, PoolState};

/// Result of a create call that the service did not reject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Someone else created a pool with this id first
    AlreadyExists,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchClient: Send + Sync {
    async fn exists(&self, pool_id: &str) -> Result<bool, RemoteError>;

    async fn create(&self, spec: &PoolSpec) -> Result<CreateOutcome, RemoteError>;

    async fn get_state(&self, pool_id: &str) -> Result<PoolState, RemoteError>;
}

#[async_trait]
impl<T: BatchClient + ?Sized> BatchClient for std::sync::Arc<T> {
    async fn exists(&self, pool_id: &str) -> Result<bool, RemoteError> {
        (**self).exists(pool_id).await
    }

    async fn create(&self, spec: &PoolSpec) -> Result<CreateOutcome, RemoteError> {
        (**self).create(spec).await
    }

    async fn get_state(&self, pool_id: &str) -> Result<PoolState, RemoteError> {
        (**self).get_state(pool_id).await
    }
}

#[async_trait]
impl<T: BatchClient + ?Sized> BatchClient for &T {
    async fn exists(&self, pool_id: &str) -> Result<bool, RemoteError> {
        (**self).exists(pool_id).await
    }

    async fn create(&self, spec: &PoolSpec) -> Result<CreateOutcome, RemoteError> {
        (**self).create(spec).await
    }

    async fn get_state(&self, pool_id: &str) -> Result<PoolState, RemoteError> {
        (**self).get_state(pool_id).await
    }
}
