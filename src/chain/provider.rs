//! Node provider seam: everything the runner asks of the network

use crate::error::{RunnerError, RunnerResult};
use crate::types::{
    AccessKeyView, AccountId, AccountView, ExecutionOutcome, PublicKey, SignedTransaction,
    StateItem, StateRecord, ViewResult,
};

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error};

/// RPC access to a node, implemented by an SDK binding
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Current nonce of an access key plus a recent block hash
    async fn view_access_key(
        &self,
        account_id: &AccountId,
        public_key: &PublicKey,
    ) -> RunnerResult<AccessKeyView>;

    /// Submit a signed transaction and wait for its final outcome
    async fn send_transaction(&self, tx: &SignedTransaction) -> RunnerResult<ExecutionOutcome>;

    async fn view_account(&self, account_id: &AccountId) -> RunnerResult<AccountView>;

    /// Read-only contract call
    async fn view_function(
        &self,
        account_id: &AccountId,
        method_name: &str,
        args: &[u8],
    ) -> RunnerResult<ViewResult>;

    /// Raw contract storage under `prefix`
    async fn view_state(&self, account_id: &AccountId, prefix: &[u8])
        -> RunnerResult<Vec<StateItem>>;

    /// Overwrite contract storage. Sandbox nodes only.
    async fn patch_state(&self, records: Vec<StateRecord>) -> RunnerResult<()>;

    /// Succeeds once the node answers status requests
    async fn status(&self) -> RunnerResult<()>;
}

/// Health check
pub async fn health_check(provider: &dyn Provider) -> bool {
    match provider.status().await {
        Ok(()) => true,
        Err(e) => {
            error!("Health check failed: {}", e);
            false
        }
    }
}

/// Poll `status` until the node answers or `timeout` elapses
pub async fn wait_until_ready(
    provider: &dyn Provider,
    timeout: Duration,
    poll_interval: Duration,
) -> RunnerResult<()> {
    let deadline = Instant::now() + timeout;

    loop {
        match provider.status().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(RunnerError::Timeout {
                        operation: format!("node to become ready ({})", e),
                    });
                }
                debug!("Node not ready yet: {}", e);
            }
        }
        sleep(poll_interval).await;
    }
}
