//! Chain module - the seams between the runner and a node SDK
//!
//! This module provides:
//! - The `Provider` trait for RPC queries, submission and state access
//! - The `Connector` trait for reaching a node and producing key material
//! - Readiness and health helpers shared by the sandbox server and runner

pub mod provider;

#[cfg(test)]
pub use provider::MockProvider;
pub use provider::{health_check, wait_until_ready, Provider};

use crate::error::RunnerResult;
use crate::keys::KeyPair;

use async_trait::async_trait;
use std::sync::Arc;

/// Entry point of an SDK binding
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a provider for the node at `rpc_url`
    async fn connect(&self, rpc_url: &str) -> RunnerResult<Arc<dyn Provider>>;

    /// Fresh random key pair
    fn generate_key_pair(&self) -> Arc<dyn KeyPair>;

    /// Key pair from its textual secret key
    fn key_pair_from_secret(&self, secret_key: &str) -> RunnerResult<Arc<dyn KeyPair>>;
}
