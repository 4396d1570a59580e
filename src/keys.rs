//! Key material: key pairs and the stores that resolve them per network and account

use crate::error::RunnerResult;
use crate::types::{AccountId, PublicKey, Signature};

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Signing key. Cryptography lives in the SDK binding.
pub trait KeyPair: Send + Sync + fmt::Debug {
    fn public_key(&self) -> PublicKey;

    fn sign(&self, message: &[u8]) -> Signature;

    /// Secret key in the SDK's textual form, used to persist keys
    fn secret_key(&self) -> String;
}

/// Resolves key pairs by (network id, account id)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_key(
        &self,
        network_id: &str,
        account_id: &AccountId,
    ) -> RunnerResult<Option<Arc<dyn KeyPair>>>;

    async fn set_key(
        &self,
        network_id: &str,
        account_id: &AccountId,
        key_pair: Arc<dyn KeyPair>,
    ) -> RunnerResult<()>;

    async fn remove_key(&self, network_id: &str, account_id: &AccountId) -> RunnerResult<()>;
}

/// Key store held in memory for the lifetime of a runner
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: DashMap<(String, AccountId), Arc<dyn KeyPair>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys across all networks
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get_key(
        &self,
        network_id: &str,
        account_id: &AccountId,
    ) -> RunnerResult<Option<Arc<dyn KeyPair>>> {
        Ok(self
            .keys
            .get(&(network_id.to_string(), account_id.clone()))
            .map(|entry| entry.value().clone()))
    }

    async fn set_key(
        &self,
        network_id: &str,
        account_id: &AccountId,
        key_pair: Arc<dyn KeyPair>,
    ) -> RunnerResult<()> {
        debug!(
            "Storing key {} for {} on {}",
            key_pair.public_key(),
            account_id,
            network_id
        );
        self.keys
            .insert((network_id.to_string(), account_id.clone()), key_pair);
        Ok(())
    }

    async fn remove_key(&self, network_id: &str, account_id: &AccountId) -> RunnerResult<()> {
        self.keys
            .remove(&(network_id.to_string(), account_id.clone()));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::types::KeyType;

    /// Deterministic key pair: the "signature" is the seed followed by the message
    #[derive(Debug)]
    pub struct FakeKeyPair {
        seed: u8,
    }

    impl FakeKeyPair {
        pub fn new(seed: u8) -> Arc<dyn KeyPair> {
            Arc::new(Self { seed })
        }
    }

    impl KeyPair for FakeKeyPair {
        fn public_key(&self) -> PublicKey {
            PublicKey::ed25519(vec![self.seed; 32])
        }

        fn sign(&self, message: &[u8]) -> Signature {
            let mut bytes = vec![self.seed];
            bytes.extend_from_slice(message);
            Signature {
                key_type: KeyType::Ed25519,
                bytes,
            }
        }

        fn secret_key(&self) -> String {
            format!("fake:{}", self.seed)
        }
    }
}
