//! Transaction submission: single sends, create-sign-send, and sequential bundles

use super::creator::{CreateTransactionOptions, TransactionCreator};
use super::gas::GasCallback;
use super::signer::TransactionSigner;
use crate::chain::Provider;
use crate::error::{RunnerError, RunnerResult};
use crate::types::{ExecutionOutcome, SignedTransaction, UnsignedTransaction};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// What a bundle does after one of its elements fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleFailurePolicy {
    /// Keep going and report every element's result
    #[default]
    Continue,
    /// Stop after the first failing element
    Abort,
}

/// Nonce offsets assigned to a bundle of `len` transactions: 1, 2, .., len
pub fn bundle_nonce_offsets(len: usize) -> impl Iterator<Item = u64> {
    1..=len as u64
}

/// Submits transactions to the network
#[async_trait]
pub trait TransactionSender: Send + Sync {
    async fn send(&self, tx: SignedTransaction) -> RunnerResult<ExecutionOutcome>;

    async fn create_sign_and_send(
        &self,
        creator: &dyn TransactionCreator,
        signer: &dyn TransactionSigner,
        options: CreateTransactionOptions,
    ) -> RunnerResult<ExecutionOutcome>;

    /// Create, sign and send each element in order, one at a time.
    ///
    /// Element `i` uses nonce offset `i + 1` whatever offset the caller set.
    async fn bundle_create_sign_and_send(
        &self,
        creator: &dyn TransactionCreator,
        signer: &dyn TransactionSigner,
        options: Vec<CreateTransactionOptions>,
    ) -> Vec<RunnerResult<ExecutionOutcome>>;
}

/// Sender that submits directly over RPC and reports burnt gas
pub struct RpcSender {
    network_id: String,
    provider: Arc<dyn Provider>,
    failure_policy: BundleFailurePolicy,
    gas_callbacks: Vec<GasCallback>,
}

impl RpcSender {
    pub fn new(network_id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            network_id: network_id.into(),
            provider,
            failure_policy: BundleFailurePolicy::default(),
            gas_callbacks: Vec::new(),
        }
    }

    pub fn with_failure_policy(mut self, policy: BundleFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Register a callback fed with every burnt-gas value of every outcome
    pub fn with_gas_callback(mut self, callback: GasCallback) -> Self {
        self.gas_callbacks.push(callback);
        self
    }

    pub fn failure_policy(&self) -> BundleFailurePolicy {
        self.failure_policy
    }

    /// Fan out burnt gas to every callback concurrently
    async fn observe_gas(&self, outcome: &ExecutionOutcome) {
        for outcome_view in
            std::iter::once(&outcome.transaction_outcome).chain(outcome.receipts_outcome.iter())
        {
            crate::metrics::record_gas_burnt(&self.network_id, outcome_view.gas_burnt);
        }

        if self.gas_callbacks.is_empty() {
            return;
        }

        let updates = outcome.gas_burnt_values().into_iter().flat_map(|gas| {
            self.gas_callbacks
                .iter()
                .map(move |callback| callback(gas))
        });
        join_all(updates).await;
    }

    async fn create_and_sign(
        creator: &dyn TransactionCreator,
        signer: &dyn TransactionSigner,
        options: CreateTransactionOptions,
    ) -> RunnerResult<SignedTransaction> {
        let tx = creator
            .create(options.receiver_id, options.actions, options.nonce_offset)
            .await?;
        signer.sign(tx).await
    }
}

#[async_trait]
impl TransactionSender for RpcSender {
    async fn send(&self, tx: SignedTransaction) -> RunnerResult<ExecutionOutcome> {
        let tx_hash = tx.hash()?;

        let outcome = match self.provider.send_transaction(&tx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Transaction {} rejected: {}", tx_hash, e);
                crate::metrics::record_tx_failed(&self.network_id);
                return Err(RunnerError::Submission {
                    tx_hash: tx_hash.to_string(),
                    message: e.to_string(),
                });
            }
        };

        crate::metrics::record_tx_submitted(&self.network_id);
        if outcome.failed() {
            crate::metrics::record_tx_execution_failed(&self.network_id);
            debug!(
                "Transaction {} executed with failure: {}",
                tx_hash,
                outcome.failure_message().unwrap_or_default()
            );
        } else {
            debug!(
                "Transaction {} executed, {} gas burnt",
                tx_hash,
                outcome.total_gas_burnt()
            );
        }

        self.observe_gas(&outcome).await;
        Ok(outcome)
    }

    async fn create_sign_and_send(
        &self,
        creator: &dyn TransactionCreator,
        signer: &dyn TransactionSigner,
        options: CreateTransactionOptions,
    ) -> RunnerResult<ExecutionOutcome> {
        let signed = Self::create_and_sign(creator, signer, options).await?;
        self.send(signed).await
    }

    async fn bundle_create_sign_and_send(
        &self,
        creator: &dyn TransactionCreator,
        signer: &dyn TransactionSigner,
        options: Vec<CreateTransactionOptions>,
    ) -> Vec<RunnerResult<ExecutionOutcome>> {
        let total = options.len();
        let mut results = Vec::with_capacity(total);

        for (options, nonce_offset) in options.into_iter().zip(bundle_nonce_offsets(total)) {
            let options = options.with_nonce_offset(nonce_offset);
            let result = self.create_sign_and_send(creator, signer, options).await;

            let failed = result.is_err();
            if let Err(e) = &result {
                warn!(
                    "Bundled transaction {}/{} for {} failed: {}",
                    nonce_offset,
                    total,
                    creator.signer_id(),
                    e
                );
            }
            results.push(result);

            if failed && self.failure_policy == BundleFailurePolicy::Abort {
                info!(
                    "Aborting bundle after {}/{} transactions",
                    nonce_offset, total
                );
                break;
            }
        }

        results
    }
}

/// Receives wallet sign URLs, e.g. a browser driver
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedirectTarget: Send + Sync {
    async fn redirect(&self, url: Url) -> RunnerResult<()>;
}

/// Sender that hands transactions to a web wallet for signing and delivery.
///
/// The wallet signs and submits after the redirect, so no outcome is ever
/// returned synchronously.
pub struct WalletRedirectSender {
    wallet_url: Url,
    callback_url: Option<Url>,
    target: Arc<dyn RedirectTarget>,
}

impl WalletRedirectSender {
    pub fn new(wallet_url: Url, target: Arc<dyn RedirectTarget>) -> Self {
        Self {
            wallet_url,
            callback_url: None,
            target,
        }
    }

    pub fn with_callback_url(mut self, callback_url: Url) -> Self {
        self.callback_url = Some(callback_url);
        self
    }

    /// `<wallet>/sign?transactions=<base64,...>&callbackUrl=<url>`
    pub fn sign_url(&self, transactions: &[UnsignedTransaction]) -> RunnerResult<Url> {
        let encoded = transactions
            .iter()
            .map(|tx| tx.encode().map(|bytes| STANDARD.encode(bytes)))
            .collect::<RunnerResult<Vec<_>>>()?
            .join(",");

        let mut url = self.wallet_url.clone();
        let path = format!("{}/sign", url.path().trim_end_matches('/'));
        url.set_path(&path);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("transactions", &encoded);
            if let Some(callback_url) = &self.callback_url {
                query.append_pair("callbackUrl", callback_url.as_str());
            }
        }
        Ok(url)
    }

    async fn redirect(&self, transactions: &[UnsignedTransaction]) -> RunnerResult<()> {
        let url = self.sign_url(transactions)?;
        info!(
            "Redirecting {} transaction(s) to wallet at {}",
            transactions.len(),
            self.wallet_url
        );
        self.target.redirect(url).await
    }
}

#[async_trait]
impl TransactionSender for WalletRedirectSender {
    async fn send(&self, tx: SignedTransaction) -> RunnerResult<ExecutionOutcome> {
        self.redirect(std::slice::from_ref(tx.transaction())).await?;
        Err(RunnerError::Redirected)
    }

    async fn create_sign_and_send(
        &self,
        creator: &dyn TransactionCreator,
        _signer: &dyn TransactionSigner,
        options: CreateTransactionOptions,
    ) -> RunnerResult<ExecutionOutcome> {
        let tx = creator
            .create(options.receiver_id, options.actions, options.nonce_offset)
            .await?;
        self.redirect(&[tx]).await?;
        Err(RunnerError::Redirected)
    }

    async fn bundle_create_sign_and_send(
        &self,
        creator: &dyn TransactionCreator,
        _signer: &dyn TransactionSigner,
        options: Vec<CreateTransactionOptions>,
    ) -> Vec<RunnerResult<ExecutionOutcome>> {
        let total = options.len();
        let mut transactions = Vec::with_capacity(total);

        for (options, nonce_offset) in options.into_iter().zip(bundle_nonce_offsets(total)) {
            match creator
                .create(options.receiver_id, options.actions, nonce_offset)
                .await
            {
                Ok(tx) => transactions.push(tx),
                Err(e) => return vec![Err(e)],
            }
        }

        match self.redirect(&transactions).await {
            Ok(()) => Vec::new(),
            Err(e) => vec![Err(e)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockProvider;
    use crate::keys::testing::FakeKeyPair;
    use crate::keys::{InMemoryKeyStore, KeyPair, KeyStore};
    use crate::tx::creator::AccessKeyCreator;
    use crate::tx::gas::GasMeter;
    use crate::tx::signer::KeyStoreSigner;
    use crate::types::{
        AccessKeyView, AccountId, Action, CryptoHash, ExecutionStatus, GasValue, OutcomeView,
    };
    use std::sync::Mutex as StdMutex;

    const BASE_NONCE: u64 = 100;

    fn outcome_for(tx: &SignedTransaction, status: ExecutionStatus) -> ExecutionOutcome {
        let executor_id = tx.transaction().receiver_id().clone();
        ExecutionOutcome {
            transaction_hash: tx.hash().unwrap(),
            status,
            transaction_outcome: OutcomeView {
                id: CryptoHash([1; 32]),
                executor_id: executor_id.clone(),
                logs: vec![],
                gas_burnt: 100,
                status: ExecutionStatus::SuccessReceiptId(CryptoHash([2; 32])),
            },
            receipts_outcome: vec![OutcomeView {
                id: CryptoHash([2; 32]),
                executor_id,
                logs: vec![],
                gas_burnt: 200,
                status: ExecutionStatus::SuccessNoValue,
            }],
        }
    }

    async fn pipeline(
        provider: MockProvider,
    ) -> (AccessKeyCreator, KeyStoreSigner, Arc<dyn Provider>) {
        let signer_id: AccountId = "test.near".parse().unwrap();
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        store
            .set_key("sandbox", &signer_id, FakeKeyPair::new(1))
            .await
            .unwrap();

        let provider: Arc<dyn Provider> = Arc::new(provider);
        let creator =
            AccessKeyCreator::new("sandbox", signer_id, store.clone()).with_provider(provider.clone());
        let signer = KeyStoreSigner::new("sandbox", store);
        (creator, signer, provider)
    }

    fn constant_access_key(provider: &mut MockProvider) {
        provider.expect_view_access_key().returning(|_, _| {
            Ok(AccessKeyView {
                nonce: BASE_NONCE,
                block_hash: CryptoHash([8; 32]),
            })
        });
    }

    fn options(n: usize) -> Vec<CreateTransactionOptions> {
        let receiver: AccountId = "test.near".parse().unwrap();
        (0..n)
            .map(|i| {
                CreateTransactionOptions::new(receiver.clone(), vec![Action::transfer(i as u128)])
            })
            .collect()
    }

    #[tokio::test]
    async fn test_bundle_assigns_sequential_nonces() {
        let submitted = Arc::new(StdMutex::new(Vec::new()));
        let seen = submitted.clone();

        let mut provider = MockProvider::new();
        constant_access_key(&mut provider);
        provider.expect_send_transaction().returning(move |tx| {
            seen.lock().unwrap().push(tx.transaction().nonce());
            Ok(outcome_for(tx, ExecutionStatus::SuccessNoValue))
        });

        let (creator, signer, provider) = pipeline(provider).await;
        let sender = RpcSender::new("sandbox", provider);

        let results = sender
            .bundle_create_sign_and_send(&creator, &signer, options(3))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(
            *submitted.lock().unwrap(),
            vec![BASE_NONCE + 1, BASE_NONCE + 2, BASE_NONCE + 3]
        );
    }

    #[tokio::test]
    async fn test_bundle_ignores_caller_offsets() {
        let submitted = Arc::new(StdMutex::new(Vec::new()));
        let seen = submitted.clone();

        let mut provider = MockProvider::new();
        constant_access_key(&mut provider);
        provider.expect_send_transaction().returning(move |tx| {
            seen.lock().unwrap().push(tx.transaction().nonce());
            Ok(outcome_for(tx, ExecutionStatus::SuccessNoValue))
        });

        let (creator, signer, provider) = pipeline(provider).await;
        let sender = RpcSender::new("sandbox", provider);
        let options = options(2)
            .into_iter()
            .map(|o| o.with_nonce_offset(50))
            .collect();

        sender
            .bundle_create_sign_and_send(&creator, &signer, options)
            .await;
        assert_eq!(*submitted.lock().unwrap(), vec![BASE_NONCE + 1, BASE_NONCE + 2]);
    }

    #[tokio::test]
    async fn test_bundle_continues_past_failures_by_default() {
        let mut provider = MockProvider::new();
        constant_access_key(&mut provider);
        provider.expect_send_transaction().returning(|tx| {
            if tx.transaction().nonce() == BASE_NONCE + 2 {
                Err(RunnerError::Rpc("InvalidNonce".into()))
            } else {
                Ok(outcome_for(tx, ExecutionStatus::SuccessNoValue))
            }
        });

        let (creator, signer, provider) = pipeline(provider).await;
        let sender = RpcSender::new("sandbox", provider);

        let results = sender
            .bundle_create_sign_and_send(&creator, &signer, options(3))
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RunnerError::Submission { .. })));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_bundle_abort_policy_stops_at_first_failure() {
        let mut provider = MockProvider::new();
        constant_access_key(&mut provider);
        provider
            .expect_send_transaction()
            .times(2)
            .returning(|tx| {
                if tx.transaction().nonce() == BASE_NONCE + 2 {
                    Err(RunnerError::Rpc("InvalidNonce".into()))
                } else {
                    Ok(outcome_for(tx, ExecutionStatus::SuccessNoValue))
                }
            });

        let (creator, signer, provider) = pipeline(provider).await;
        let sender =
            RpcSender::new("sandbox", provider).with_failure_policy(BundleFailurePolicy::Abort);

        let results = sender
            .bundle_create_sign_and_send(&creator, &signer, options(3))
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn test_on_chain_failure_is_returned_not_thrown() {
        let mut provider = MockProvider::new();
        constant_access_key(&mut provider);
        provider
            .expect_send_transaction()
            .returning(|tx| Ok(outcome_for(tx, ExecutionStatus::Failure("panicked".into()))));

        let (creator, signer, provider) = pipeline(provider).await;
        let sender = RpcSender::new("sandbox", provider);

        let outcome = sender
            .create_sign_and_send(&creator, &signer, options(1).remove(0))
            .await
            .unwrap();
        assert!(outcome.failed());
    }

    #[tokio::test]
    async fn test_gas_callbacks_see_every_receipt() {
        let mut provider = MockProvider::new();
        constant_access_key(&mut provider);
        provider
            .expect_send_transaction()
            .returning(|tx| Ok(outcome_for(tx, ExecutionStatus::SuccessNoValue)));

        let (creator, signer, provider) = pipeline(provider).await;
        let meter = GasMeter::new();
        let sender = RpcSender::new("sandbox", provider).with_gas_callback(meter.tx_callback());

        sender
            .bundle_create_sign_and_send(&creator, &signer, options(2))
            .await;
        assert_eq!(meter.elapsed().await, GasValue::from(600u64));
    }

    #[tokio::test]
    async fn test_wallet_bundle_redirects_once_and_returns_no_outcomes() {
        let mut provider = MockProvider::new();
        constant_access_key(&mut provider);
        provider.expect_send_transaction().never();
        let (creator, signer, _) = pipeline(provider).await;

        let mut target = MockRedirectTarget::new();
        target
            .expect_redirect()
            .times(1)
            .withf(|url| {
                url.path() == "/sign"
                    && url
                        .query_pairs()
                        .any(|(k, v)| k == "transactions" && v.split(',').count() == 3)
                    && url
                        .query_pairs()
                        .any(|(k, v)| k == "callbackUrl" && v == "http://localhost:3000/")
            })
            .returning(|_| Ok(()));

        let sender = WalletRedirectSender::new(
            Url::parse("https://wallet.testnet.near.org/").unwrap(),
            Arc::new(target),
        )
        .with_callback_url(Url::parse("http://localhost:3000").unwrap());

        let results = sender
            .bundle_create_sign_and_send(&creator, &signer, options(3))
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_wallet_single_send_has_no_outcome() {
        let mut provider = MockProvider::new();
        constant_access_key(&mut provider);
        let (creator, signer, _) = pipeline(provider).await;

        let mut target = MockRedirectTarget::new();
        target.expect_redirect().times(1).returning(|_| Ok(()));
        let sender = WalletRedirectSender::new(
            Url::parse("https://wallet.testnet.near.org").unwrap(),
            Arc::new(target),
        );

        let result = sender
            .create_sign_and_send(&creator, &signer, options(1).remove(0))
            .await;
        assert!(matches!(result, Err(RunnerError::Redirected)));
    }

    #[test]
    fn test_wallet_url_encodes_borsh_transactions() {
        let signer_id: AccountId = "test.near".parse().unwrap();
        let tx = UnsignedTransaction::new(
            signer_id.clone(),
            FakeKeyPair::new(1).public_key(),
            5,
            signer_id,
            CryptoHash::default(),
            vec![Action::transfer(1)],
        );
        let sender = WalletRedirectSender::new(
            Url::parse("https://wallet.testnet.near.org/app").unwrap(),
            Arc::new(MockRedirectTarget::new()),
        );

        let url = sender.sign_url(&[tx.clone()]).unwrap();
        assert_eq!(url.path(), "/app/sign");
        let (_, encoded) = url
            .query_pairs()
            .find(|(k, _)| k == "transactions")
            .unwrap();
        assert_eq!(STANDARD.decode(encoded.as_bytes()).unwrap(), tx.encode().unwrap());
    }

    #[test]
    fn test_bundle_nonce_offsets() {
        assert_eq!(bundle_nonce_offsets(3).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(bundle_nonce_offsets(0).count(), 0);
    }
}
