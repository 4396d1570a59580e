//! Account handles: the API tests use to act on the network
//!
//! An `Account` pairs an account id with the `Runtime` it lives in and a
//! `TransactionManager` that signs as that account.

use crate::chain::{Connector, Provider};
use crate::config::Settings;
use crate::error::{RunnerError, RunnerResult};
use crate::keys::{KeyPair, KeyStore};
use crate::state::ContractState;
use crate::tx::{
    AccessKeyCreator, CreateTransactionOptions, GasMeter, KeyStoreSigner, RedirectTarget,
    RpcSender, TransactionManager, WalletRedirectSender,
};
use crate::types::{
    AccountId, AccountView, Action, Balance, ExecutionOutcome, Gas, StateRecord,
};

use borsh::BorshSerialize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Cost of storing one byte on chain, in yoctoNEAR
pub const STORAGE_AMOUNT_PER_BYTE: Balance = 10_000_000_000_000_000_000;

/// Everything accounts of one network share
#[derive(Clone)]
pub struct Runtime {
    settings: Arc<Settings>,
    provider: Arc<dyn Provider>,
    key_store: Arc<dyn KeyStore>,
    connector: Arc<dyn Connector>,
    gas_meter: GasMeter,
}

impl Runtime {
    pub fn new(
        settings: Arc<Settings>,
        provider: Arc<dyn Provider>,
        key_store: Arc<dyn KeyStore>,
        connector: Arc<dyn Connector>,
        gas_meter: GasMeter,
    ) -> Self {
        Self {
            settings,
            provider,
            key_store,
            connector,
            gas_meter,
        }
    }

    pub fn network_id(&self) -> &str {
        self.settings.network_id()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        &self.key_store
    }

    pub fn gas_meter(&self) -> &GasMeter {
        &self.gas_meter
    }

    /// Pipeline signing as `signer_id` with this runtime's key store and provider.
    ///
    /// Every outcome it sends feeds the runtime's gas meter.
    pub fn transaction_manager(&self, signer_id: AccountId) -> TransactionManager {
        let network_id = self.network_id().to_string();

        let creator = AccessKeyCreator::new(network_id.clone(), signer_id, self.key_store.clone())
            .with_provider(self.provider.clone());
        let signer = KeyStoreSigner::new(network_id.clone(), self.key_store.clone());
        let sender = RpcSender::new(network_id, self.provider.clone())
            .with_failure_policy(self.settings.transactions.bundle_failure)
            .with_gas_callback(self.gas_meter.tx_callback());

        TransactionManager::new(Arc::new(creator), Arc::new(signer), Arc::new(sender))
    }

    /// Pipeline that hands transactions from `signer_id` to the configured web wallet.
    ///
    /// Sends through it return `RunnerError::Redirected` once `target` has the sign URL.
    pub fn wallet_transaction_manager(
        &self,
        signer_id: AccountId,
        target: Arc<dyn RedirectTarget>,
        callback_url: Option<Url>,
    ) -> RunnerResult<TransactionManager> {
        let wallet_url = self.settings.network.wallet_url.as_deref().ok_or_else(|| {
            RunnerError::Config(format!("no wallet_url configured for {}", self.network_id()))
        })?;
        let wallet_url = Url::parse(wallet_url)
            .map_err(|e| RunnerError::Config(format!("invalid wallet_url {:?}: {}", wallet_url, e)))?;

        let network_id = self.network_id().to_string();
        let creator = AccessKeyCreator::new(network_id.clone(), signer_id, self.key_store.clone())
            .with_provider(self.provider.clone());
        let signer = KeyStoreSigner::new(network_id, self.key_store.clone());
        let mut sender = WalletRedirectSender::new(wallet_url, target);
        if let Some(callback_url) = callback_url {
            sender = sender.with_callback_url(callback_url);
        }

        Ok(TransactionManager::new(
            Arc::new(creator),
            Arc::new(signer),
            Arc::new(sender),
        ))
    }

    pub fn account(&self, account_id: AccountId) -> Account {
        let manager = self.transaction_manager(account_id.clone());
        Account {
            id: account_id,
            runtime: self.clone(),
            manager,
        }
    }
}

/// Options for `Account::create_account`
#[derive(Clone, Default)]
pub struct CreateAccountOptions {
    /// Defaults to `accounts.initial_balance_near` from the settings
    pub initial_balance: Option<Balance>,
    /// Defaults to a freshly generated key pair
    pub key_pair: Option<Arc<dyn KeyPair>>,
}

impl CreateAccountOptions {
    pub fn with_initial_balance(mut self, balance: Balance) -> Self {
        self.initial_balance = Some(balance);
        self
    }

    pub fn with_key_pair(mut self, key_pair: Arc<dyn KeyPair>) -> Self {
        self.key_pair = Some(key_pair);
        self
    }
}

/// Options for function calls
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Defaults to `transactions.default_gas_tgas` from the settings
    pub gas: Option<Gas>,
    pub attached_deposit: Balance,
}

impl CallOptions {
    pub fn with_gas(mut self, gas: Gas) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn with_deposit(mut self, deposit: Balance) -> Self {
        self.attached_deposit = deposit;
        self
    }
}

/// Balance breakdown of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountBalance {
    pub total: Balance,
    pub locked: Balance,
    /// Liquid balance not reserved for storage
    pub available: Balance,
}

impl From<&AccountView> for AccountBalance {
    fn from(view: &AccountView) -> Self {
        let storage_required = STORAGE_AMOUNT_PER_BYTE.saturating_mul(view.storage_usage as u128);
        let reserved = storage_required.saturating_sub(view.locked);

        Self {
            total: view.amount.saturating_add(view.locked),
            locked: view.locked,
            available: view.amount.saturating_sub(reserved),
        }
    }
}

/// Handle to one account on one network
#[derive(Clone)]
pub struct Account {
    id: AccountId,
    runtime: Runtime,
    manager: TransactionManager,
}

impl Account {
    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// `name.<this account>`
    pub fn sub_account_id(&self, name: &str) -> RunnerResult<AccountId> {
        self.id.sub_account(name)
    }

    /// Send one transaction with the given actions to `receiver_id`
    pub async fn send_actions(
        &self,
        receiver_id: AccountId,
        actions: Vec<Action>,
    ) -> RunnerResult<ExecutionOutcome> {
        self.manager
            .create_sign_and_send_transaction(CreateTransactionOptions::new(receiver_id, actions))
            .await
    }

    /// Send several transactions in order; see `TransactionSender::bundle_create_sign_and_send`
    pub async fn send_bundle(
        &self,
        transactions: Vec<(AccountId, Vec<Action>)>,
    ) -> Vec<RunnerResult<ExecutionOutcome>> {
        let options = transactions
            .into_iter()
            .map(|(receiver_id, actions)| CreateTransactionOptions::new(receiver_id, actions))
            .collect();
        self.manager.bundle_create_sign_and_send_transactions(options).await
    }

    /// Create `name.<this account>`, fund it and give it a full access key
    pub async fn create_account(
        &self,
        name: &str,
        options: CreateAccountOptions,
    ) -> RunnerResult<Account> {
        self.create_account_with(name, options, Vec::new()).await
    }

    /// `create_account` that also deploys `wasm` in the same transaction
    pub async fn create_and_deploy(
        &self,
        name: &str,
        wasm: impl Into<Vec<u8>>,
        options: CreateAccountOptions,
    ) -> RunnerResult<Account> {
        self.create_account_with(name, options, vec![Action::deploy_contract(wasm)])
            .await
    }

    async fn create_account_with(
        &self,
        name: &str,
        options: CreateAccountOptions,
        extra_actions: Vec<Action>,
    ) -> RunnerResult<Account> {
        let account_id = self.sub_account_id(name)?;
        let key_pair = options
            .key_pair
            .unwrap_or_else(|| self.runtime.connector.generate_key_pair());
        let initial_balance = options
            .initial_balance
            .unwrap_or_else(|| self.runtime.settings.accounts.initial_balance());

        let mut actions = vec![
            Action::CreateAccount,
            Action::transfer(initial_balance),
            Action::add_full_access_key(key_pair.public_key()),
        ];
        actions.extend(extra_actions);

        let outcome = self.send_actions(account_id.clone(), actions).await?;
        ensure_success(outcome)?;

        self.runtime
            .key_store
            .set_key(self.runtime.network_id(), &account_id, key_pair)
            .await?;

        info!("Created account {} with {} yoctoNEAR", account_id, initial_balance);
        Ok(self.runtime.account(account_id))
    }

    /// Deploy contract code to this account
    pub async fn deploy(&self, wasm: impl Into<Vec<u8>>) -> RunnerResult<ExecutionOutcome> {
        let wasm = wasm.into();
        debug!("Deploying {} bytes to {}", wasm.len(), self.id);
        let outcome = self
            .send_actions(self.id.clone(), vec![Action::deploy_contract(wasm)])
            .await?;
        ensure_success(outcome)
    }

    /// Call a contract method with JSON arguments and return the raw outcome.
    ///
    /// On-chain failures are returned as outcomes, not errors.
    pub async fn call_raw<A: Serialize + ?Sized>(
        &self,
        contract_id: &AccountId,
        method_name: &str,
        args: &A,
        options: CallOptions,
    ) -> RunnerResult<ExecutionOutcome> {
        let args = serde_json::to_vec(args)?;
        let gas = options
            .gas
            .unwrap_or_else(|| self.runtime.settings.transactions.default_gas());

        self.send_actions(
            contract_id.clone(),
            vec![Action::function_call(
                method_name,
                args,
                gas,
                options.attached_deposit,
            )],
        )
        .await
    }

    /// Call a contract method and decode its JSON return value
    pub async fn call<T, A>(
        &self,
        contract_id: &AccountId,
        method_name: &str,
        args: &A,
        options: CallOptions,
    ) -> RunnerResult<T>
    where
        T: DeserializeOwned,
        A: Serialize + ?Sized,
    {
        let outcome = ensure_success(
            self.call_raw(contract_id, method_name, args, options)
                .await?,
        )?;

        match outcome.success_value() {
            Some(value) if !value.is_empty() => outcome.json(),
            _ => Ok(serde_json::from_value(serde_json::Value::Null)?),
        }
    }

    /// Read-only call of a method on this account's contract
    pub async fn view<T, A>(&self, method_name: &str, args: &A) -> RunnerResult<T>
    where
        T: DeserializeOwned,
        A: Serialize + ?Sized,
    {
        let args = serde_json::to_vec(args)?;
        let result = self
            .runtime
            .provider
            .view_function(&self.id, method_name, &args)
            .await?;

        for log in &result.logs {
            debug!("{}::{} log: {}", self.id, method_name, log);
        }

        if result.result.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&result.result)?)
    }

    /// Contract storage under `prefix`
    pub async fn view_state(&self, prefix: impl AsRef<[u8]>) -> RunnerResult<ContractState> {
        let items = self
            .runtime
            .provider
            .view_state(&self.id, prefix.as_ref())
            .await?;
        Ok(ContractState::new(items))
    }

    /// Overwrite one storage entry of this account's contract. Sandbox only.
    pub async fn patch_state(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> RunnerResult<()> {
        if !self.runtime.settings.is_sandbox() {
            return Err(RunnerError::Unsupported {
                network: self.runtime.network_id().to_string(),
                operation: "patch_state".to_string(),
            });
        }

        let record = StateRecord {
            account_id: self.id.clone(),
            key: key.into(),
            value: value.into(),
        };
        debug!(
            "Patching {} bytes of state under {} on {}",
            record.value.len(),
            hex::encode(&record.key),
            self.id
        );
        self.runtime.provider.patch_state(vec![record]).await
    }

    /// `patch_state` with a borsh-encoded value
    pub async fn patch_state_borsh<T: BorshSerialize>(
        &self,
        key: impl Into<Vec<u8>>,
        value: &T,
    ) -> RunnerResult<()> {
        self.patch_state(key, ContractState::encode(value)?).await
    }

    pub async fn balance(&self) -> RunnerResult<AccountBalance> {
        let view = self.runtime.provider.view_account(&self.id).await?;
        Ok(AccountBalance::from(&view))
    }

    pub async fn transfer(
        &self,
        receiver_id: &AccountId,
        amount: Balance,
    ) -> RunnerResult<ExecutionOutcome> {
        let outcome = self
            .send_actions(receiver_id.clone(), vec![Action::transfer(amount)])
            .await?;
        ensure_success(outcome)
    }

    /// Delete this account, sending its remaining balance to `beneficiary_id`
    pub async fn delete(&self, beneficiary_id: &AccountId) -> RunnerResult<ExecutionOutcome> {
        let outcome = ensure_success(
            self.send_actions(
                self.id.clone(),
                vec![Action::DeleteAccount {
                    beneficiary_id: beneficiary_id.clone(),
                }],
            )
            .await?,
        )?;

        self.runtime
            .key_store
            .remove_key(self.runtime.network_id(), &self.id)
            .await?;
        info!("Deleted account {}, beneficiary {}", self.id, beneficiary_id);
        Ok(outcome)
    }
}

fn ensure_success(outcome: ExecutionOutcome) -> RunnerResult<ExecutionOutcome> {
    match outcome.failure_message() {
        Some(message) => Err(RunnerError::ExecutionFailed {
            tx_hash: outcome.transaction_hash.to_string(),
            message: message.to_string(),
        }),
        None => Ok(outcome),
    }
}
