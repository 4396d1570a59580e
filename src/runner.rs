//! Test runner: one-time account setup, then isolated runs
//!
//! On sandbox the setup runs against a fresh node whose home directory is
//! kept as a snapshot. Every `run` starts a new node over a copy of that
//! snapshot, so tests never observe each other's transactions.
//!
//! On testnet there is no snapshot. Setup creates a uniquely named parent
//! account under the configured root, and every run shares live state.

use crate::account::{Account, CreateAccountOptions, Runtime};
use crate::chain::{Connector, Provider};
use crate::config::Settings;
use crate::error::{RunnerError, RunnerResult};
use crate::keys::KeyStore;
use crate::sandbox::{HomeDir, SandboxServer};
use crate::tx::GasMeter;
use crate::types::AccountId;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Accounts created during setup, by name
pub type NamedAccounts = BTreeMap<String, Account>;

/// How a runner gets its settings
pub enum RunnerInput<F> {
    /// Settings come from the environment (`Settings::from_env`)
    Function(F),
    Config(Settings, F),
}

impl<F> RunnerInput<F> {
    fn resolve(self) -> RunnerResult<(Settings, F)> {
        match self {
            RunnerInput::Function(init) => {
                let settings =
                    Settings::from_env().map_err(|e| RunnerError::Config(format!("{:#}", e)))?;
                Ok((settings, init))
            }
            RunnerInput::Config(settings, init) => Ok((settings, init)),
        }
    }
}

/// What a test body receives
#[derive(Clone)]
pub struct TestContext {
    pub root: Account,
    pub accounts: NamedAccounts,
    /// Gas burnt by this run only
    pub gas: GasMeter,
}

impl TestContext {
    pub fn account(&self, name: &str) -> RunnerResult<&Account> {
        self.accounts
            .get(name)
            .ok_or_else(|| RunnerError::Config(format!("no account named {:?}", name)))
    }
}

/// Name of the per-runner parent account on testnet
pub fn run_scoped_name(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run-{}-{}", now.format("%Y%m%d%H%M%S"), &suffix[..8])
}

pub struct Runner {
    settings: Arc<Settings>,
    connector: Arc<dyn Connector>,
    key_store: Arc<dyn KeyStore>,
    root_id: AccountId,
    account_ids: BTreeMap<String, AccountId>,
    /// Sandbox home as it was after setup
    snapshot: Option<HomeDir>,
}

impl Runner {
    /// Resolve settings, bring up the network and run `init` once.
    ///
    /// `init` receives the root account and returns the accounts every
    /// later run should see.
    pub async fn create<F, Fut>(
        connector: Arc<dyn Connector>,
        key_store: Arc<dyn KeyStore>,
        input: RunnerInput<F>,
    ) -> RunnerResult<Self>
    where
        F: FnOnce(Account) -> Fut,
        Fut: Future<Output = RunnerResult<NamedAccounts>>,
    {
        crate::init_logging();

        let (settings, init) = input.resolve()?;
        let settings = Arc::new(settings);
        info!("Creating runner on {}", settings.network_id());

        if settings.is_sandbox() {
            Self::create_sandbox(settings, connector, key_store, init).await
        } else {
            Self::create_testnet(settings, connector, key_store, init).await
        }
    }

    async fn create_sandbox<F, Fut>(
        settings: Arc<Settings>,
        connector: Arc<dyn Connector>,
        key_store: Arc<dyn KeyStore>,
        init: F,
    ) -> RunnerResult<Self>
    where
        F: FnOnce(Account) -> Fut,
        Fut: Future<Output = RunnerResult<NamedAccounts>>,
    {
        let home = HomeDir::create(&settings.sandbox.home_root()).await?;
        SandboxServer::init_home(&settings.sandbox, &home).await?;

        let validator = home.validator_key().await?;
        let root_key = connector.key_pair_from_secret(&validator.secret_key)?;
        key_store
            .set_key(settings.network_id(), &validator.account_id, root_key)
            .await?;

        let mut server = SandboxServer::new(settings.sandbox.clone(), home).await?;
        let provider = server.start(connector.as_ref()).await?;

        let runtime = Runtime::new(
            settings.clone(),
            provider,
            key_store.clone(),
            connector.clone(),
            GasMeter::new(),
        );
        let accounts = init(runtime.account(validator.account_id.clone())).await;
        let snapshot = server.into_home().await?;
        let accounts = accounts?;

        debug!(
            "Sandbox snapshot at {} with {} accounts",
            snapshot.path().display(),
            accounts.len()
        );

        Ok(Self {
            settings,
            connector,
            key_store,
            root_id: validator.account_id,
            account_ids: account_ids(accounts),
            snapshot: Some(snapshot),
        })
    }

    async fn create_testnet<F, Fut>(
        settings: Arc<Settings>,
        connector: Arc<dyn Connector>,
        key_store: Arc<dyn KeyStore>,
        init: F,
    ) -> RunnerResult<Self>
    where
        F: FnOnce(Account) -> Fut,
        Fut: Future<Output = RunnerResult<NamedAccounts>>,
    {
        let network = &settings.network;
        let (rpc_url, funding_id, secret_key) = match (
            network.rpc_url.as_deref(),
            network.root_account.clone(),
            network.root_secret_key.as_deref(),
        ) {
            (Some(rpc_url), Some(funding_id), Some(secret_key)) => {
                (rpc_url, funding_id, secret_key)
            }
            _ => {
                return Err(RunnerError::Config(
                    "testnet requires rpc_url, root_account and root_secret_key".to_string(),
                ))
            }
        };

        let provider = connector.connect(rpc_url).await?;
        key_store
            .set_key(
                settings.network_id(),
                &funding_id,
                connector.key_pair_from_secret(secret_key)?,
            )
            .await?;

        let runtime = Runtime::new(
            settings.clone(),
            provider,
            key_store.clone(),
            connector.clone(),
            GasMeter::new(),
        );
        let parent = runtime
            .account(funding_id)
            .create_account(
                &run_scoped_name(Utc::now()),
                CreateAccountOptions::default()
                    .with_initial_balance(settings.accounts.runner_balance()),
            )
            .await?;
        info!("Runner parent account is {}", parent.id());

        let root_id = parent.id().clone();
        let accounts = init(parent).await?;

        Ok(Self {
            settings,
            connector,
            key_store,
            root_id,
            account_ids: account_ids(accounts),
            snapshot: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn root_id(&self) -> &AccountId {
        &self.root_id
    }

    /// Run `f` against the state left by setup
    pub async fn run<F, Fut, T>(&self, f: F) -> RunnerResult<T>
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: Future<Output = RunnerResult<T>>,
    {
        match &self.snapshot {
            Some(snapshot) => {
                let home = HomeDir::create(&self.settings.sandbox.home_root()).await?;
                home.copy_from(snapshot.path()).await?;

                let mut server = SandboxServer::new(self.settings.sandbox.clone(), home).await?;
                let provider = server.start(self.connector.as_ref()).await?;
                let result = self.run_with(provider, f).await;
                finish_run(result, server.stop().await)
            }
            None => {
                let rpc_url = self.settings.network.rpc_url.as_deref().ok_or_else(|| {
                    RunnerError::Config("testnet requires rpc_url".to_string())
                })?;
                let provider = self.connector.connect(rpc_url).await?;
                self.run_with(provider, f).await
            }
        }
    }

    async fn run_with<F, Fut, T>(&self, provider: Arc<dyn Provider>, f: F) -> RunnerResult<T>
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: Future<Output = RunnerResult<T>>,
    {
        let gas = GasMeter::new();
        let runtime = Runtime::new(
            self.settings.clone(),
            provider,
            self.key_store.clone(),
            self.connector.clone(),
            gas.clone(),
        );

        let context = TestContext {
            root: runtime.account(self.root_id.clone()),
            accounts: self
                .account_ids
                .iter()
                .map(|(name, id)| (name.clone(), runtime.account(id.clone())))
                .collect(),
            gas: gas.clone(),
        };

        gas.reset().await;
        f(context).await
    }
}

/// The body's result wins over a failure to stop the server
fn finish_run<T>(result: RunnerResult<T>, stopped: RunnerResult<()>) -> RunnerResult<T> {
    match (result, stopped) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(stop_error)) => {
            warn!("Failed to stop sandbox after failed run: {}", stop_error);
            Err(e)
        }
    }
}

fn account_ids(accounts: NamedAccounts) -> BTreeMap<String, AccountId> {
    accounts
        .into_iter()
        .map(|(name, account)| (name, account.id().clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::FakeConnector;
    use crate::chain::MockProvider;
    use crate::keys::InMemoryKeyStore;
    use crate::types::{
        AccessKeyView, Action, CryptoHash, ExecutionOutcome, ExecutionStatus, GasValue,
        OutcomeView, ONE_NEAR,
    };

    use chrono::TimeZone;

    fn success(gas_burnt: u64) -> ExecutionOutcome {
        ExecutionOutcome {
            transaction_hash: CryptoHash([5; 32]),
            status: ExecutionStatus::SuccessNoValue,
            transaction_outcome: OutcomeView {
                id: CryptoHash([6; 32]),
                executor_id: "runner.testnet".parse().unwrap(),
                logs: Vec::new(),
                gas_burnt,
                status: ExecutionStatus::SuccessNoValue,
            },
            receipts_outcome: Vec::new(),
        }
    }

    fn testnet_provider() -> MockProvider {
        let mut provider = MockProvider::new();
        provider.expect_view_access_key().returning(|_, _| {
            Ok(AccessKeyView {
                nonce: 1,
                block_hash: CryptoHash([2; 32]),
            })
        });
        provider
            .expect_send_transaction()
            .returning(|_| Ok(success(250)));
        provider
    }

    #[test]
    fn test_run_scoped_name_is_valid_sub_account() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        let name = run_scoped_name(now);
        assert!(name.starts_with("run-20261019083000-"));
        assert_eq!(name.len(), "run-20261019083000-".len() + 8);

        let root: AccountId = "runner.testnet".parse().unwrap();
        assert!(root.sub_account(&name).is_ok());
        assert_ne!(name, run_scoped_name(now));
    }

    #[tokio::test]
    async fn test_testnet_setup_creates_parent_and_named_accounts() {
        let provider: Arc<dyn Provider> = Arc::new(testnet_provider());
        let connector = FakeConnector::new(provider);
        let key_store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let settings = Settings::testnet("runner.testnet".parse().unwrap(), "fake:1");

        let runner = Runner::create(
            connector,
            key_store.clone(),
            RunnerInput::Config(settings, |root: Account| async move {
                let alice = root
                    .create_account("alice", CreateAccountOptions::default())
                    .await?;
                let mut accounts = NamedAccounts::new();
                accounts.insert("alice".to_string(), alice);
                Ok::<_, RunnerError>(accounts)
            }),
        )
        .await
        .unwrap();

        let funding: AccountId = "runner.testnet".parse().unwrap();
        assert!(runner.root_id().is_sub_account_of(&funding));
        assert!(runner.root_id().as_str().starts_with("run-"));
        assert!(key_store
            .get_key("testnet", runner.root_id())
            .await
            .unwrap()
            .is_some());

        let alice_id = runner
            .run(|context| async move {
                let alice = context.account("alice")?;
                assert!(alice.id().is_sub_account_of(context.root.id()));
                assert!(context.account("bob").is_err());
                Ok::<_, RunnerError>(alice.id().clone())
            })
            .await
            .unwrap();
        assert!(alice_id.as_str().starts_with("alice.run-"));
    }

    #[tokio::test]
    async fn test_each_run_has_its_own_gas_meter() {
        let provider: Arc<dyn Provider> = Arc::new(testnet_provider());
        let connector = FakeConnector::new(provider);
        let settings = Settings::testnet("runner.testnet".parse().unwrap(), "fake:1");

        let runner = Runner::create(
            connector,
            Arc::new(InMemoryKeyStore::new()),
            RunnerInput::Config(settings, |_root: Account| async move {
                Ok(NamedAccounts::new())
            }),
        )
        .await
        .unwrap();

        for _ in 0..2 {
            let elapsed = runner
                .run(|context| async move {
                    assert!(context.gas.elapsed().await.is_zero());
                    let receiver: AccountId = "bob.testnet".parse().unwrap();
                    context
                        .root
                        .send_actions(receiver, vec![Action::transfer(ONE_NEAR)])
                        .await?;
                    Ok::<_, RunnerError>(context.gas.elapsed().await)
                })
                .await
                .unwrap();
            assert_eq!(elapsed, GasValue::from(250u64));
        }
    }

    #[test]
    fn test_run_error_is_kept_when_stop_fails() {
        let stop_failed = || Err(RunnerError::Sandbox("kill failed".to_string()));

        let result: RunnerResult<u32> = finish_run(
            Err(RunnerError::Config("assertion".to_string())),
            stop_failed(),
        );
        assert!(matches!(result, Err(RunnerError::Config(message)) if message == "assertion"));

        let result = finish_run(Ok(7u32), stop_failed());
        assert!(matches!(result, Err(RunnerError::Sandbox(_))));

        assert!(matches!(finish_run(Ok(7u32), Ok(())), Ok(7)));
    }

    #[tokio::test]
    async fn test_init_error_is_returned() {
        let provider: Arc<dyn Provider> = Arc::new(testnet_provider());
        let settings = Settings::testnet("runner.testnet".parse().unwrap(), "fake:1");

        let result = Runner::create(
            FakeConnector::new(provider),
            Arc::new(InMemoryKeyStore::new()),
            RunnerInput::Config(settings, |_root: Account| async move {
                Err::<NamedAccounts, _>(RunnerError::Config("setup failed".to_string()))
            }),
        )
        .await;
        assert!(matches!(result, Err(RunnerError::Config(message)) if message == "setup failed"));
    }

    #[tokio::test]
    async fn test_sandbox_without_binary_fails_setup() {
        let root = tempfile::tempdir().unwrap();
        let mut settings = Settings::sandbox();
        settings.sandbox.binary = "/nonexistent/near-sandbox".to_string();
        settings.sandbox.home_root = Some(root.path().to_path_buf());

        let result = Runner::create(
            FakeConnector::new(Arc::new(MockProvider::new())),
            Arc::new(InMemoryKeyStore::new()),
            RunnerInput::Config(settings, |_root: Account| async move {
                Ok(NamedAccounts::new())
            }),
        )
        .await;

        assert!(matches!(result, Err(RunnerError::Sandbox(_))));
        // the failed home directory is cleaned up
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
