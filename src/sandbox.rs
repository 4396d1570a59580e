//! Local `near-sandbox` node management
//!
//! Each server owns a home directory. The runner initializes one home per
//! runner, then gives every test its own copy so tests never share state.

use crate::chain::{wait_until_ready, Connector, Provider};
use crate::config::SandboxConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::types::AccountId;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Account that owns the sandbox genesis balance
pub const ROOT_ACCOUNT: &str = "test.near";

const VALIDATOR_KEY_FILE: &str = "validator_key.json";
const HOME_DIR_PREFIX: &str = "near-runner-";

/// Contents of `validator_key.json` written by `near-sandbox init`
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorKey {
    pub account_id: AccountId,
    pub public_key: String,
    #[serde(alias = "private_key")]
    pub secret_key: String,
}

/// Sandbox home directory, removed when dropped
#[derive(Debug)]
pub struct HomeDir {
    path: PathBuf,
}

impl HomeDir {
    /// Create a uniquely named directory under `root`
    pub async fn create(root: &Path) -> RunnerResult<Self> {
        let path = root.join(format!("{}{}", HOME_DIR_PREFIX, Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        debug!("Created sandbox home {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively copy the contents of `source` into this directory
    pub async fn copy_from(&self, source: &Path) -> RunnerResult<()> {
        let mut pending = vec![(source.to_path_buf(), self.path.clone())];

        while let Some((from, to)) = pending.pop() {
            tokio::fs::create_dir_all(&to).await?;
            let mut entries = tokio::fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                let target = to.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    tokio::fs::copy(entry.path(), target).await?;
                }
            }
        }

        Ok(())
    }

    pub async fn validator_key(&self) -> RunnerResult<ValidatorKey> {
        let path = self.path.join(VALIDATOR_KEY_FILE);
        let contents = tokio::fs::read(&path).await.map_err(|e| {
            RunnerError::Sandbox(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

impl Drop for HomeDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Failed to remove sandbox home {}: {}", self.path.display(), e);
        }
    }
}

/// Arguments for `near-sandbox init`
pub fn init_args(home: &Path) -> Vec<String> {
    vec![
        "--home".to_string(),
        home.display().to_string(),
        "init".to_string(),
    ]
}

/// Arguments for `near-sandbox run`
pub fn run_args(home: &Path, rpc_port: u16, network_port: u16) -> Vec<String> {
    vec![
        "--home".to_string(),
        home.display().to_string(),
        "run".to_string(),
        "--rpc-addr".to_string(),
        format!("127.0.0.1:{}", rpc_port),
        "--network-addr".to_string(),
        format!("0.0.0.0:{}", network_port),
    ]
}

/// Ask the OS for a port nobody is listening on
pub async fn free_port() -> RunnerResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// A `near-sandbox` process bound to one home directory
pub struct SandboxServer {
    config: SandboxConfig,
    home: HomeDir,
    rpc_port: u16,
    network_port: u16,
    child: Option<Child>,
}

impl SandboxServer {
    /// Write genesis, config and validator key into `home`
    pub async fn init_home(config: &SandboxConfig, home: &HomeDir) -> RunnerResult<()> {
        info!("Initializing sandbox home {}", home.path().display());

        let output = Command::new(&config.binary)
            .args(init_args(home.path()))
            .output()
            .await
            .map_err(|e| {
                RunnerError::Sandbox(format!("cannot run {:?}: {}", config.binary, e))
            })?;

        if !output.status.success() {
            return Err(RunnerError::Sandbox(format!(
                "init exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(())
    }

    /// Allocate ports for a server over an initialized home
    pub async fn new(config: SandboxConfig, home: HomeDir) -> RunnerResult<Self> {
        let rpc_port = free_port().await?;
        let mut network_port = free_port().await?;
        while network_port == rpc_port {
            network_port = free_port().await?;
        }

        Ok(Self {
            config,
            home,
            rpc_port,
            network_port,
            child: None,
        })
    }

    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.rpc_port)
    }

    pub fn home(&self) -> &HomeDir {
        &self.home
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Spawn the node and wait until its RPC answers
    pub async fn start(&mut self, connector: &dyn Connector) -> RunnerResult<Arc<dyn Provider>> {
        if self.child.is_some() {
            return Err(RunnerError::Sandbox("server already running".to_string()));
        }

        let stdout = tokio::fs::File::create(self.home.path().join("sandbox-stdout.log"))
            .await?
            .into_std()
            .await;
        let stderr = tokio::fs::File::create(self.home.path().join("sandbox-stderr.log"))
            .await?
            .into_std()
            .await;

        let child = Command::new(&self.config.binary)
            .args(run_args(self.home.path(), self.rpc_port, self.network_port))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RunnerError::Sandbox(format!("cannot spawn {:?}: {}", self.config.binary, e))
            })?;
        self.child = Some(child);
        crate::metrics::record_sandbox_start();

        info!(
            "Sandbox starting at {} (home {})",
            self.rpc_url(),
            self.home.path().display()
        );

        let provider = connector.connect(&self.rpc_url()).await?;
        if let Err(e) = wait_until_ready(
            provider.as_ref(),
            self.config.start_timeout(),
            self.config.poll_interval(),
        )
        .await
        {
            self.stop().await?;
            return Err(e);
        }

        info!("Sandbox ready at {}", self.rpc_url());
        Ok(provider)
    }

    /// Kill the node process if it is running
    pub async fn stop(&mut self) -> RunnerResult<()> {
        if let Some(mut child) = self.child.take() {
            child.kill().await?;
            debug!("Sandbox at {} stopped", self.rpc_url());
        }
        Ok(())
    }

    /// Stop the node and hand back its home directory
    pub async fn into_home(mut self) -> RunnerResult<HomeDir> {
        self.stop().await?;
        Ok(self.home)
    }
}
