use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use cpwatch_core::{VersionInfo, WebWorkflowClient};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::sync::engine::{SyncEngine, SyncSettings};
use crate::sync::ignore::{DEFAULT_IGNORED_EXTENSIONS, DEFAULT_IGNORED_NAMES, IgnoreMatcher};

const ENV_ADDRESS: &str = "CPWATCH_ADDRESS";
const ENV_PASSWORD: &str = "CPWATCH_PASSWORD";
const ENV_LOCAL_ROOT: &str = "CPWATCH_LOCAL_ROOT";
const ENV_REMOTE_POLL_SECS: &str = "CPWATCH_REMOTE_POLL_SECS";
const ENV_WRITABLE_POLL_SECS: &str = "CPWATCH_WRITABLE_POLL_SECS";
const ENV_DEBOUNCE_MS: &str = "CPWATCH_DEBOUNCE_MS";
const ENV_IGNORE_NAMES: &str = "CPWATCH_IGNORE_NAMES";
const ENV_IGNORE_EXTENSIONS: &str = "CPWATCH_IGNORE_EXTENSIONS";

const DEFAULT_LOCAL_ROOT: &str = "./CIRCUITPYTHON";
const DEFAULT_REMOTE_POLL_SECS: u64 = 120;
const DEFAULT_WRITABLE_POLL_SECS: u64 = 5;
const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is required (set {env} or pass {flag})")]
    Missing {
        name: &'static str,
        env: &'static str,
        flag: &'static str,
    },
    #[error("{name} must be a whole number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("home directory is unavailable")]
    NoHome,
}

/// Values given on the command line; each one wins over its environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub address: Option<String>,
    pub password: Option<String>,
    pub local_root: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub address: String,
    pub password: String,
    pub local_root: PathBuf,
    pub remote_poll_interval: Duration,
    pub writable_poll_interval: Duration,
    pub debounce: Duration,
    /// Added to the built-in ignore lists.
    pub extra_ignored_names: Vec<String>,
    pub extra_ignored_extensions: Vec<String>,
}

impl DaemonConfig {
    pub fn from_env(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::resolve(|name| std::env::var(name).ok(), overrides)
    }

    pub fn resolve<F>(lookup: F, overrides: CliOverrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = overrides
            .address
            .or_else(|| lookup(ENV_ADDRESS))
            .unwrap_or_default();
        let password = overrides
            .password
            .or_else(|| lookup(ENV_PASSWORD))
            .unwrap_or_default();
        let local_root = overrides
            .local_root
            .or_else(|| lookup(ENV_LOCAL_ROOT))
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOCAL_ROOT.to_string());

        let config = Self {
            address: address.trim().to_string(),
            password,
            local_root: resolve_local_root(local_root.trim())?,
            remote_poll_interval: Duration::from_secs(read_u64_env(
                &lookup,
                ENV_REMOTE_POLL_SECS,
                DEFAULT_REMOTE_POLL_SECS,
            )?),
            writable_poll_interval: Duration::from_secs(read_u64_env(
                &lookup,
                ENV_WRITABLE_POLL_SECS,
                DEFAULT_WRITABLE_POLL_SECS,
            )?),
            debounce: Duration::from_millis(read_u64_env(
                &lookup,
                ENV_DEBOUNCE_MS,
                DEFAULT_DEBOUNCE_MS,
            )?),
            extra_ignored_names: read_list_env(&lookup, ENV_IGNORE_NAMES),
            extra_ignored_extensions: read_list_env(&lookup, ENV_IGNORE_EXTENSIONS),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::Missing {
                name: "device address",
                env: ENV_ADDRESS,
                flag: "--address",
            });
        }
        if self.password.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "web workflow password",
                env: ENV_PASSWORD,
                flag: "--password",
            });
        }
        if self.remote_poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval(ENV_REMOTE_POLL_SECS));
        }
        if self.writable_poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval(ENV_WRITABLE_POLL_SECS));
        }
        Ok(())
    }

    pub fn ignore_matcher(&self) -> IgnoreMatcher {
        IgnoreMatcher::new(
            DEFAULT_IGNORED_NAMES
                .iter()
                .map(|name| name.to_string())
                .chain(self.extra_ignored_names.iter().cloned()),
            DEFAULT_IGNORED_EXTENSIONS
                .iter()
                .copied()
                .chain(self.extra_ignored_extensions.iter().map(String::as_str)),
        )
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            remote_poll_interval: self.remote_poll_interval,
            writable_poll_interval: self.writable_poll_interval,
            debounce: self.debounce,
        }
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: SyncEngine,
}

impl DaemonRuntime {
    /// Probes the device, then replaces the local mirror with a full pull.
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let client = WebWorkflowClient::new(&config.address, config.password.clone())
            .with_context(|| format!("invalid device address {:?}", config.address))?;
        Self::bootstrap_with_client(config, client).await
    }

    async fn bootstrap_with_client(
        config: DaemonConfig,
        client: WebWorkflowClient,
    ) -> anyhow::Result<Self> {
        let version = probe_device(&client).await?;
        info!(
            hostname = version.hostname.as_deref().unwrap_or("?"),
            board = version.board_name.as_deref().unwrap_or("?"),
            web_api_version = version.web_api_version,
            "connected to device"
        );

        let engine = SyncEngine::new(
            client,
            &config.local_root,
            config.sync_settings(),
            CancellationToken::new(),
        )
        .with_context(|| format!("invalid local root {:?}", config.local_root))?
        .with_ignore(config.ignore_matcher());
        engine
            .bootstrap()
            .await
            .with_context(|| format!("full pull into {:?} failed", engine.local_root()))?;

        Ok(Self { config, engine })
    }

    pub fn local_root(&self) -> &Path {
        self.engine.local_root()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            address = %self.config.address,
            root = %self.engine.local_root().display(),
            "started"
        );

        let cancel = self.engine.cancel_token();
        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested");
                    cancel.cancel();
                }
                Err(err) => warn!(error = %err, "failed to listen for ctrl-c"),
            }
        });

        let result = self.engine.run().await.context("sync engine failed");
        signal_handle.abort();
        result
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
