//! Agent configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.envsync/
//!   config.yaml   (mode 0600, written by `envsync init`)
//! ```
//!
//! Every function that touches disk has an `_at(home: &Path, …)` form used
//! by tests; the no-arg wrappers derive `home` from `dirs::home_dir()`.
//! Secrets may be supplied through `ENVSYNC_*_TOKEN` variables instead of
//! the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const REMOTE_TOKEN_ENV: &str = "ENVSYNC_REMOTE_TOKEN";
pub const ARGOCD_TOKEN_ENV: &str = "ENVSYNC_ARGOCD_TOKEN";
pub const CLUSTER_TOKEN_ENV: &str = "ENVSYNC_CLUSTER_TOKEN";

/// Remote service endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
}

/// GitOps controller API (resource trees and managed resources).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgoConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
}

/// Kubernetes API server used for the watch streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub api_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub remote: RemoteConfig,
    pub argocd: ArgoConfig,
    pub cluster: ClusterConfig,
    /// Remote environments of any other type are ignored.
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_watch_retry")]
    pub watch_retry_secs: u64,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_namespace() -> String {
    "argocd".to_string()
}

fn default_source_type() -> String {
    "argo".to_string()
}

fn default_reconcile_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_watch_retry() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig {
                url: "https://g.codefresh.io".to_string(),
                token: String::new(),
            },
            argocd: ArgoConfig {
                url: "https://argocd-server.argocd.svc".to_string(),
                token: String::new(),
            },
            cluster: ClusterConfig {
                api_url: "https://kubernetes.default.svc".to_string(),
                token: String::new(),
                namespace: default_namespace(),
            },
            source_type: default_source_type(),
            reconcile_interval_secs: default_reconcile_interval(),
            request_timeout_secs: default_request_timeout(),
            watch_retry_secs: default_watch_retry(),
            log_format: LogFormat::default(),
        }
    }
}

impl AgentConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn watch_retry(&self) -> Duration {
        Duration::from_secs(self.watch_retry_secs)
    }

    /// Overlay non-empty token variables from `lookup` onto the config.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(token) = pick(REMOTE_TOKEN_ENV) {
            self.remote.token = token;
        }
        if let Some(token) = pick(ARGOCD_TOKEN_ENV) {
            self.argocd.token = token;
        }
        if let Some(token) = pick(CLUSTER_TOKEN_ENV) {
            self.cluster.token = token;
        }
    }
}

/// Reject configs the agent cannot run with.
pub fn validate(config: &AgentConfig) -> Result<(), ConfigError> {
    for (field, url) in [
        ("remote.url", &config.remote.url),
        ("argocd.url", &config.argocd.url),
        ("cluster.api_url", &config.cluster.api_url),
    ] {
        if url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{field} must not be empty")));
        }
    }
    if config.reconcile_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "reconcile_interval_secs must be greater than zero".to_string(),
        ));
    }
    if config.source_type.trim().is_empty() {
        return Err(ConfigError::Invalid("source_type must not be empty".to_string()));
    }
    Ok(())
}

/// `<home>/.envsync/`
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".envsync")
}

/// `<home>/.envsync/config.yaml`, pure.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join("config.yaml")
}

/// Load the config file, apply `ENVSYNC_*_TOKEN` overrides and validate.
pub fn load_at(home: &Path) -> Result<AgentConfig, ConfigError> {
    let mut config = read_at(home)?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    validate(&config)?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<AgentConfig, ConfigError> {
    load_at(&home()?)
}

/// Parse the config file as written, without overrides or validation.
pub fn read_at(home: &Path) -> Result<AgentConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// Write `config` atomically (`config.yaml.tmp` then rename), mode `0600`.
pub fn save_at(home: &Path, config: &AgentConfig) -> Result<PathBuf, ConfigError> {
    let dir = config_dir_at(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let path = config_path_at(home);
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
