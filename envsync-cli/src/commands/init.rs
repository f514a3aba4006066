//! `envsync init [--force]`

use anyhow::{bail, Context, Result};
use clap::Args;

use envsync_core::{config, AgentConfig};

use super::home_dir;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,

    /// Remote service base URL.
    #[arg(long, value_name = "URL")]
    pub remote_url: Option<String>,

    /// Kubernetes API server used for the watch streams.
    #[arg(long, value_name = "URL")]
    pub cluster_url: Option<String>,

    /// Namespace holding the Application and AppProject resources.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Remote environment type managed by this agent.
    #[arg(long, value_name = "TYPE")]
    pub source_type: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "config already exists at {} (use --force to overwrite)",
                path.display()
            );
        }

        let config = self.into_config();
        config::validate(&config).context("refusing to write an invalid config")?;
        let written = config::save_at(&home, &config)
            .with_context(|| format!("failed to write {}", path.display()))?;

        println!("✓ Wrote {}", written.display());
        println!(
            "  Set {} / {} / {} or edit the file to add credentials.",
            config::REMOTE_TOKEN_ENV,
            config::ARGOCD_TOKEN_ENV,
            config::CLUSTER_TOKEN_ENV,
        );
        Ok(())
    }

    fn into_config(self) -> AgentConfig {
        let mut config = AgentConfig::default();
        if let Some(url) = self.remote_url {
            config.remote.url = url;
        }
        if let Some(url) = self.cluster_url {
            config.cluster.api_url = url;
        }
        if let Some(namespace) = self.namespace {
            config.cluster.namespace = namespace;
        }
        if let Some(source_type) = self.source_type {
            config.source_type = source_type;
        }
        config
    }
}
