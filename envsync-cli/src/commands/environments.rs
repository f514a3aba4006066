//! `envsync environments`: the remote listing as the agent would see it.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use envsync_core::config;
use envsync_daemon::{request_status, DaemonError};
use envsync_sync::{http::HttpRemoteService, RemoteService};

use super::agent::string_list;
use super::home_dir;

#[derive(Args, Debug)]
pub struct EnvironmentsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "environment")]
    name: String,
    #[tabled(rename = "application")]
    application: String,
    #[tabled(rename = "known to agent")]
    known: String,
}

impl EnvironmentsArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = config::load_at(&home)
            .context("failed to load config; run `envsync init` first")?;

        let remote = HttpRemoteService::new(
            &config.remote.url,
            &config.remote.token,
            config.request_timeout(),
        );
        let listing = remote
            .list_environments(&config.source_type)
            .with_context(|| format!("failed to list environments from {}", config.remote.url))?;

        let known = known_environments(&home)?;
        let rows: Vec<EnvironmentRow> = listing
            .iter()
            .map(|descriptor| EnvironmentRow {
                name: descriptor.name().to_string(),
                application: descriptor.spec.application.clone(),
                known: match &known {
                    Some(set) if set.contains(descriptor.name()) => "yes".to_string(),
                    Some(_) => "no".to_string(),
                    None => "-".to_string(),
                },
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to render environments JSON")?
            );
            return Ok(());
        }

        println!(
            "{} environments of type '{}'",
            rows.len(),
            config.source_type.bold()
        );
        if known.is_none() {
            println!("{}", "agent not running; known column unavailable".bright_black());
        }
        if !rows.is_empty() {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        Ok(())
    }
}

/// Names the running agent has discovered, or `None` when it is not running.
fn known_environments(home: &std::path::Path) -> Result<Option<BTreeSet<String>>> {
    match request_status(home) {
        Ok(status) => Ok(Some(
            string_list(&status["known_environments"]).into_iter().collect(),
        )),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(None),
        Err(err) => Err(err).context("failed to query agent status"),
    }
}
