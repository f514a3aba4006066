//! `envsync status`: agent visibility over the control socket.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use envsync_daemon::{paths::socket_path, request_status, DaemonError};

use super::agent::string_list;
use super::home_dir;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "environment")]
    name: String,
    #[tabled(rename = "last published")]
    last_published: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => json!({
                "running": false,
                "socket": socket_path(&home).display().to_string(),
            }),
            Err(err) => return Err(err).context("failed to query agent status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_status(&status);
        Ok(())
    }
}

fn print_status(status: &Value) {
    if !status["running"].as_bool().unwrap_or(false) {
        println!("running: {}", "false".red().bold());
        return;
    }

    let known = string_list(&status["known_environments"]);
    println!(
        "running: {} | source type {} | {} known environments",
        "true".green().bold(),
        status["source_type"].as_str().unwrap_or("?"),
        known.len(),
    );
    println!(
        "queues: applications={} projects={}",
        status["queues"]["applications"].as_u64().unwrap_or(0),
        status["queues"]["projects"].as_u64().unwrap_or(0),
    );

    let last = &status["last_reconcile"];
    if last.is_null() {
        println!("last reconcile: never");
    } else {
        let failed = last["failed"].as_array().map(Vec::len).unwrap_or(0);
        let summary = format!(
            "listed {} discovered {} failed {}",
            last["listed"].as_u64().unwrap_or(0),
            last["discovered"].as_array().map(Vec::len).unwrap_or(0),
            failed,
        );
        let summary = if failed > 0 {
            summary.yellow().to_string()
        } else {
            summary
        };
        println!(
            "last reconcile: {} ({})",
            format_age(last["finished_at"].as_str()),
            summary
        );
    }

    let rows: Vec<EnvironmentRow> = status["environments"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| EnvironmentRow {
                    name: item["name"].as_str().unwrap_or("?").to_string(),
                    last_published: format_age(item["last_published_at"].as_str()),
                })
                .collect()
        })
        .unwrap_or_default();

    if rows.is_empty() {
        println!("No environments published yet.");
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

/// Render an RFC 3339 timestamp as a relative age ("42s ago").
pub(crate) fn format_age(raw: Option<&str>) -> String {
    let Some(parsed) = raw.and_then(|raw| DateTime::parse_from_rfc3339(raw).ok()) else {
        return "never".to_string();
    };
    let secs = (Utc::now() - parsed.with_timezone(&Utc)).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn age_buckets() {
        let at = |secs: i64| (Utc::now() - Duration::seconds(secs)).to_rfc3339();
        assert_eq!(format_age(Some(&at(5))), "5s ago");
        assert_eq!(format_age(Some(&at(600))), "10m ago");
        assert_eq!(format_age(Some(&at(7300))), "2h ago");
        assert_eq!(format_age(Some(&at(3 * 86_400 + 10))), "3d ago");
    }

    #[test]
    fn missing_or_bad_timestamp_is_never() {
        assert_eq!(format_age(None), "never");
        assert_eq!(format_age(Some("yesterday")), "never");
    }
}
