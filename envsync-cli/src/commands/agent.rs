//! `envsync run|stop|reconcile`: agent lifecycle over the control socket.

use anyhow::{Context, Result};

use envsync_daemon::{request_reconcile, request_stop, start_blocking, DaemonError};

use super::home_dir;

pub fn run() -> Result<()> {
    let home = home_dir()?;
    start_blocking(&home).context("agent exited with error")
}

pub fn stop() -> Result<()> {
    let home = home_dir()?;
    match request_stop(&home) {
        Ok(()) => {
            println!("agent stop requested");
            Ok(())
        }
        Err(err @ DaemonError::DaemonNotRunning { .. }) => Err(err).context("nothing to stop"),
        Err(err) => Err(err).context("failed to stop agent"),
    }
}

pub fn reconcile() -> Result<()> {
    let home = home_dir()?;
    let data = request_reconcile(&home).context("failed to request reconciliation")?;

    if data.get("skipped").and_then(|v| v.as_bool()).unwrap_or(false) {
        println!("reconciliation already in progress; tick skipped");
        return Ok(());
    }

    let report = &data["report"];
    let discovered = string_list(&report["discovered"]);
    let failed: Vec<String> = report["failed"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|f| {
                    format!(
                        "{} ({})",
                        f["name"].as_str().unwrap_or("?"),
                        f["error"].as_str().unwrap_or("unknown error")
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    println!(
        "listed {} environments, discovered {}, failed {}",
        report["listed"].as_u64().unwrap_or(0),
        discovered.len(),
        failed.len()
    );
    for name in discovered {
        println!("  + {name}");
    }
    for failure in failed {
        println!("  ! {failure}");
    }
    Ok(())
}

pub(crate) fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
