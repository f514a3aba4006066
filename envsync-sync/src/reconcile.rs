//! Reconciliation loop state: the known-environment set and one tick of
//! discovery.
//!
//! A tick lists the remote environments for the managed source type, replaces
//! the known set with the names in that listing, and hands every name that
//! was absent from the previous set to the initialiser exactly once. Ticks
//! never overlap; a tick requested while another runs is skipped.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use envsync_core::{EnvironmentDescriptor, EnvironmentName, Heartbeat};

use crate::error::SyncError;
use crate::publisher::PublishOutcome;
use crate::remote::RemoteService;

/// One environment whose initialisation did not publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryFailure {
    pub name: String,
    pub error: String,
}

/// Result of a completed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub listed: usize,
    pub discovered: Vec<String>,
    pub failed: Vec<DiscoveryFailure>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(ReconcileReport),
    /// Another tick was still running.
    Skipped,
}

#[derive(Debug)]
pub struct Reconciler {
    source_type: String,
    known: RwLock<BTreeSet<EnvironmentName>>,
    running: AtomicBool,
    last_report: Mutex<Option<ReconcileReport>>,
}

/// Clears the running flag however the tick ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(source_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            known: RwLock::new(BTreeSet::new()),
            running: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// Run one tick. `initialize` is called once per newly discovered
    /// environment; its failures are collected in the report.
    ///
    /// A failed listing returns the error and leaves the known set as it was.
    pub fn tick<F>(
        &self,
        remote: &dyn RemoteService,
        mut initialize: F,
    ) -> Result<TickOutcome, SyncError>
    where
        F: FnMut(&EnvironmentDescriptor) -> Result<PublishOutcome, SyncError>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("reconciliation tick skipped: previous tick still running");
            return Ok(TickOutcome::Skipped);
        }
        let _running = RunningGuard(&self.running);

        let listing = remote.list_environments(&self.source_type).map_err(|err| {
            tracing::warn!("environment listing failed, known set kept: {}", err);
            SyncError::from(err)
        })?;

        let discovered = {
            let mut known = self.known.write().unwrap_or_else(PoisonError::into_inner);
            let (next, discovered) = diff_known(&known, &listing);
            *known = next;
            discovered
        };

        let mut report = ReconcileReport {
            listed: listing.len(),
            discovered: Vec::with_capacity(discovered.len()),
            failed: Vec::new(),
            finished_at: Utc::now(),
        };

        for descriptor in discovered {
            let name = descriptor.name().to_string();
            tracing::info!("discovered new environment {}", name);
            match initialize(descriptor) {
                Ok(PublishOutcome::Rejected(err)) => report.failed.push(DiscoveryFailure {
                    name: name.clone(),
                    error: err.to_string(),
                }),
                Ok(_) => {}
                Err(err) => {
                    tracing::error!("failed to initialise environment {}: {}", name, err);
                    report.failed.push(DiscoveryFailure {
                        name: name.clone(),
                        error: err.to_string(),
                    });
                }
            }
            report.discovered.push(name);
        }

        report.finished_at = Utc::now();
        tracing::info!(
            "reconciliation tick done: listed={} discovered={} failed={}",
            report.listed,
            report.discovered.len(),
            report.failed.len()
        );
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(TickOutcome::Completed(report))
    }

    /// Names currently known, sorted.
    pub fn known(&self) -> Vec<EnvironmentName> {
        self.known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn last_report(&self) -> Option<ReconcileReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Report a tick's result to the remote service. Skipped ticks send
/// nothing; a failed tick carries its error text.
///
/// Returns `true` when a heartbeat was sent.
pub fn send_heartbeat(
    remote: &dyn RemoteService,
    outcome: &Result<TickOutcome, SyncError>,
) -> Result<bool, SyncError> {
    let error = match outcome {
        Ok(TickOutcome::Skipped) => return Ok(false),
        Ok(TickOutcome::Completed(_)) => String::new(),
        Err(err) => err.to_string(),
    };
    let heartbeat = Heartbeat {
        error,
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    remote.heartbeat(&heartbeat)?;
    tracing::debug!("heartbeat sent (error: {:?})", heartbeat.error);
    Ok(true)
}

/// Compute the next known set from `listing` and the entries that are new
/// relative to `previous`. Duplicate names in the listing count once.
pub fn diff_known<'a>(
    previous: &BTreeSet<EnvironmentName>,
    listing: &'a [EnvironmentDescriptor],
) -> (BTreeSet<EnvironmentName>, Vec<&'a EnvironmentDescriptor>) {
    let mut next = BTreeSet::new();
    let mut discovered = Vec::new();
    for descriptor in listing {
        let name = EnvironmentName::from(descriptor.name());
        if next.insert(name.clone()) && !previous.contains(&name) {
            discovered.push(descriptor);
        }
    }
    (next, discovered)
}
