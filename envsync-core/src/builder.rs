//! Snapshot builder: application + resource tree + managed resources
//! into one [`Environment`].
//!
//! Aggregate health is the health of the tree's top-level node only; child
//! nodes are consulted solely to give each activity its own status.

use crate::documents::{
    ApplicationDocument, ManagedResourceItem, ManagedResources, ResourceTree, WorkloadState,
};
use crate::error::BuildError;
use crate::types::{
    Activity, Commit, Environment, EnvironmentName, HealthStatus, ReplicaState,
    ReplicaTransition, SyncPolicy, SyncStatus,
};

/// Kinds whose managed resources become activities.
pub const WORKLOAD_KINDS: &[&str] = &[
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
    "Rollout",
];

const UNKNOWN_STATUS: &str = "Unknown";

/// Build a snapshot for a live application.
///
/// `tree` is `None` for an application that has never produced a resource
/// tree; the result then has `Unknown` health and sync status.
pub fn build(
    app: &ApplicationDocument,
    tree: Option<&ResourceTree>,
    managed: &ManagedResources,
) -> Result<Environment, BuildError> {
    let mut env = base_snapshot(app)?;

    if let Some(tree) = tree {
        env.health_status = tree
            .top_level_node()
            .and_then(|node| node.health.as_ref())
            .map(|health| HealthStatus::parse(&health.status))
            .unwrap_or(HealthStatus::Unknown);
        env.sync_status = app
            .sync_status
            .as_deref()
            .map(SyncStatus::parse)
            .unwrap_or(SyncStatus::Unknown);
    }

    let empty = ResourceTree::default();
    let tree = tree.unwrap_or(&empty);
    for item in managed
        .items
        .iter()
        .filter(|item| WORKLOAD_KINDS.contains(&item.kind.as_str()))
    {
        env.activities.push(build_activity(item, tree)?);
    }

    Ok(env)
}

/// Build the snapshot published when an application is deleted.
pub fn build_deleted(app: &ApplicationDocument) -> Result<Environment, BuildError> {
    let mut env = base_snapshot(app)?;
    env.health_status = HealthStatus::Deleted;
    Ok(env)
}

fn base_snapshot(app: &ApplicationDocument) -> Result<Environment, BuildError> {
    if app.name.trim().is_empty() {
        return Err(BuildError::MissingField("metadata.name"));
    }
    if app.uid.0.trim().is_empty() {
        return Err(BuildError::MissingField("metadata.uid"));
    }

    let last = app.history.last();
    let revision = app
        .sync_revision
        .clone()
        .filter(|rev| !rev.is_empty())
        .or_else(|| last.map(|entry| entry.revision.clone()))
        .unwrap_or_default();

    Ok(Environment {
        name: EnvironmentName::from(app.name.clone()),
        health_status: HealthStatus::Unknown,
        sync_status: SyncStatus::Unknown,
        history_id: last.map(|entry| entry.id).unwrap_or(0),
        revision,
        repo_url: app.repo_url.clone(),
        finished_at: app.finished_at,
        commit: Commit::default(),
        sync_policy: SyncPolicy {
            auto_sync: app.auto_sync,
        },
        activities: Vec::new(),
    })
}

fn build_activity(
    item: &ManagedResourceItem,
    tree: &ResourceTree,
) -> Result<Activity, BuildError> {
    let target = parse_state(item, "target", item.target_state.as_deref())?;
    let live = parse_state(item, "live", item.live_state.as_deref())?;

    let status = live
        .as_ref()
        .and_then(|state| tree.node_health(&state.metadata.uid))
        .filter(|status| !status.is_empty())
        .unwrap_or(UNKNOWN_STATUS)
        .to_string();

    let replicas = ReplicaTransition {
        from: ReplicaState {
            current: live.as_ref().and_then(|s| s.status.replicas).unwrap_or(0),
            desired: live.as_ref().and_then(|s| s.spec.replicas).unwrap_or(0),
        },
        to: ReplicaState {
            current: live.as_ref().and_then(|s| s.status.ready_replicas).unwrap_or(0),
            desired: target.as_ref().and_then(|s| s.spec.replicas).unwrap_or(0),
        },
    };

    Ok(Activity {
        name: item.name.clone(),
        status,
        target_images: target.as_ref().map(WorkloadState::images).unwrap_or_default(),
        live_images: live.as_ref().map(WorkloadState::images).unwrap_or_default(),
        replicas,
    })
}

fn parse_state(
    item: &ManagedResourceItem,
    side: &'static str,
    raw: Option<&str>,
) -> Result<Option<WorkloadState>, BuildError> {
    match raw {
        None => Ok(None),
        Some(raw) => WorkloadState::parse(raw).map_err(|source| BuildError::InvalidState {
            resource: format!("{}/{}", item.kind, item.name),
            side,
            source,
        }),
    }
}
