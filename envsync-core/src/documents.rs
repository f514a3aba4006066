//! Typed cluster documents and their schema-validated decode step.
//!
//! Watch payloads arrive as untyped JSON. [`decode_application`] and
//! [`decode_project`] turn them into owned, typed documents or fail with a
//! [`DecodeError`]; a partially-populated document is never handed onwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;
use crate::types::{ApplicationSummary, ProjectSummary, ResourceUid};

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// One deployment recorded in an application's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

/// A decoded application custom resource. Aggregate health is not kept
/// here; the resource tree's top-level node is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDocument {
    pub name: String,
    pub uid: ResourceUid,
    pub namespace: String,
    pub project: String,
    pub repo_url: String,
    pub destination_server: String,
    pub destination_namespace: String,
    pub auto_sync: bool,
    pub sync_status: Option<String>,
    pub sync_revision: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ApplicationDocument {
    pub fn summary(&self) -> ApplicationSummary {
        ApplicationSummary {
            name: self.name.clone(),
            uid: self.uid.0.clone(),
            project: self.project.clone(),
            namespace: self.namespace.clone(),
            server: self.destination_server.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawApplication {
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    spec: RawApplicationSpec,
    #[serde(default)]
    status: RawApplicationStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawApplicationSpec {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    source: RawSource,
    #[serde(default)]
    destination: RawDestination,
    #[serde(default)]
    sync_policy: Option<RawSyncPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSource {
    #[serde(default, rename = "repoURL")]
    repo_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDestination {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSyncPolicy {
    #[serde(default)]
    automated: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawApplicationStatus {
    #[serde(default)]
    sync: RawSyncState,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(default)]
    operation_state: Option<RawOperationState>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSyncState {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    revision: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperationState {
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
}

/// Decode an application resource from a watch payload.
///
/// `metadata.name` and `metadata.uid` are required and must be non-empty.
pub fn decode_application(object: &Value) -> Result<ApplicationDocument, DecodeError> {
    const DOC: &str = "application";
    let raw = RawApplication::deserialize(object)
        .map_err(|source| DecodeError::Malformed { document: DOC, source })?;

    let name = required(raw.metadata.name, DOC, "metadata.name")?;
    let uid = required(raw.metadata.uid, DOC, "metadata.uid")?;
    let auto_sync = raw
        .spec
        .sync_policy
        .and_then(|policy| policy.automated)
        .map(|automated| !automated.is_null())
        .unwrap_or(false);

    Ok(ApplicationDocument {
        name,
        uid: ResourceUid(uid),
        namespace: raw.metadata.namespace.unwrap_or_default(),
        project: raw.spec.project.unwrap_or_default(),
        repo_url: raw.spec.source.repo_url.unwrap_or_default(),
        destination_server: raw.spec.destination.server.unwrap_or_default(),
        destination_namespace: raw.spec.destination.namespace.unwrap_or_default(),
        auto_sync,
        sync_status: raw.status.sync.status,
        sync_revision: raw.status.sync.revision,
        history: raw.status.history,
        finished_at: raw.status.operation_state.and_then(|op| op.finished_at),
    })
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDocument {
    pub name: String,
    pub uid: ResourceUid,
}

impl ProjectDocument {
    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            name: self.name.clone(),
            uid: self.uid.0.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawProject {
    #[serde(default)]
    metadata: RawMetadata,
}

pub fn decode_project(object: &Value) -> Result<ProjectDocument, DecodeError> {
    const DOC: &str = "project";
    let raw = RawProject::deserialize(object)
        .map_err(|source| DecodeError::Malformed { document: DOC, source })?;
    Ok(ProjectDocument {
        name: required(raw.metadata.name, DOC, "metadata.name")?,
        uid: ResourceUid(required(raw.metadata.uid, DOC, "metadata.uid")?),
    })
}

fn required(
    value: Option<String>,
    document: &'static str,
    field: &'static str,
) -> Result<String, DecodeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DecodeError::MissingField { document, field }),
    }
}

// ---------------------------------------------------------------------------
// Resource tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeHealth {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub health: Option<NodeHealth>,
    #[serde(default)]
    pub parent_refs: Vec<NodeRef>,
}

/// Resource hierarchy of an application as reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceTree {
    #[serde(default)]
    pub nodes: Vec<ResourceNode>,
}

impl ResourceTree {
    /// The first node without parent references.
    pub fn top_level_node(&self) -> Option<&ResourceNode> {
        self.nodes.iter().find(|node| node.parent_refs.is_empty())
    }

    /// Health status string of the node with the given uid.
    pub fn node_health(&self, uid: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|node| !uid.is_empty() && node.uid == uid)
            .and_then(|node| node.health.as_ref())
            .map(|health| health.status.as_str())
    }
}

// ---------------------------------------------------------------------------
// Managed resources
// ---------------------------------------------------------------------------

/// One managed resource; its states are JSON-encoded workload objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceItem {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target_state: Option<String>,
    #[serde(default)]
    pub live_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManagedResources {
    #[serde(default)]
    pub items: Vec<ManagedResourceItem>,
}

/// The subset of a workload object the builder reads.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct WorkloadState {
    #[serde(default)]
    pub metadata: WorkloadMetadata,
    #[serde(default)]
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct WorkloadMetadata {
    #[serde(default)]
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub replicas: Option<i64>,
    #[serde(default)]
    pub template: PodTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub replicas: Option<i64>,
    #[serde(default)]
    pub ready_replicas: Option<i64>,
}

impl WorkloadState {
    /// Parse a state string. Empty and `"null"` strings mean "no state".
    pub fn parse(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "null" {
            return Ok(None);
        }
        serde_json::from_str(raw).map(Some)
    }

    /// Container images in declaration order, without duplicates or blanks.
    pub fn images(&self) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        for container in &self.spec.template.spec.containers {
            if !container.image.is_empty() && !images.contains(&container.image) {
                images.push(container.image.clone());
            }
        }
        images
    }
}
