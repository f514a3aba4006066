//! Domain types for environment synchronisation.
//!
//! The [`Environment`] snapshot is the unit of state pushed to the remote
//! service. Its serde shape is the remote service's wire format (camelCase).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of an environment, unique within the remote service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvironmentName(pub String);

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EnvironmentName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EnvironmentName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Stable identity of a cluster resource (`metadata.uid`), unlike its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceUid(pub String);

impl fmt::Display for ResourceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ResourceUid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceUid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Aggregate health of an environment.
///
/// Values the controller reports that are not listed here (e.g. `Missing`)
/// map to [`HealthStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Progressing,
    Suspended,
    Deleted,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Healthy" => Self::Healthy,
            "Degraded" => Self::Degraded,
            "Progressing" => Self::Progressing,
            "Suspended" => Self::Suspended,
            "Deleted" => Self::Deleted,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Degraded => "Degraded",
            Self::Progressing => "Progressing",
            Self::Suspended => "Suspended",
            Self::Deleted => "Deleted",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the live state matches the desired state in source control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SyncStatus {
    Synced,
    OutOfSync,
    #[default]
    Unknown,
}

impl SyncStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Synced" => Self::Synced,
            "OutOfSync" => Self::OutOfSync,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "Synced",
            Self::OutOfSync => "OutOfSync",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Environment snapshot
// ---------------------------------------------------------------------------

/// Optional commit details attached to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Commit {
    pub message: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    pub auto_sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplicaState {
    pub current: i64,
    pub desired: i64,
}

/// Replica counts before (`from`) and after (`to`) a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplicaTransition {
    pub from: ReplicaState,
    pub to: ReplicaState,
}

/// Deployment activity of one workload inside an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub target_images: Vec<String>,
    #[serde(default)]
    pub live_images: Vec<String>,
    #[serde(default, rename = "replicaSet")]
    pub replicas: ReplicaTransition,
}

/// Canonical snapshot of one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: EnvironmentName,
    pub health_status: HealthStatus,
    #[serde(rename = "status")]
    pub sync_status: SyncStatus,
    pub history_id: i64,
    pub revision: String,
    pub repo_url: String,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commit: Commit,
    #[serde(default)]
    pub sync_policy: SyncPolicy,
    /// Observed order, kept for display.
    #[serde(default)]
    pub activities: Vec<Activity>,
}

impl Environment {
    /// A snapshot with no observed state yet.
    pub fn empty(name: impl Into<EnvironmentName>) -> Self {
        Self {
            name: name.into(),
            health_status: HealthStatus::Unknown,
            sync_status: SyncStatus::Unknown,
            history_id: 0,
            revision: String::new(),
            repo_url: String::new(),
            finished_at: None,
            commit: Commit::default(),
            sync_policy: SyncPolicy::default(),
            activities: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote service records
// ---------------------------------------------------------------------------

/// One entry of the remote service's environment listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    pub metadata: DescriptorMetadata,
    pub spec: DescriptorSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSpec {
    #[serde(rename = "type")]
    pub source_type: String,
    /// Name of the application the environment tracks.
    #[serde(default)]
    pub application: String,
}

impl EnvironmentDescriptor {
    pub fn new(
        name: impl Into<String>,
        source_type: impl Into<String>,
        application: impl Into<String>,
    ) -> Self {
        Self {
            metadata: DescriptorMetadata { name: name.into() },
            spec: DescriptorSpec {
                source_type: source_type.into(),
                application: application.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Liveness report sent after every reconciliation tick. `error` is empty
/// when the tick succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub error: String,
    pub agent_version: String,
}

/// "An environment with this name is known to exist."
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KnownEnvironment {
    pub name: EnvironmentName,
}

/// Inventory entry pushed for each application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub name: String,
    pub uid: String,
    pub project: String,
    pub namespace: String,
    pub server: String,
}

/// Inventory entry pushed for each project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub uid: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(EnvironmentName::from("svc1").to_string(), "svc1");
        assert_eq!(ResourceUid::from("u-1").to_string(), "u-1");
    }

    #[test]
    fn unknown_controller_health_maps_to_unknown() {
        assert_eq!(HealthStatus::parse("Missing"), HealthStatus::Unknown);
        assert_eq!(HealthStatus::parse("Healthy"), HealthStatus::Healthy);
        assert_eq!(SyncStatus::parse("OutOfSync"), SyncStatus::OutOfSync);
        assert_eq!(SyncStatus::parse(""), SyncStatus::Unknown);
    }

    #[test]
    fn environment_serializes_in_remote_wire_shape() {
        let mut env = Environment::empty("svc1");
        env.history_id = 5;
        env.activities.push(Activity {
            name: "api".to_string(),
            status: "Healthy".to_string(),
            target_images: vec!["api:2".to_string()],
            live_images: vec!["api:1".to_string()],
            replicas: ReplicaTransition::default(),
        });

        let json = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json["name"], "svc1");
        assert_eq!(json["healthStatus"], "Unknown");
        assert_eq!(json["status"], "Unknown");
        assert_eq!(json["historyId"], 5);
        assert_eq!(json["syncPolicy"]["autoSync"], false);
        assert_eq!(json["activities"][0]["targetImages"][0], "api:2");
        assert_eq!(json["activities"][0]["replicaSet"]["to"]["desired"], 0);
    }

    #[test]
    fn descriptor_reads_remote_listing_entry() {
        let raw = r#"{"metadata":{"name":"prod"},"spec":{"type":"argo","application":"guestbook"}}"#;
        let desc: EnvironmentDescriptor = serde_json::from_str(raw).expect("deserialize");
        assert_eq!(desc.name(), "prod");
        assert_eq!(desc.spec.source_type, "argo");
        assert_eq!(desc.spec.application, "guestbook");
    }
}
