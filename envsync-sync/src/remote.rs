//! Collaborator seams: the remote service and the cluster controller API.
//!
//! Both are synchronous; the daemon calls them from blocking threads.

use std::fmt;

use serde_json::Value;

use envsync_core::{
    documents::{ManagedResources, ResourceTree},
    Environment, EnvironmentDescriptor, Heartbeat,
};

use crate::error::RemoteError;

/// Which inventory a push replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryKind {
    Applications,
    Projects,
}

impl InventoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryKind::Applications => "applications",
            InventoryKind::Projects => "projects",
        }
    }
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The third-party service whose view of environments is kept current.
pub trait RemoteService: Send + Sync {
    /// Environments registered for `source_type`.
    fn list_environments(&self, source_type: &str)
        -> Result<Vec<EnvironmentDescriptor>, RemoteError>;

    /// Upsert one snapshot.
    fn publish_environment(&self, environment: &Environment) -> Result<(), RemoteError>;

    /// Replace the full inventory of `kind` with `items` (a JSON array).
    fn publish_inventory(&self, kind: InventoryKind, items: &Value) -> Result<(), RemoteError>;

    /// Report agent liveness and the last tick's error, if any.
    fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), RemoteError>;
}

/// Read access to the GitOps controller's view of one application.
pub trait ClusterSource: Send + Sync {
    /// The raw application resource.
    fn application(&self, name: &str) -> Result<Value, RemoteError>;

    /// `Ok(None)` when the application has not produced a tree yet.
    fn resource_tree(&self, name: &str) -> Result<Option<ResourceTree>, RemoteError>;

    fn managed_resources(&self, name: &str) -> Result<ManagedResources, RemoteError>;
}
