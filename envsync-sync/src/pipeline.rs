//! Item pipeline shared by the watch workers and the reconciliation loop.
//!
//! A dequeued event becomes a snapshot (Snapshot Builder) and goes through the
//! [`Publisher`]. Add and delete events also push the inventories; a
//! rejected inventory push is logged and never blocks the publish.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use envsync_core::{
    builder,
    documents::{decode_application, ApplicationDocument, ProjectDocument},
    ApplicationSummary, Environment, EnvironmentDescriptor, ProjectSummary, ResourceUid,
};

use crate::error::SyncError;
use crate::inventory::Inventory;
use crate::publisher::{PublishOutcome, Publisher};
use crate::remote::{ClusterSource, InventoryKind, RemoteService};

/// Watch notification kind after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}

/// Queue payload for the application watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationEvent {
    pub kind: EventKind,
    pub app: ApplicationDocument,
}

impl ApplicationEvent {
    pub fn identity(&self) -> ResourceUid {
        self.app.uid.clone()
    }
}

/// Queue payload for the project watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEvent {
    pub kind: EventKind,
    pub project: ProjectDocument,
}

impl ProjectEvent {
    pub fn identity(&self) -> ResourceUid {
        self.project.uid.clone()
    }
}

// ---------------------------------------------------------------------------
// Snapshot assembly
// ---------------------------------------------------------------------------

/// Fetch the tree and managed resources for `app` and build its snapshot.
pub fn snapshot(
    cluster: &dyn ClusterSource,
    app: &ApplicationDocument,
) -> Result<Environment, SyncError> {
    let tree = cluster.resource_tree(&app.name)?;
    let managed = cluster.managed_resources(&app.name)?;
    Ok(builder::build(app, tree.as_ref(), &managed)?)
}

/// First-time initialisation of an environment found by reconciliation.
///
/// The descriptor names the application it tracks; an empty application
/// name falls back to the environment name.
pub fn initialize_environment(
    cluster: &dyn ClusterSource,
    publisher: &Publisher,
    descriptor: &EnvironmentDescriptor,
) -> Result<PublishOutcome, SyncError> {
    let application = match descriptor.spec.application.trim() {
        "" => descriptor.name(),
        name => name,
    };
    tracing::info!(
        "initialising environment {} from application {}",
        descriptor.name(),
        application
    );
    let object = cluster.application(application)?;
    let app = decode_application(&object)?;
    let environment = snapshot(cluster, &app)?;
    publisher.publish(&environment)
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Processes application events, one at a time.
pub struct ApplicationWorker {
    cluster: Arc<dyn ClusterSource>,
    remote: Arc<dyn RemoteService>,
    publisher: Arc<Publisher>,
    inventory: Mutex<Inventory<ApplicationSummary>>,
}

impl ApplicationWorker {
    pub fn new(
        cluster: Arc<dyn ClusterSource>,
        remote: Arc<dyn RemoteService>,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            cluster,
            remote,
            publisher,
            inventory: Mutex::new(Inventory::new(InventoryKind::Applications)),
        }
    }

    pub fn process(&self, event: &ApplicationEvent) -> Result<PublishOutcome, SyncError> {
        let app = &event.app;
        let environment = match event.kind {
            EventKind::Added => {
                self.update_inventory(true, |inventory| {
                    inventory.upsert(app.uid.clone(), app.summary());
                })?;
                snapshot(self.cluster.as_ref(), app)?
            }
            EventKind::Updated => {
                self.update_inventory(false, |inventory| {
                    inventory.upsert(app.uid.clone(), app.summary());
                })?;
                snapshot(self.cluster.as_ref(), app)?
            }
            EventKind::Deleted => {
                self.update_inventory(true, |inventory| {
                    inventory.remove(&app.uid);
                })?;
                builder::build_deleted(app)?
            }
        };
        self.publisher.publish(&environment)
    }

    pub fn inventory_len(&self) -> usize {
        self.lock().len()
    }

    /// Apply `change`, then push when `push` is set. Updates only refresh
    /// the local copy; the next add or delete carries them.
    fn update_inventory<F>(&self, push: bool, change: F) -> Result<bool, SyncError>
    where
        F: FnOnce(&mut Inventory<ApplicationSummary>),
    {
        let mut inventory = self.lock();
        change(&mut inventory);
        if !push {
            return Ok(false);
        }
        tolerate_rejection(InventoryKind::Applications, inventory.push(self.remote.as_ref()))
    }

    fn lock(&self) -> MutexGuard<'_, Inventory<ApplicationSummary>> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Processes project events. Projects only feed the project inventory.
pub struct ProjectWorker {
    remote: Arc<dyn RemoteService>,
    inventory: Mutex<Inventory<ProjectSummary>>,
}

impl ProjectWorker {
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self {
            remote,
            inventory: Mutex::new(Inventory::new(InventoryKind::Projects)),
        }
    }

    /// Returns `true` when the inventory was pushed.
    pub fn process(&self, event: &ProjectEvent) -> Result<bool, SyncError> {
        let mut inventory = self
            .inventory
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match event.kind {
            EventKind::Added => {
                inventory.upsert(event.identity(), event.project.summary());
            }
            EventKind::Updated => {
                inventory.upsert(event.identity(), event.project.summary());
                return Ok(false);
            }
            EventKind::Deleted => {
                inventory.remove(&event.identity());
            }
        }
        tolerate_rejection(InventoryKind::Projects, inventory.push(self.remote.as_ref()))
    }
}

/// A permanently rejected inventory push is logged and treated as not sent.
/// Retryable failures still propagate so the event is requeued.
fn tolerate_rejection(
    kind: InventoryKind,
    result: Result<bool, SyncError>,
) -> Result<bool, SyncError> {
    match result {
        Err(SyncError::Rejected(err)) => {
            tracing::error!(
                "{} inventory push rejected ({} {}): {} [{}]",
                kind,
                err.status,
                err.code,
                err.message,
                err.url
            );
            Ok(false)
        }
        other => other,
    }
}
