//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{json, Value};

use envsync_core::{
    documents::{decode_application, ApplicationDocument, ManagedResources, ResourceTree},
    Environment, EnvironmentDescriptor, Heartbeat,
};
use envsync_sync::{ClusterSource, InventoryKind, RemoteError, RemoteService};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------------------------------------------------------------------
// Remote service
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRemote {
    listing: Mutex<Vec<EnvironmentDescriptor>>,
    listing_failures: Mutex<VecDeque<RemoteError>>,
    publish_failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    published: Mutex<Vec<Environment>>,
    inventories: Mutex<Vec<(InventoryKind, Value)>>,
    inventory_failure: Mutex<Option<RemoteError>>,
    heartbeats: Mutex<Vec<Heartbeat>>,
}

impl FakeRemote {
    pub fn with_listing(names: &[&str]) -> Self {
        let remote = Self::default();
        remote.set_listing(names);
        remote
    }

    /// Replace the listing with `argo` environments tracking same-named apps.
    pub fn set_listing(&self, names: &[&str]) {
        *self.listing.lock().unwrap() = names
            .iter()
            .map(|name| EnvironmentDescriptor::new(*name, "argo", *name))
            .collect();
    }

    pub fn push_descriptor(&self, descriptor: EnvironmentDescriptor) {
        self.listing.lock().unwrap().push(descriptor);
    }

    pub fn fail_next_listing(&self, err: RemoteError) {
        self.listing_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_publish(&self, name: &str, err: RemoteError) {
        self.publish_failures
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn published(&self) -> Vec<Environment> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_names(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|env| env.name.0)
            .collect()
    }

    pub fn inventories(&self) -> Vec<(InventoryKind, Value)> {
        self.inventories.lock().unwrap().clone()
    }

    /// Every inventory push fails with `err` until cleared with `None`.
    pub fn fail_inventories(&self, err: Option<RemoteError>) {
        *self.inventory_failure.lock().unwrap() = err;
    }

    pub fn heartbeats(&self) -> Vec<Heartbeat> {
        self.heartbeats.lock().unwrap().clone()
    }
}

impl RemoteService for FakeRemote {
    fn list_environments(
        &self,
        source_type: &str,
    ) -> Result<Vec<EnvironmentDescriptor>, RemoteError> {
        if let Some(err) = self.listing_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self
            .listing
            .lock()
            .unwrap()
            .iter()
            .filter(|descriptor| descriptor.spec.source_type == source_type)
            .cloned()
            .collect())
    }

    fn publish_environment(&self, environment: &Environment) -> Result<(), RemoteError> {
        let failure = self
            .publish_failures
            .lock()
            .unwrap()
            .get_mut(&environment.name.0)
            .and_then(VecDeque::pop_front);
        if let Some(err) = failure {
            return Err(err);
        }
        self.published.lock().unwrap().push(environment.clone());
        Ok(())
    }

    fn publish_inventory(&self, kind: InventoryKind, items: &Value) -> Result<(), RemoteError> {
        if let Some(err) = self.inventory_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.inventories.lock().unwrap().push((kind, items.clone()));
        Ok(())
    }

    fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), RemoteError> {
        self.heartbeats.lock().unwrap().push(heartbeat.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCluster {
    apps: Mutex<HashMap<String, Value>>,
    trees: Mutex<HashMap<String, ResourceTree>>,
    managed: Mutex<HashMap<String, ManagedResources>>,
}

impl FakeCluster {
    pub fn add_app(&self, name: &str) {
        self.apps
            .lock()
            .unwrap()
            .insert(name.to_string(), application(name, 1));
        self.trees
            .lock()
            .unwrap()
            .insert(name.to_string(), tree(name, "Healthy"));
        self.managed
            .lock()
            .unwrap()
            .insert(name.to_string(), managed(name, "api:1"));
    }

    pub fn set_managed(&self, name: &str, managed: ManagedResources) {
        self.managed
            .lock()
            .unwrap()
            .insert(name.to_string(), managed);
    }

    pub fn set_health(&self, name: &str, health: &str) {
        self.trees
            .lock()
            .unwrap()
            .insert(name.to_string(), tree(name, health));
    }
}

impl ClusterSource for FakeCluster {
    fn application(&self, name: &str) -> Result<Value, RemoteError> {
        self.apps
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::new(404, "NOT_FOUND", format!("application {name} not found")))
    }

    fn resource_tree(&self, name: &str) -> Result<Option<ResourceTree>, RemoteError> {
        Ok(self.trees.lock().unwrap().get(name).cloned())
    }

    fn managed_resources(&self, name: &str) -> Result<ManagedResources, RemoteError> {
        Ok(self
            .managed
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn application(name: &str, history_id: i64) -> Value {
    json!({
        "metadata": {"name": name, "uid": format!("uid-{name}"), "namespace": "argocd"},
        "spec": {
            "project": "default",
            "source": {"repoURL": format!("https://git.example.com/{name}.git")},
            "destination": {"server": "https://kubernetes.default.svc", "namespace": name}
        },
        "status": {
            "sync": {"status": "Synced", "revision": format!("rev-{history_id}")},
            "history": [{"id": history_id, "revision": format!("rev-{history_id}")}]
        }
    })
}

pub fn app_document(name: &str, history_id: i64) -> ApplicationDocument {
    decode_application(&application(name, history_id)).expect("fixture decodes")
}

pub fn tree(name: &str, health: &str) -> ResourceTree {
    serde_json::from_value(json!({
        "nodes": [
            {"kind": "Application", "name": name, "uid": format!("uid-{name}"),
             "health": {"status": health}},
            {"kind": "Deployment", "name": "api", "uid": format!("dep-{name}"),
             "parentRefs": [{"kind": "Application", "name": name, "uid": format!("uid-{name}")}],
             "health": {"status": health}}
        ]
    }))
    .expect("tree fixture")
}

pub fn managed(name: &str, image: &str) -> ManagedResources {
    let state = |uid: &str| {
        json!({
            "metadata": {"uid": uid},
            "spec": {"replicas": 2, "template": {"spec": {"containers": [{"image": image}]}}},
            "status": {"replicas": 2, "readyReplicas": 2}
        })
        .to_string()
    };
    serde_json::from_value(json!({
        "items": [{
            "kind": "Deployment",
            "name": "api",
            "targetState": state(""),
            "liveState": state(&format!("dep-{name}"))
        }]
    }))
    .expect("managed fixture")
}

pub fn corrupt_managed() -> ManagedResources {
    serde_json::from_value(json!({
        "items": [{"kind": "Deployment", "name": "api", "liveState": "{not json"}]
    }))
    .expect("managed fixture")
}
