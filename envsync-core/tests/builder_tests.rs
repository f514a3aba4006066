//! Snapshot builder over decoded controller documents.

use envsync_core::{
    builder::{build, build_deleted},
    comparator::environments_equal,
    documents::{decode_application, ManagedResources, ResourceTree},
    types::{HealthStatus, SyncStatus},
    BuildError,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn application() -> Value {
    json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Application",
        "metadata": {"name": "svc1", "uid": "3c1d-app", "namespace": "argocd"},
        "spec": {
            "project": "payments",
            "source": {"repoURL": "https://git.example.com/svc1.git", "targetRevision": "HEAD"},
            "destination": {"server": "https://kubernetes.default.svc", "namespace": "svc1"},
            "syncPolicy": {"automated": {"prune": true, "selfHeal": true}}
        },
        "status": {
            "sync": {"status": "Synced", "revision": "9f1c2e"},
            "health": {"status": "Healthy"},
            "history": [
                {"id": 4, "revision": "7aa001", "deployedAt": "2024-02-28T09:00:00Z"},
                {"id": 5, "revision": "9f1c2e", "deployedAt": "2024-03-01T10:00:00Z"}
            ],
            "operationState": {"finishedAt": "2024-03-01T10:00:05Z"}
        }
    })
}

fn tree() -> ResourceTree {
    serde_json::from_value(json!({
        "nodes": [
            {"kind": "Deployment", "name": "api", "uid": "dep-api", "health": {"status": "Healthy"}},
            {"kind": "ReplicaSet", "name": "api-7d9", "uid": "rs-api",
             "parentRefs": [{"kind": "Deployment", "name": "api", "uid": "dep-api"}],
             "health": {"status": "Progressing"}},
            {"kind": "Deployment", "name": "worker", "uid": "dep-worker", "health": {"status": "Degraded"}}
        ]
    }))
    .expect("tree fixture")
}

fn workload(uid: &str, replicas: i64, ready: i64, images: &[&str]) -> String {
    let containers: Vec<Value> = images.iter().map(|i| json!({"name": "c", "image": i})).collect();
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"uid": uid},
        "spec": {"replicas": replicas, "template": {"spec": {"containers": containers}}},
        "status": {"replicas": replicas, "readyReplicas": ready}
    })
    .to_string()
}

fn managed() -> ManagedResources {
    serde_json::from_value(json!({
        "items": [
            {"kind": "Service", "name": "api", "targetState": "{}", "liveState": "{}"},
            {"kind": "Deployment", "name": "api",
             "targetState": workload("", 4, 0, &["registry/api:2", "envoy:1"]),
             "liveState": workload("dep-api", 3, 2, &["registry/api:1", "envoy:1"])},
            {"kind": "Deployment", "name": "worker",
             "targetState": workload("", 1, 0, &["registry/worker:7"]),
             "liveState": "null"}
        ]
    }))
    .expect("managed fixture")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn full_application_builds_complete_snapshot() {
    let app = decode_application(&application()).expect("decode");
    let env = build(&app, Some(&tree()), &managed()).expect("build");

    assert_eq!(env.name.0, "svc1");
    assert_eq!(env.health_status, HealthStatus::Healthy);
    assert_eq!(env.sync_status, SyncStatus::Synced);
    assert_eq!(env.history_id, 5);
    assert_eq!(env.revision, "9f1c2e");
    assert_eq!(env.repo_url, "https://git.example.com/svc1.git");
    assert!(env.sync_policy.auto_sync);
    assert!(env.finished_at.is_some());

    assert_eq!(env.activities.len(), 2, "Service is not a workload");
    let api = &env.activities[0];
    assert_eq!(api.name, "api");
    assert_eq!(api.status, "Healthy");
    assert_eq!(api.target_images, vec!["registry/api:2", "envoy:1"]);
    assert_eq!(api.live_images, vec!["registry/api:1", "envoy:1"]);
    assert_eq!(api.replicas.from.current, 3);
    assert_eq!(api.replicas.from.desired, 3);
    assert_eq!(api.replicas.to.current, 2);
    assert_eq!(api.replicas.to.desired, 4);

    let worker = &env.activities[1];
    assert_eq!(worker.status, "Unknown", "no live state means no tree node");
    assert!(worker.live_images.is_empty());
    assert_eq!(worker.replicas.to.desired, 1);
}

#[test]
fn two_builds_from_the_same_documents_are_equal() {
    let first = {
        let app = decode_application(&application()).expect("decode");
        build(&app, Some(&tree()), &managed()).expect("build")
    };
    let second = {
        let app = decode_application(&application()).expect("decode");
        build(&app, Some(&tree()), &managed()).expect("build")
    };
    assert!(environments_equal(&first, &second));
}

#[test]
fn revision_falls_back_to_last_history_entry() {
    let mut object = application();
    object["status"]["sync"]["revision"] = Value::Null;
    let app = decode_application(&object).expect("decode");
    let env = build(&app, Some(&tree()), &ManagedResources::default()).expect("build");
    assert_eq!(env.revision, "9f1c2e");
}

#[test]
fn freshly_created_application_is_valid_with_unknown_status() {
    let object = json!({"metadata": {"name": "new-app", "uid": "u-new"}});
    let app = decode_application(&object).expect("decode");
    let env = build(&app, None, &ManagedResources::default()).expect("build");
    assert_eq!(env.health_status, HealthStatus::Unknown);
    assert_eq!(env.sync_status, SyncStatus::Unknown);
    assert!(env.activities.is_empty());
}

#[test]
fn corrupt_live_state_is_build_error_naming_the_resource() {
    let app = decode_application(&application()).expect("decode");
    let managed: ManagedResources = serde_json::from_value(json!({
        "items": [{"kind": "Deployment", "name": "api", "liveState": "{truncated"}]
    }))
    .expect("managed");

    let err = build(&app, Some(&tree()), &managed).unwrap_err();
    assert!(matches!(err, BuildError::InvalidState { side: "live", .. }), "got: {err}");
    assert!(err.to_string().contains("Deployment/api"));
}

#[test]
fn deleted_snapshot_keeps_identity_and_drops_activities() {
    let app = decode_application(&application()).expect("decode");
    let env = build_deleted(&app).expect("build");
    assert_eq!(env.health_status, HealthStatus::Deleted);
    assert_eq!(env.history_id, 5);
    assert!(env.activities.is_empty());
}
