//! Structural equality between environment snapshots.
//!
//! Scalar fields compare exactly. Activities compare as a multiset keyed on
//! name, status, and the target and live image *sets*; replica counts and
//! observed order do not take part.

use std::collections::BTreeSet;

use crate::types::{Activity, Environment};

/// `true` when `a` and `b` describe the same logical state.
pub fn environments_equal(a: &Environment, b: &Environment) -> bool {
    a.name == b.name
        && a.health_status == b.health_status
        && a.sync_status == b.sync_status
        && a.history_id == b.history_id
        && a.revision == b.revision
        && a.repo_url == b.repo_url
        && a.finished_at == b.finished_at
        && activities_equal(&a.activities, &b.activities)
}

/// Order-insensitive multiset comparison of two activity lists.
pub fn activities_equal(a: &[Activity], b: &[Activity]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left: Vec<ActivityKey<'_>> = a.iter().map(ActivityKey::of).collect();
    let mut right: Vec<ActivityKey<'_>> = b.iter().map(ActivityKey::of).collect();
    left.sort();
    right.sort();
    left == right
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ActivityKey<'a> {
    name: &'a str,
    status: &'a str,
    target_images: BTreeSet<&'a str>,
    live_images: BTreeSet<&'a str>,
}

impl<'a> ActivityKey<'a> {
    fn of(activity: &'a Activity) -> Self {
        Self {
            name: &activity.name,
            status: &activity.status,
            target_images: activity.target_images.iter().map(String::as_str).collect(),
            live_images: activity.live_images.iter().map(String::as_str).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthStatus, ReplicaState, ReplicaTransition, SyncStatus};

    fn activity(name: &str, status: &str) -> Activity {
        Activity {
            name: name.to_string(),
            status: status.to_string(),
            target_images: vec![],
            live_images: vec![],
            replicas: ReplicaTransition::default(),
        }
    }

    fn env(activities: Vec<Activity>) -> Environment {
        let mut env = Environment::empty("Test");
        env.health_status = HealthStatus::Healthy;
        env.sync_status = SyncStatus::OutOfSync;
        env.history_id = 12;
        env.revision = "123".to_string();
        env.repo_url = "https://git.example.com/repo.git".to_string();
        env.activities = activities;
        env
    }

    #[test]
    fn same_environment_without_activities_is_equal() {
        assert!(environments_equal(&env(vec![]), &env(vec![])));
    }

    #[test]
    fn reordered_activities_are_equal() {
        let a = env(vec![activity("test", "test"), activity("test2", "test2")]);
        let b = env(vec![activity("test2", "test2"), activity("test", "test")]);
        assert!(environments_equal(&a, &b));
    }

    #[test]
    fn different_activity_count_is_not_equal() {
        let a = env(vec![activity("test", "test"), activity("test", "test4")]);
        let b = env(vec![activity("test", "test")]);
        assert!(!environments_equal(&a, &b));
    }

    #[test]
    fn duplicate_activities_compare_as_multiset() {
        let a = env(vec![activity("x", "ok"), activity("x", "ok"), activity("y", "ok")]);
        let b = env(vec![activity("x", "ok"), activity("y", "ok"), activity("y", "ok")]);
        assert!(!environments_equal(&a, &b));
    }

    #[test]
    fn different_history_id_is_not_equal() {
        let a = env(vec![]);
        let mut b = env(vec![]);
        b.history_id = 123;
        assert!(!environments_equal(&a, &b));
    }

    #[test]
    fn replica_counts_do_not_affect_equality() {
        let mut moving = activity("api", "Progressing");
        moving.replicas = ReplicaTransition {
            from: ReplicaState { current: 1, desired: 3 },
            to: ReplicaState { current: 2, desired: 3 },
        };
        assert!(environments_equal(
            &env(vec![moving]),
            &env(vec![activity("api", "Progressing")])
        ));
    }

    #[test]
    fn image_lists_compare_as_sets() {
        let mut a = activity("api", "Healthy");
        a.target_images = vec!["api:2".into(), "proxy:1".into()];
        let mut b = activity("api", "Healthy");
        b.target_images = vec!["proxy:1".into(), "api:2".into()];
        assert!(environments_equal(&env(vec![a]), &env(vec![b])));
    }
}
