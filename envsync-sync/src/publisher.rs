//! Comparator-guarded publisher.
//!
//! Each candidate snapshot is compared with the last snapshot successfully
//! published under the same name. Equal snapshots are not sent. Remote
//! failures are classified: retryable ones go back to the caller, permanent
//! ones are logged with full context and reported as [`PublishOutcome::Rejected`].
//! A rejected snapshot is remembered, and an equal candidate is answered
//! with the same rejection without another request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use envsync_core::{environments_equal, Environment, EnvironmentName};

use crate::error::{FailureClass, RemoteError, SyncError};
use crate::remote::RemoteService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Equal to the last published snapshot; nothing was sent.
    Unchanged,
    /// The remote service refused the snapshot. Not retried.
    Rejected(RemoteError),
}

#[derive(Debug, Clone)]
struct LastPublished {
    environment: Environment,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Memory {
    published: HashMap<EnvironmentName, LastPublished>,
    rejected: HashMap<EnvironmentName, (Environment, RemoteError)>,
}

pub struct Publisher {
    remote: Arc<dyn RemoteService>,
    memory: Mutex<Memory>,
}

impl Publisher {
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self {
            remote,
            memory: Mutex::new(Memory::default()),
        }
    }

    /// Publish `environment` unless it equals the last published snapshot.
    ///
    /// The last-published map is not locked across the remote call, so the
    /// watch path and the reconciliation path may both send an equal
    /// snapshot once. Neither can lose an update.
    pub fn publish(&self, environment: &Environment) -> Result<PublishOutcome, SyncError> {
        {
            let memory = self.lock();
            let unchanged = memory
                .published
                .get(&environment.name)
                .map(|last| environments_equal(&last.environment, environment))
                .unwrap_or(false);
            if unchanged {
                tracing::debug!("environment {} unchanged, publish skipped", environment.name);
                return Ok(PublishOutcome::Unchanged);
            }
            if let Some((_, err)) = memory
                .rejected
                .get(&environment.name)
                .filter(|(rejected, _)| environments_equal(rejected, environment))
            {
                tracing::debug!(
                    "environment {} equals a rejected snapshot, publish skipped",
                    environment.name
                );
                return Ok(PublishOutcome::Rejected(err.clone()));
            }
        }

        match self.remote.publish_environment(environment) {
            Ok(()) => {
                tracing::info!(
                    "published environment {} (health {}, sync {}, history {})",
                    environment.name,
                    environment.health_status,
                    environment.sync_status,
                    environment.history_id
                );
                let mut memory = self.lock();
                memory.rejected.remove(&environment.name);
                memory.published.insert(
                    environment.name.clone(),
                    LastPublished {
                        environment: environment.clone(),
                        at: Utc::now(),
                    },
                );
                Ok(PublishOutcome::Published)
            }
            Err(err) => match err.class() {
                FailureClass::Retryable => {
                    tracing::warn!(
                        "publish of environment {} failed, will retry: {}",
                        environment.name,
                        err
                    );
                    Err(SyncError::Transient(err))
                }
                FailureClass::Permanent => {
                    tracing::error!(
                        "remote rejected environment {}: status={} code={} message={:?} url={}",
                        environment.name,
                        err.status,
                        err.code,
                        err.message,
                        err.url
                    );
                    self.lock()
                        .rejected
                        .insert(environment.name.clone(), (environment.clone(), err.clone()));
                    Ok(PublishOutcome::Rejected(err))
                }
            },
        }
    }

    /// When each environment was last published, sorted by name.
    pub fn last_published(&self) -> Vec<(EnvironmentName, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .lock()
            .published
            .iter()
            .map(|(name, last)| (name.clone(), last.at))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn lock(&self) -> MutexGuard<'_, Memory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Value;

    use envsync_core::{EnvironmentDescriptor, HealthStatus, Heartbeat};

    use super::*;
    use crate::remote::InventoryKind;

    /// Records every publish and answers with scripted results.
    #[derive(Default)]
    struct ScriptedRemote {
        sent: Mutex<Vec<Environment>>,
        replies: Mutex<Vec<Result<(), RemoteError>>>,
    }

    impl ScriptedRemote {
        fn reply(self, result: Result<(), RemoteError>) -> Self {
            self.replies.lock().unwrap().push(result);
            self
        }

        fn sent(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl RemoteService for ScriptedRemote {
        fn list_environments(&self, _: &str) -> Result<Vec<EnvironmentDescriptor>, RemoteError> {
            Ok(Vec::new())
        }

        fn publish_environment(&self, environment: &Environment) -> Result<(), RemoteError> {
            self.sent.lock().unwrap().push(environment.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(())
            } else {
                replies.remove(0)
            }
        }

        fn publish_inventory(&self, _: InventoryKind, _: &Value) -> Result<(), RemoteError> {
            Ok(())
        }

        fn heartbeat(&self, _: &Heartbeat) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn svc1() -> Environment {
        let mut env = Environment::empty("svc1");
        env.health_status = HealthStatus::Healthy;
        env.history_id = 5;
        env
    }

    #[test]
    fn second_equal_snapshot_is_not_sent() {
        let remote = Arc::new(ScriptedRemote::default());
        let publisher = Publisher::new(remote.clone());

        assert_eq!(publisher.publish(&svc1()).unwrap(), PublishOutcome::Published);
        assert_eq!(publisher.publish(&svc1()).unwrap(), PublishOutcome::Unchanged);
        assert_eq!(remote.sent(), 1);
    }

    #[test]
    fn changed_snapshot_is_sent_again() {
        let remote = Arc::new(ScriptedRemote::default());
        let publisher = Publisher::new(remote.clone());
        publisher.publish(&svc1()).unwrap();

        let mut next = svc1();
        next.history_id = 6;
        assert_eq!(publisher.publish(&next).unwrap(), PublishOutcome::Published);
        assert_eq!(remote.sent(), 2);
    }

    #[test]
    fn server_error_is_transient_and_not_remembered() {
        let remote = Arc::new(
            ScriptedRemote::default().reply(Err(RemoteError::new(503, "UNAVAILABLE", "down"))),
        );
        let publisher = Publisher::new(remote.clone());

        let err = publisher.publish(&svc1()).unwrap_err();
        assert!(err.is_retryable());
        assert!(publisher.last_published().is_empty());

        assert_eq!(publisher.publish(&svc1()).unwrap(), PublishOutcome::Published);
        assert_eq!(remote.sent(), 2);
    }

    #[test]
    fn validation_error_is_rejected_and_not_published() {
        let rejection = RemoteError::new(422, "VALIDATION", "bad revision");
        let remote = Arc::new(ScriptedRemote::default().reply(Err(rejection.clone())));
        let publisher = Publisher::new(remote);

        assert_eq!(
            publisher.publish(&svc1()).unwrap(),
            PublishOutcome::Rejected(rejection)
        );
        assert!(publisher.last_published().is_empty());
    }

    #[test]
    fn rejected_snapshot_is_not_resent_until_it_changes() {
        let rejection = RemoteError::new(422, "VALIDATION", "bad revision");
        let remote = Arc::new(
            ScriptedRemote::default()
                .reply(Err(rejection.clone()))
                .reply(Err(rejection.clone())),
        );
        let publisher = Publisher::new(remote.clone());

        for _ in 0..5 {
            assert_eq!(
                publisher.publish(&svc1()).unwrap(),
                PublishOutcome::Rejected(rejection.clone())
            );
        }
        assert_eq!(remote.sent(), 1);

        let mut changed = svc1();
        changed.history_id = 6;
        assert!(matches!(
            publisher.publish(&changed).unwrap(),
            PublishOutcome::Rejected(_)
        ));
        assert_eq!(remote.sent(), 2);

        changed.history_id = 7;
        assert_eq!(publisher.publish(&changed).unwrap(), PublishOutcome::Published);
        assert_eq!(publisher.publish(&svc1()).unwrap(), PublishOutcome::Published);
        assert_eq!(remote.sent(), 4);
    }

    #[test]
    fn last_published_is_sorted_by_name() {
        let remote = Arc::new(ScriptedRemote::default());
        let publisher = Publisher::new(remote);
        publisher.publish(&Environment::empty("zeta")).unwrap();
        publisher.publish(&Environment::empty("alpha")).unwrap();

        let names: Vec<_> = publisher
            .last_published()
            .into_iter()
            .map(|(name, _)| name.0)
            .collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
