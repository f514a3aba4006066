//! Cluster watch adapter.
//!
//! Lists one custom resource collection, then streams newline-delimited watch
//! events from the list's resource version, turning both into
//! add / update(old, new) / delete notifications. Payloads are decoded here;
//! a document that fails to decode is logged and never reaches the queue.
//!
//! A broken stream (or a `410 Gone` error event) is reopened after the
//! configured retry delay with a fresh list. Objects that disappeared while
//! the stream was down are reported as deletes.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use envsync_core::{
    config::ClusterConfig,
    documents::{decode_application, decode_project},
    DecodeError, ResourceUid,
};
use envsync_sync::{ApplicationEvent, DedupQueue, EventKind, ProjectEvent};

use crate::error::DaemonError;
use crate::paths::WATCH_IDLE_TIMEOUT;

/// Custom resource collections the agent watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Applications,
    Projects,
}

impl WatchKind {
    pub fn resource(&self) -> &'static str {
        match self {
            WatchKind::Applications => "applications",
            WatchKind::Projects => "appprojects",
        }
    }

    pub fn url(&self, cluster: &ClusterConfig) -> String {
        format!(
            "{}/apis/argoproj.io/v1alpha1/namespaces/{}/{}",
            cluster.api_url.trim_end_matches('/'),
            cluster.namespace,
            self.resource()
        )
    }
}

/// A collection list response: the items plus the version to watch from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionList {
    #[serde(default)]
    pub metadata: ListMetadata,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMetadata {
    #[serde(default)]
    pub resource_version: String,
}

/// One line of a watch stream.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchLine {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub object: Value,
}

/// Change notification with the previous object for updates.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Add(Value),
    Update { old: Value, new: Value },
    Delete(Value),
}

/// What a watch line means for the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Translated {
    Notify(Notification),
    Ignore,
    /// The server ended the watch with an error status; reconnect.
    Restart(String),
}

/// Last-seen object per uid, used to supply `old` on updates and to find
/// objects deleted while no stream was open.
#[derive(Debug, Default)]
pub struct LastSeen {
    objects: HashMap<String, Value>,
}

impl LastSeen {
    pub fn translate(&mut self, line: WatchLine) -> Translated {
        let uid = object_uid(&line.object);
        match line.event_type.as_str() {
            "ADDED" | "MODIFIED" => {
                let Some(uid) = uid else {
                    return Translated::Notify(Notification::Add(line.object));
                };
                match self.objects.insert(uid, line.object.clone()) {
                    Some(old) => Translated::Notify(Notification::Update {
                        old,
                        new: line.object,
                    }),
                    None if line.event_type == "MODIFIED" => {
                        Translated::Notify(Notification::Update {
                            old: line.object.clone(),
                            new: line.object,
                        })
                    }
                    None => Translated::Notify(Notification::Add(line.object)),
                }
            }
            "DELETED" => {
                if let Some(uid) = uid {
                    self.objects.remove(&uid);
                }
                Translated::Notify(Notification::Delete(line.object))
            }
            "BOOKMARK" => Translated::Ignore,
            "ERROR" => Translated::Restart(
                line.object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("watch error")
                    .to_string(),
            ),
            other => {
                tracing::warn!(event_type = other, "unknown watch event type ignored");
                Translated::Ignore
            }
        }
    }

    /// Fold a fresh collection list into the cache. Listed objects already
    /// seen become updates so the publisher can suppress them; cached objects
    /// missing from the list become deletes.
    pub fn resync(&mut self, items: Vec<Value>) -> Vec<Notification> {
        let mut listed = HashSet::new();
        let mut notifications = Vec::with_capacity(items.len());
        for object in items {
            if let Some(uid) = object_uid(&object) {
                listed.insert(uid);
            }
            let line = WatchLine {
                event_type: "ADDED".to_string(),
                object,
            };
            if let Translated::Notify(notification) = self.translate(line) {
                notifications.push(notification);
            }
        }

        let gone: Vec<String> = self
            .objects
            .keys()
            .filter(|uid| !listed.contains(*uid))
            .cloned()
            .collect();
        for uid in gone {
            if let Some(object) = self.objects.remove(&uid) {
                tracing::info!(uid = %uid, "object removed while disconnected");
                notifications.push(Notification::Delete(object));
            }
        }
        notifications
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn object_uid(object: &Value) -> Option<String> {
    object
        .pointer("/metadata/uid")
        .and_then(Value::as_str)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string)
}

fn split(notification: &Notification) -> (EventKind, &Value) {
    match notification {
        Notification::Add(object) => (EventKind::Added, object),
        Notification::Update { new, .. } => (EventKind::Updated, new),
        Notification::Delete(object) => (EventKind::Deleted, object),
    }
}

pub fn application_event(
    notification: &Notification,
) -> Result<(ResourceUid, ApplicationEvent), DecodeError> {
    let (kind, object) = split(notification);
    let event = ApplicationEvent {
        kind,
        app: decode_application(object)?,
    };
    Ok((event.identity(), event))
}

pub fn project_event(
    notification: &Notification,
) -> Result<(ResourceUid, ProjectEvent), DecodeError> {
    let (kind, object) = split(notification);
    let event = ProjectEvent {
        kind,
        project: decode_project(object)?,
    };
    Ok((event.identity(), event))
}

/// Decode a notification and hand it to the queue. Decode failures are
/// logged and dropped.
pub fn ingest<P, D>(queue: &DedupQueue<P>, notification: &Notification, decode: D)
where
    D: Fn(&Notification) -> Result<(ResourceUid, P), DecodeError>,
{
    match decode(notification) {
        Ok((identity, payload)) => {
            let outcome = queue.enqueue(identity.clone(), payload);
            tracing::debug!(uid = %identity, ?outcome, depth = queue.len(), "watch event queued");
        }
        Err(err) => {
            tracing::error!(error = %err, "dropping undecodable watch payload");
        }
    }
}

/// Watch one collection until shutdown, feeding `queue`.
pub async fn watch_task<P, D>(
    kind: WatchKind,
    cluster: ClusterConfig,
    connect_timeout: Duration,
    retry: Duration,
    queue: Arc<DedupQueue<P>>,
    decode: D,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    P: Send + 'static,
    D: Fn(&Notification) -> Result<(ResourceUid, P), DecodeError> + Send + 'static,
{
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(connect_timeout)
        .timeout_read(WATCH_IDLE_TIMEOUT)
        .build();
    let url = kind.url(&cluster);
    let mut last_seen = LastSeen::default();

    loop {
        let listing = {
            let agent = agent.clone();
            let url = url.clone();
            let token = cluster.token.clone();
            tokio::task::spawn_blocking(move || list_collection(&agent, &url, &token))
        };
        let listing = tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            listing = listing => listing,
        };
        let list = match listing {
            Ok(Ok(list)) => list,
            Ok(Err(reason)) => {
                tracing::warn!(
                    resource = kind.resource(),
                    reason = %reason,
                    "collection list failed",
                );
                tokio::select! {
                    _ = shutdown_rx.recv() => return Ok(()),
                    _ = tokio::time::sleep(retry) => continue,
                }
            }
            Err(err) => {
                tracing::error!(
                    resource = kind.resource(),
                    error = %err,
                    "collection list task failed",
                );
                tokio::select! {
                    _ = shutdown_rx.recv() => return Ok(()),
                    _ = tokio::time::sleep(retry) => continue,
                }
            }
        };
        let resource_version = list.metadata.resource_version.clone();
        for notification in last_seen.resync(list.items) {
            ingest(&queue, &notification, &decode);
        }

        let (line_tx, mut line_rx) = mpsc::channel::<WatchLine>(256);
        let stream = {
            let agent = agent.clone();
            let url = url.clone();
            let token = cluster.token.clone();
            let resource_version = resource_version.clone();
            tokio::task::spawn_blocking(move || {
                stream_lines(&agent, &url, &token, &resource_version, line_tx)
            })
        };
        tracing::info!(
            resource = kind.resource(),
            url = %url,
            resource_version = %resource_version,
            "watch stream opened",
        );

        let mut restart_reason = None;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return Ok(()),
                line = line_rx.recv() => {
                    let Some(line) = line else { break };
                    match last_seen.translate(line) {
                        Translated::Notify(notification) => ingest(&queue, &notification, &decode),
                        Translated::Ignore => {}
                        Translated::Restart(reason) => {
                            restart_reason = Some(reason);
                            break;
                        }
                    }
                }
            }
        }
        drop(line_rx);

        let reason = match restart_reason {
            Some(reason) => reason,
            None => match stream.await {
                Ok(Ok(())) => "stream ended".to_string(),
                Ok(Err(err)) => err,
                Err(err) => format!("stream task failed: {err}"),
            },
        };
        tracing::warn!(
            resource = kind.resource(),
            reason = %reason,
            retry_secs = retry.as_secs(),
            "watch stream closed, reconnecting",
        );

        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

fn authorized(request: ureq::Request, token: &str) -> ureq::Request {
    if token.is_empty() {
        request
    } else {
        request.set("Authorization", &format!("Bearer {token}"))
    }
}

/// Blocking list of the whole collection.
fn list_collection(
    agent: &ureq::Agent,
    url: &str,
    token: &str,
) -> Result<CollectionList, String> {
    authorized(agent.get(url), token)
        .call()
        .map_err(|err| err.to_string())?
        .into_json()
        .map_err(|err| err.to_string())
}

/// Blocking read of one watch stream starting after `resource_version`.
/// Returns when the stream ends, fails, or the receiver goes away.
fn stream_lines(
    agent: &ureq::Agent,
    url: &str,
    token: &str,
    resource_version: &str,
    lines: mpsc::Sender<WatchLine>,
) -> Result<(), String> {
    let mut request = agent
        .get(url)
        .query("watch", "true")
        .query("allowWatchBookmarks", "true");
    if !resource_version.is_empty() {
        request = request.query("resourceVersion", resource_version);
    }
    let response = authorized(request, token)
        .call()
        .map_err(|err| err.to_string())?;

    for raw in BufReader::new(response.into_reader()).lines() {
        let raw = raw.map_err(|err| err.to_string())?;
        if raw.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WatchLine>(&raw) {
            Ok(line) => {
                if lines.blocking_send(line).is_err() {
                    return Ok(());
                }
            }
            Err(err) => tracing::error!(error = %err, "dropping malformed watch line"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn line(event_type: &str, object: Value) -> WatchLine {
        WatchLine {
            event_type: event_type.to_string(),
            object,
        }
    }

    fn app(uid: &str, history: i64) -> Value {
        json!({
            "metadata": {"name": "svc1", "uid": uid},
            "status": {"history": [{"id": history}]}
        })
    }

    #[test]
    fn add_modify_delete_carry_previous_object() {
        let mut seen = LastSeen::default();
        assert_eq!(
            seen.translate(line("ADDED", app("u1", 1))),
            Translated::Notify(Notification::Add(app("u1", 1)))
        );
        assert_eq!(
            seen.translate(line("MODIFIED", app("u1", 2))),
            Translated::Notify(Notification::Update {
                old: app("u1", 1),
                new: app("u1", 2)
            })
        );
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen.translate(line("DELETED", app("u1", 2))),
            Translated::Notify(Notification::Delete(app("u1", 2)))
        );
        assert!(seen.is_empty());
    }

    #[test]
    fn resync_reports_objects_deleted_while_disconnected() {
        let mut seen = LastSeen::default();
        seen.resync(vec![app("a", 1), app("b", 1)]);
        assert_eq!(seen.len(), 2);

        let notifications = seen.resync(vec![app("a", 1)]);
        assert_eq!(
            notifications,
            vec![
                Notification::Update {
                    old: app("a", 1),
                    new: app("a", 1)
                },
                Notification::Delete(app("b", 1)),
            ]
        );
        assert_eq!(seen.len(), 1);

        let queue = DedupQueue::new();
        for notification in &notifications {
            ingest(&queue, notification, application_event);
        }
        let deleted = queue
            .try_dequeue()
            .into_iter()
            .chain(queue.try_dequeue())
            .find(|item| item.identity == ResourceUid::from("b"))
            .expect("delete queued");
        assert_eq!(deleted.payload.kind, EventKind::Deleted);
    }

    #[test]
    fn first_list_is_all_adds() {
        let mut seen = LastSeen::default();
        let notifications = seen.resync(vec![app("a", 1), json!({"metadata": {}})]);
        assert!(notifications
            .iter()
            .all(|n| matches!(n, Notification::Add(_))));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn collection_list_carries_resource_version() {
        let list: CollectionList = serde_json::from_value(json!({
            "metadata": {"resourceVersion": "4711"},
            "items": [app("a", 1)]
        }))
        .expect("list");
        assert_eq!(list.metadata.resource_version, "4711");
        assert_eq!(list.items.len(), 1);
    }

    #[test]
    fn replayed_add_after_reconnect_is_an_update() {
        let mut seen = LastSeen::default();
        seen.translate(line("ADDED", app("u1", 1)));
        assert!(matches!(
            seen.translate(line("ADDED", app("u1", 1))),
            Translated::Notify(Notification::Update { .. })
        ));
    }

    #[test]
    fn bookmark_is_ignored_and_error_restarts() {
        let mut seen = LastSeen::default();
        assert_eq!(seen.translate(line("BOOKMARK", json!({}))), Translated::Ignore);
        assert_eq!(
            seen.translate(line("ERROR", json!({"code": 410, "message": "too old resource version"}))),
            Translated::Restart("too old resource version".to_string())
        );
    }

    #[test]
    fn undecodable_payload_never_reaches_the_queue() {
        let queue = DedupQueue::new();
        ingest(
            &queue,
            &Notification::Add(json!({"metadata": {"uid": "u1"}})),
            application_event,
        );
        assert!(queue.is_empty());

        ingest(&queue, &Notification::Add(app("u1", 1)), application_event);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn update_uses_new_object_and_uid_identity() {
        let (identity, event) = application_event(&Notification::Update {
            old: app("u1", 1),
            new: app("u1", 2),
        })
        .expect("decode");
        assert_eq!(identity, ResourceUid::from("u1"));
        assert_eq!(event.kind, EventKind::Updated);
        assert_eq!(event.app.history.last().map(|h| h.id), Some(2));
    }

    #[test]
    fn project_delete_decodes() {
        let (identity, event) = project_event(&Notification::Delete(
            json!({"metadata": {"name": "payments", "uid": "p1"}}),
        ))
        .expect("decode");
        assert_eq!(identity.0, "p1");
        assert_eq!(event.kind, EventKind::Deleted);
    }

    #[test]
    fn watch_url_targets_namespaced_collection() {
        let cluster = ClusterConfig {
            api_url: "https://cluster:6443/".to_string(),
            token: String::new(),
            namespace: "argocd".to_string(),
        };
        assert_eq!(
            WatchKind::Projects.url(&cluster),
            "https://cluster:6443/apis/argoproj.io/v1alpha1/namespaces/argocd/appprojects"
        );
    }
}
