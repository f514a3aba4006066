//! `ureq` clients for the remote service and the controller API.
//!
//! Every agent carries the configured request timeout. Non-2xx responses are
//! decoded into [`RemoteError`] when the body is the service's error document;
//! otherwise the status line fills the fields.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use envsync_core::{
    documents::{ManagedResources, ResourceTree},
    Environment, EnvironmentDescriptor, Heartbeat,
};

use crate::error::RemoteError;
use crate::remote::{ClusterSource, InventoryKind, RemoteService};

// ---------------------------------------------------------------------------
// Remote service
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EnvironmentListing {
    #[serde(default)]
    docs: Vec<EnvironmentDescriptor>,
}

/// Remote service client. The token is sent verbatim in `Authorization`.
#[derive(Debug, Clone)]
pub struct HttpRemoteService {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl HttpRemoteService {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl RemoteService for HttpRemoteService {
    fn list_environments(
        &self,
        source_type: &str,
    ) -> Result<Vec<EnvironmentDescriptor>, RemoteError> {
        let url = self.url("/api/environments-v2");
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &self.token)
            .query("plain", "true")
            .query("isEnvironment", "false")
            .call()
            .map_err(|err| map_error(&url, err))?;
        let listing: EnvironmentListing = response
            .into_json()
            .map_err(|err| RemoteError::transport(&url, err.to_string()))?;

        Ok(listing
            .docs
            .into_iter()
            .filter(|descriptor| descriptor.spec.source_type == source_type)
            .collect())
    }

    fn publish_environment(&self, environment: &Environment) -> Result<(), RemoteError> {
        let url = self.url("/api/environments-v2/argo/events");
        self.agent
            .post(&url)
            .set("Authorization", &self.token)
            .send_json(environment)
            .map_err(|err| map_error(&url, err))?;
        Ok(())
    }

    fn publish_inventory(&self, kind: InventoryKind, items: &Value) -> Result<(), RemoteError> {
        let url = self.url("/api/argo-agent/state");
        self.agent
            .put(&url)
            .set("Authorization", &self.token)
            .send_json(json!({ "type": kind.as_str(), "items": items }))
            .map_err(|err| map_error(&url, err))?;
        Ok(())
    }

    fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), RemoteError> {
        let url = self.url("/api/argo-agent/heartbeat");
        self.agent
            .post(&url)
            .set("Authorization", &self.token)
            .send_json(heartbeat)
            .map_err(|err| map_error(&url, err))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Controller API
// ---------------------------------------------------------------------------

/// Client for the GitOps controller's REST API (bearer token).
#[derive(Debug, Clone)]
pub struct HttpArgoClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl HttpArgoClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn get_json(&self, path: &str) -> Result<Value, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .call()
            .map_err(|err| map_error(&url, err))?;
        response
            .into_json()
            .map_err(|err| RemoteError::transport(&url, err.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> Result<T, RemoteError> {
        serde_json::from_value(value).map_err(|err| {
            RemoteError::new(422, "INVALID_RESPONSE", err.to_string()).with_url(path)
        })
    }
}

impl ClusterSource for HttpArgoClient {
    fn application(&self, name: &str) -> Result<Value, RemoteError> {
        self.get_json(&format!("/api/v1/applications/{name}"))
    }

    fn resource_tree(&self, name: &str) -> Result<Option<ResourceTree>, RemoteError> {
        let path = format!("/api/v1/applications/{name}/resource-tree");
        match self.get_json(&path) {
            Ok(value) => Self::decode(&path, value).map(Some),
            Err(err) if err.status == 404 => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn managed_resources(&self, name: &str) -> Result<ManagedResources, RemoteError> {
        let path = format!("/api/v1/applications/{name}/managed-resources");
        let value = self.get_json(&path)?;
        Self::decode(&path, value)
    }
}

fn map_error(url: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => {
            let status_text = response.status_text().to_string();
            let body = response.into_string().unwrap_or_default();
            error_from_body(url, status, &status_text, &body)
        }
        ureq::Error::Transport(transport) => RemoteError::transport(url, transport.to_string()),
    }
}

fn error_from_body(url: &str, status: u16, status_text: &str, body: &str) -> RemoteError {
    let mut err: RemoteError = serde_json::from_str(body).unwrap_or_default();
    err.status = status;
    if err.code.is_empty() {
        err.code = format!("HTTP_{status}");
    }
    if err.message.is_empty() {
        err.message = if body.trim().is_empty() {
            status_text.to_string()
        } else {
            body.trim().to_string()
        };
    }
    err.with_url(url)
}
