//! In-memory application and project inventories.
//!
//! The remote service keeps a full list of applications and projects next to
//! the environments. Every push replaces the whole list, so the inventory is
//! held here keyed by uid and re-sent in full after each add or delete.
//! A failed push leaves `last_pushed` alone, so the next push retries.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use envsync_core::ResourceUid;

use crate::error::SyncError;
use crate::remote::{InventoryKind, RemoteService};

#[derive(Debug)]
pub struct Inventory<T> {
    kind: InventoryKind,
    items: BTreeMap<ResourceUid, T>,
    last_pushed: Option<Value>,
}

impl<T: Serialize> Inventory<T> {
    pub fn new(kind: InventoryKind) -> Self {
        Self {
            kind,
            items: BTreeMap::new(),
            last_pushed: None,
        }
    }

    pub fn upsert(&mut self, uid: ResourceUid, item: T) {
        self.items.insert(uid, item);
    }

    pub fn remove(&mut self, uid: &ResourceUid) -> Option<T> {
        self.items.remove(uid)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Send the full inventory unless it equals the last successful push.
    ///
    /// Returns `true` when a request was made.
    pub fn push(&mut self, remote: &dyn RemoteService) -> Result<bool, SyncError> {
        let items = serde_json::to_value(self.items.values().collect::<Vec<_>>())?;
        if self.last_pushed.as_ref() == Some(&items) {
            tracing::debug!("{} inventory unchanged, push skipped", self.kind);
            return Ok(false);
        }

        remote.publish_inventory(self.kind, &items)?;
        tracing::info!("pushed {} inventory ({} items)", self.kind, self.items.len());
        self.last_pushed = Some(items);
        Ok(true)
    }
}
