//! # envsync-sync
//!
//! Event ingestion and change detection between the cluster and the remote
//! service.
//!
//! - [`queue`]: one pending payload per resource uid, FIFO of identities
//! - [`publisher`]: comparator-guarded publish with failure classification
//! - [`pipeline`]: workers turning dequeued events into published snapshots
//! - [`reconcile`]: periodic discovery of environments new to the remote listing
//! - [`remote`] / [`http`]: collaborator traits and their `ureq` clients

pub mod error;
pub mod http;
pub mod inventory;
pub mod pipeline;
pub mod publisher;
pub mod queue;
pub mod reconcile;
pub mod remote;

pub use error::{FailureClass, RemoteError, SyncError};
pub use pipeline::{ApplicationEvent, ApplicationWorker, EventKind, ProjectEvent, ProjectWorker};
pub use publisher::{PublishOutcome, Publisher};
pub use queue::{DedupQueue, Enqueued, QueueItem};
pub use reconcile::{send_heartbeat, ReconcileReport, Reconciler, TickOutcome};
pub use remote::{ClusterSource, InventoryKind, RemoteService};
