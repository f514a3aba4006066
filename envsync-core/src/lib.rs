//! envsync core library: domain types, document decoding, snapshot
//! building and comparison, configuration.
//!
//! - [`types`]: newtypes, the [`Environment`] snapshot and remote records
//! - [`documents`]: typed cluster documents and their decode step
//! - [`builder`]: application documents into snapshots
//! - [`comparator`]: structural snapshot equality
//! - [`config`]: agent configuration load / save
//! - [`error`]: [`DecodeError`], [`BuildError`], [`ConfigError`]

pub mod builder;
pub mod comparator;
pub mod config;
pub mod documents;
pub mod error;
pub mod types;

pub use comparator::environments_equal;
pub use config::AgentConfig;
pub use error::{BuildError, ConfigError, DecodeError};
pub use types::{
    Activity, ApplicationSummary, Environment, EnvironmentDescriptor, EnvironmentName,
    HealthStatus, Heartbeat, KnownEnvironment, ProjectSummary, ReplicaState, ReplicaTransition,
    ResourceUid, SyncStatus,
};
