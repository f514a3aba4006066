use std::path::{Path, PathBuf};
use std::time::Duration;

use envsync_core::config;

pub const DAEMON_SOCKET: &str = "envsync.sock";

/// Pause before a transiently failed item is handed back to its worker.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Longest silence tolerated on a watch stream before reconnecting.
pub const WATCH_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub fn envsync_root(home: &Path) -> PathBuf {
    config::config_dir_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    envsync_root(home).join(DAEMON_SOCKET)
}
