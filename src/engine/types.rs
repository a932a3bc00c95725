//! Engine identity and runtime counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use uuid::Uuid;

/// Immutable engine metadata, logged once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    /// Unique identifier for this engine instance.
    pub id: EngineId,
    pub hostname: String,
    pub pid: i32,
    /// Version string (e.g., git commit hash or semver).
    pub version: String,
    /// Snapshot of engine configuration (for audit trail).
    pub config_snapshot: serde_json::Value,
}

/// Point-in-time view of the engine's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub campaigns_running: usize,
    pub messages_in_flight: usize,
    /// Dispatches that delivered their message since startup.
    pub messages_sent: u64,
    /// Dispatches that ended without delivering since startup.
    pub messages_failed: u64,
}

/// Shared counters updated by executor and dispatcher tasks.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub(crate) campaigns_running: AtomicUsize,
    pub(crate) messages_in_flight: AtomicUsize,
    pub(crate) messages_sent: AtomicU64,
    pub(crate) messages_failed: AtomicU64,
}

impl EngineCounters {
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            campaigns_running: self.campaigns_running.load(Ordering::Relaxed),
            messages_in_flight: self.messages_in_flight.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
        }
    }
}

/// Unique identifier for an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EngineId(pub Uuid);

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for EngineId {
    fn from(uuid: Uuid) -> Self {
        EngineId(uuid)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Get the current hostname.
pub fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Get the current process ID.
pub fn get_pid() -> i32 {
    std::process::id() as i32
}

/// Get a version string.
pub fn get_version() -> String {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .unwrap_or("dev")
        .to_string()
}
