//! Domain types for the inventory store.
//!
//! `Host` rows are owned by the autoscaler. `Process` and `State` rows are
//! reported by the agent on each transcoding host and are read-only here.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Substring that marks a reported process as a transcode.
pub const TRANSCODE_MARKER: &str = "transcode";

/// Surrogate key of a registered host.
///
/// `0` is reserved for the fallback capacity and never stored as a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub i64);

impl HostId {
    pub const FALLBACK: HostId = HostId(0);

    pub fn is_fallback(self) -> bool {
        self == Self::FALLBACK
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Host ───────────────────────────────────────────────────────────

/// A registered cloud worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Assigned by the store; `None` until the row has been written.
    pub id: Option<HostId>,
    /// Cloud instance name, unique across the inventory.
    pub servername: String,
    /// Private network address used for dispatch.
    pub hostname: String,
    pub weight: u32,
    /// Unix timestamp (milliseconds) of registration.
    pub created: u64,
}

impl Host {
    /// A not-yet-persisted host registered now.
    pub fn new(servername: impl Into<String>, hostname: impl Into<String>, weight: u32) -> Self {
        Self {
            id: None,
            servername: servername.into(),
            hostname: hostname.into(),
            weight,
            created: epoch_millis(),
        }
    }
}

// ── Process / State ────────────────────────────────────────────────

/// A process reported as running on some host (including the fallback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub id: i64,
    pub host_id: HostId,
    /// OS-level pid, informational only.
    pub process_id: i64,
    pub cmd: String,
}

impl Process {
    pub fn is_transcode(&self) -> bool {
        self.cmd.contains(TRANSCODE_MARKER)
    }
}

/// Per-process lifecycle marker reported alongside `Process` rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub id: i64,
    pub host_id: HostId,
    pub process_id: i64,
    pub state: String,
}

/// Number of transcode processes in a snapshot.
pub fn count_transcodes(processes: &[Process]) -> usize {
    processes.iter().filter(|p| p.is_transcode()).count()
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
