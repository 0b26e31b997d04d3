//! Service mode state machine.
//!
//! `Normal → Throttled` and back is driven by GC guardrails. `Degraded`
//! latches: it is entered on any non-recoverable invariant violation
//! (finality violation, corruption reached through a manifest, lost CAS,
//! stale fence mid-ingest) and only an operator restart leaves it.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{error, warn};

/// The operating mode of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceMode {
    /// Ingest and queries run normally.
    Normal,
    /// Ingest runs at reduced rate due to GC backlog.
    Throttled,
    /// Fail-closed: ingest refused; queries per operator policy.
    Degraded,
}

#[derive(Debug)]
struct ModeInner {
    mode: ServiceMode,
    reason: Option<String>,
}

/// Shared runtime state of the service.
#[derive(Debug)]
pub struct ServiceState {
    inner: RwLock<ModeInner>,
    last_ingest_unix: AtomicU64,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            inner: RwLock::new(ModeInner { mode: ServiceMode::Normal, reason: None }),
            last_ingest_unix: AtomicU64::new(0),
        }
    }
}

impl ServiceState {
    /// The current mode.
    pub fn mode(&self) -> ServiceMode {
        self.inner.read().mode
    }

    /// The reason the service left normal mode, if it has.
    pub fn reason(&self) -> Option<String> {
        self.inner.read().reason.clone()
    }

    /// Latch into degraded mode. Idempotent; the first reason wins.
    pub fn set_degraded(&self, reason: impl Into<String>) {
        let mut inner = self.inner.write();
        if inner.mode == ServiceMode::Degraded {
            return;
        }
        let reason = reason.into();
        error!(target: "log_index::state", %reason, "entering degraded mode");
        inner.mode = ServiceMode::Degraded;
        inner.reason = Some(reason);
    }

    /// Enter throttled mode. No-op while degraded.
    pub fn set_throttled(&self, reason: impl Into<String>) {
        let mut inner = self.inner.write();
        if inner.mode != ServiceMode::Normal {
            return;
        }
        let reason = reason.into();
        warn!(target: "log_index::state", %reason, "throttling ingest");
        inner.mode = ServiceMode::Throttled;
        inner.reason = Some(reason);
    }

    /// Leave throttled mode once the backlog clears. No-op while degraded.
    pub fn clear_throttle(&self) {
        let mut inner = self.inner.write();
        if inner.mode == ServiceMode::Throttled {
            inner.mode = ServiceMode::Normal;
            inner.reason = None;
        }
    }

    /// Record a successful ingest at the given unix time.
    pub fn record_ingest(&self, unix_sec: u64) {
        self.last_ingest_unix.store(unix_sec, Ordering::Relaxed);
    }

    /// Unix time of the last successful ingest, if any.
    pub fn last_ingest_unix(&self) -> Option<u64> {
        match self.last_ingest_unix.load(Ordering::Relaxed) {
            0 => None,
            unix => Some(unix),
        }
    }
}
