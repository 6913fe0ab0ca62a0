//! Shared refresh health for the /health endpoint.
//! Updated by the refresh orchestrator, read by the API.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

/// Refresh pipeline phase. A completed or aborted refresh returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RefreshPhase {
    Idle = 0,
    FetchingSources = 1,
    Reconciling = 2,
    Committing = 3,
    GeneratingSummary = 4,
}

impl RefreshPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RefreshPhase::FetchingSources,
            2 => RefreshPhase::Reconciling,
            3 => RefreshPhase::Committing,
            4 => RefreshPhase::GeneratingSummary,
            _ => RefreshPhase::Idle,
        }
    }
}

impl std::fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefreshPhase::Idle => "idle",
            RefreshPhase::FetchingSources => "fetching_sources",
            RefreshPhase::Reconciling => "reconciling",
            RefreshPhase::Committing => "committing",
            RefreshPhase::GeneratingSummary => "generating_summary",
        };
        write!(f, "{s}")
    }
}

/// Shared refresh metrics. Timestamps are Unix milliseconds, 0 = never.
#[derive(Default)]
pub struct RefreshHealth {
    phase: AtomicU8,
    last_success_at_ms: AtomicU64,
    last_failure_at_ms: AtomicU64,
    consecutive_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub phase: RefreshPhase,
    pub last_success_at_ms: Option<u64>,
    pub last_failure_at_ms: Option<u64>,
    pub consecutive_failures: u64,
}

impl RefreshHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_phase(&self, phase: RefreshPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> RefreshPhase {
        RefreshPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn record_success(&self, at_ms: u64) {
        self.last_success_at_ms.store(at_ms, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.set_phase(RefreshPhase::Idle);
    }

    pub fn record_failure(&self, at_ms: u64) {
        self.last_failure_at_ms.store(at_ms, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.set_phase(RefreshPhase::Idle);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let nonzero = |v: u64| (v != 0).then_some(v);
        HealthSnapshot {
            phase: self.phase(),
            last_success_at_ms: nonzero(self.last_success_at_ms.load(Ordering::Relaxed)),
            last_failure_at_ms: nonzero(self.last_failure_at_ms.load(Ordering::Relaxed)),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_until_success() {
        let h = RefreshHealth::new();
        h.set_phase(RefreshPhase::Committing);
        h.record_failure(10);
        h.record_failure(20);
        let s = h.snapshot();
        assert_eq!(s.phase, RefreshPhase::Idle);
        assert_eq!(s.consecutive_failures, 2);
        assert_eq!(s.last_failure_at_ms, Some(20));
        assert_eq!(s.last_success_at_ms, None);

        h.record_success(30);
        let s = h.snapshot();
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.last_success_at_ms, Some(30));
    }
}
